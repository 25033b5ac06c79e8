use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    ledger::LedgerRepository,
    middleware::{CurrentUser, ValidatedJson},
    orders::{OrderService, UploadOutcome},
    withdrawal::WithdrawalService,
};

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub withdrawals: Arc<WithdrawalService>,
    pub ledger: Arc<dyn LedgerRepository>,
}

/// Upload an order number for accrual
/// POST /api/user/orders (text/plain body)
pub async fn upload_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    body: String,
) -> AppResult<StatusCode> {
    let number = body.trim();
    if number.is_empty() {
        return Err(AppError::InvalidInput("Order number is required".to_string()));
    }

    match state.orders.upload(user_id, number).await? {
        UploadOutcome::Accepted(_) => Ok(StatusCode::ACCEPTED),
        UploadOutcome::AlreadyUploaded => Ok(StatusCode::OK),
    }
}

/// GET /api/user/orders
pub async fn list_orders(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Response> {
    let orders = state.orders.list(user_id).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(body).into_response())
}

/// GET /api/user/balance
pub async fn get_balance(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<BalanceResponse>> {
    let summary = state.withdrawals.summary(user_id).await?;
    Ok(Json(summary.into()))
}

/// Spend points against one of the caller's orders
/// POST /api/user/balance/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ValidatedJson(request): ValidatedJson<WithdrawRequest>,
) -> AppResult<Json<WithdrawalResponse>> {
    info!(user = %user_id, order = %request.order, sum = %request.sum, "Withdrawal requested");

    let withdrawal = state
        .withdrawals
        .withdraw(user_id, &request.order, request.sum)
        .await?;

    Ok(Json(withdrawal.into()))
}

/// GET /api/user/withdrawals
pub async fn list_withdrawals(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Response> {
    let withdrawals = state.withdrawals.withdrawals(user_id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(WithdrawalResponse::from)
        .collect();
    Ok(Json(body).into_response())
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}
