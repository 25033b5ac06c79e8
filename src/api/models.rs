use crate::ledger::models::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::withdrawal::BalanceSummary;

// ========== REQUEST MODELS ==========

/// Spend points against one of the caller's orders
#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawRequest {
    #[validate(custom = "validate_order_number")]
    pub order: String,

    #[validate(custom = "validate_positive_sum")]
    pub sum: Decimal,
}

fn validate_order_number(order: &str) -> Result<(), ValidationError> {
    if is_valid_order_number(order) {
        return Ok(());
    }
    let mut error = ValidationError::new("luhn");
    error.message = Some("order number fails the Luhn check".into());
    Err(error)
}

fn validate_positive_sum(sum: &Decimal) -> Result<(), ValidationError> {
    if *sum <= Decimal::ZERO {
        let mut error = ValidationError::new("positive");
        error.message = Some("sum must be greater than zero".into());
        return Err(error);
    }
    if !is_whole_cents(*sum) {
        let mut error = ValidationError::new("precision");
        error.message = Some("sum must not have more than two decimal places".into());
        return Err(error);
    }
    Ok(())
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        // Accrual is only reported for settled orders
        let accrual = match order.status {
            OrderStatus::Processed => order.accrual,
            _ => None,
        };
        Self {
            number: order.number,
            status: order.status,
            accrual,
            uploaded_at: order.uploaded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl From<BalanceSummary> for BalanceResponse {
    fn from(summary: BalanceSummary) -> Self {
        Self {
            current: summary.current,
            withdrawn: summary.withdrawn,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(withdrawal: Withdrawal) -> Self {
        Self {
            order: withdrawal.order_number,
            sum: withdrawal.amount,
            processed_at: withdrawal.processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
