use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use tracing::error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("External error: {0}")]
    ExternalError(String),
}

/// Order-related business rejections
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Order number {0} fails the Luhn check")]
    InvalidNumber(String),

    #[error("Order {0} not found")]
    NotFound(String),

    #[error("Order {0} was uploaded by another user")]
    OwnedByAnotherUser(String),

    #[error("Order {0} does not belong to the requesting user")]
    NotOwned(String),
}

/// Ledger-related business rejections
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Withdrawal amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("Amount {0} has more than two decimal places")]
    SubCentAmount(Decimal),

    #[error("Accrual must not be negative, got {0}")]
    NegativeAccrual(Decimal),
}

impl AppError {
    /// Business-rule rejections are expected outcomes, not system failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::Order(_)
                | AppError::Ledger(LedgerError::InsufficientBalance { .. })
                | AppError::Ledger(LedgerError::NonPositiveAmount(_))
                | AppError::Ledger(LedgerError::SubCentAmount(_))
                | AppError::InvalidInput(_)
                | AppError::Validation(_)
                | AppError::Unauthorized
        )
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if !self.is_rejection() {
            error!("❌ Request failed: {}", self);
        }

        let (status, error_code, message, details) = match self {
            AppError::Order(OrderError::InvalidNumber(number)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_ORDER_NUMBER",
                format!("Order number {} is not valid", number),
                None,
            ),
            AppError::Order(OrderError::NotFound(number)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "ORDER_NOT_FOUND",
                format!("Order {} not found", number),
                None,
            ),
            AppError::Order(OrderError::NotOwned(number)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "ORDER_NOT_OWNED",
                format!("Order {} does not belong to this user", number),
                None,
            ),
            AppError::Order(OrderError::OwnedByAnotherUser(number)) => (
                StatusCode::CONFLICT,
                "ORDER_UPLOADED_BY_ANOTHER_USER",
                format!("Order {} was already uploaded by another user", number),
                None,
            ),
            AppError::Ledger(LedgerError::InsufficientBalance { required, available }) => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_BALANCE",
                "Not enough points on balance".to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            ),
            AppError::Ledger(LedgerError::NonPositiveAmount(amount)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_AMOUNT",
                format!("Withdrawal amount must be positive, got {}", amount),
                None,
            ),
            AppError::Ledger(LedgerError::SubCentAmount(amount)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_AMOUNT",
                format!("Amount {} has more than two decimal places", amount),
                None,
            ),
            AppError::InvalidInput(message) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                message,
                None,
            ),
            AppError::Validation(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_FAILED",
                message,
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "User is not authenticated".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
