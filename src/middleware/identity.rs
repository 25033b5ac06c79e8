use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::debug;
use uuid::Uuid;

use crate::api::handler::AppState;
use crate::error::AppError;

/// Header set by the upstream auth gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller.
///
/// Extraction also opens the caller's zero balance the first time they are
/// seen, so every known user has a balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(AppError::Unauthorized)?;

        state.ledger.open_balance(user_id).await?;
        debug!(user = %user_id, "Request authenticated");

        Ok(CurrentUser(user_id))
    }
}
