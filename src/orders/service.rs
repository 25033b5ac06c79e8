use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppResult, OrderError};
use crate::ledger::{is_valid_order_number, Order, OrderRepository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// New order stored as NEW, awaiting reconciliation
    Accepted(Order),
    /// This user already uploaded the number; nothing changed
    AlreadyUploaded,
}

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    pub async fn upload(&self, user_id: Uuid, number: &str) -> AppResult<UploadOutcome> {
        let number = number.trim();
        if !is_valid_order_number(number) {
            return Err(OrderError::InvalidNumber(number.to_string()).into());
        }

        if let Some(order) = self.orders.insert(number, user_id).await? {
            info!(order = %number, user = %user_id, "📥 Order accepted");
            return Ok(UploadOutcome::Accepted(order));
        }

        // Number taken; decide whose it is
        match self.orders.find_by_number(number).await? {
            Some(existing) if existing.user_id == user_id => Ok(UploadOutcome::AlreadyUploaded),
            _ => Err(OrderError::OwnedByAnotherUser(number.to_string()).into()),
        }
    }

    pub async fn list(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        self.orders.list_for_user(user_id).await
    }
}
