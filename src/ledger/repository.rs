use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::models::{Balance, Order, OrderStatus, SettleOutcome, Withdrawal};
use crate::error::AppResult;

/// Durable store of uploaded orders.
///
/// Every read goes to the store; implementations must not cache order state
/// between calls.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_number(&self, number: &str) -> AppResult<Option<Order>>;

    /// Insert a NEW order. Returns `None` when the number is already taken
    /// (by this or any other user); nothing is written in that case.
    async fn insert(&self, number: &str, user_id: Uuid) -> AppResult<Option<Order>>;

    /// Write a new status for a non-terminal order.
    /// Returns `false` when the order is missing or already terminal.
    async fn update_status(&self, number: &str, status: OrderStatus) -> AppResult<bool>;

    /// Mark the order PROCESSED with `accrual` and credit its owner's balance
    /// as one atomic unit. Either both writes land or neither does.
    async fn settle_and_credit(&self, number: &str, accrual: Decimal) -> AppResult<SettleOutcome>;

    /// Orders still awaiting a final accrual decision, oldest upload first.
    async fn list_non_terminal(&self, limit: usize) -> AppResult<Vec<Order>>;

    /// All orders uploaded by a user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>>;
}

/// Durable store of balances and withdrawal records.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Create a zero balance for the user if none exists yet.
    async fn open_balance(&self, user_id: Uuid) -> AppResult<Balance>;

    async fn find_balance(&self, user_id: Uuid) -> AppResult<Option<Balance>>;

    /// Insert the withdrawal record and debit the balance atomically.
    /// Fails with `LedgerError::InsufficientBalance` without writing anything
    /// when the balance at commit time does not cover `amount`.
    async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> AppResult<Withdrawal>;

    /// Withdrawals made by a user, newest first.
    async fn list_withdrawals(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>>;
}
