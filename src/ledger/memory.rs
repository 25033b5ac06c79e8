use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use super::models::*;
use super::repository::{LedgerRepository, OrderRepository};
use crate::error::{AppResult, LedgerError};

#[derive(Default)]
struct MemoryState {
    orders: HashMap<String, Order>,
    balances: HashMap<Uuid, Balance>,
    withdrawals: Vec<Withdrawal>,
}

/// In-process store used when no database is configured, and by tests.
///
/// A single lock guards orders, balances and withdrawals together, which is
/// what makes `settle_and_credit` and `withdraw` atomic here. The lock is never
/// held across an await point.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an order directly, bypassing upload rules
    #[cfg(test)]
    pub fn put_order(&self, order: Order) {
        self.state.lock().orders.insert(order.number.clone(), order);
    }

    /// Seed a balance directly
    #[cfg(test)]
    pub fn put_balance(&self, user_id: Uuid, current: Decimal) {
        self.state.lock().balances.insert(
            user_id,
            Balance {
                user_id,
                current,
                updated_at: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl OrderRepository for MemoryRepository {
    async fn find_by_number(&self, number: &str) -> AppResult<Option<Order>> {
        Ok(self.state.lock().orders.get(number).cloned())
    }

    async fn insert(&self, number: &str, user_id: Uuid) -> AppResult<Option<Order>> {
        let mut state = self.state.lock();
        if state.orders.contains_key(number) {
            return Ok(None);
        }

        let order = Order::new(number, user_id);
        state.orders.insert(number.to_string(), order.clone());
        Ok(Some(order))
    }

    async fn update_status(&self, number: &str, status: OrderStatus) -> AppResult<bool> {
        let mut state = self.state.lock();
        match state.orders.get_mut(number) {
            Some(order) if !order.is_terminal() => {
                order.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn settle_and_credit(&self, number: &str, accrual: Decimal) -> AppResult<SettleOutcome> {
        let mut state = self.state.lock();

        let user_id = match state.orders.get_mut(number) {
            Some(order) if !order.is_terminal() => {
                order.status = OrderStatus::Processed;
                order.accrual = Some(accrual);
                order.user_id
            }
            _ => return Ok(SettleOutcome::AlreadyTerminal),
        };

        let balance = state
            .balances
            .entry(user_id)
            .or_insert_with(|| Balance::zero(user_id));
        balance.current += accrual;
        balance.updated_at = Utc::now();

        Ok(SettleOutcome::Credited {
            user_id,
            amount: accrual,
        })
    }

    async fn list_non_terminal(&self, limit: usize) -> AppResult<Vec<Order>> {
        let state = self.state.lock();
        let mut pending: Vec<Order> = state
            .orders
            .values()
            .filter(|o| !o.is_terminal())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let state = self.state.lock();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }
}

#[async_trait]
impl LedgerRepository for MemoryRepository {
    async fn open_balance(&self, user_id: Uuid) -> AppResult<Balance> {
        let mut state = self.state.lock();
        Ok(state
            .balances
            .entry(user_id)
            .or_insert_with(|| Balance::zero(user_id))
            .clone())
    }

    async fn find_balance(&self, user_id: Uuid) -> AppResult<Option<Balance>> {
        Ok(self.state.lock().balances.get(&user_id).cloned())
    }

    async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> AppResult<Withdrawal> {
        let mut state = self.state.lock();

        let available = state
            .balances
            .get(&user_id)
            .map(|b| b.current)
            .unwrap_or(Decimal::ZERO);

        let Some(balance) = state.balances.get_mut(&user_id).filter(|b| b.covers(amount)) else {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            }
            .into());
        };

        balance.current -= amount;
        balance.updated_at = Utc::now();

        let withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            order_number: order_number.to_string(),
            amount,
            processed_at: Utc::now(),
        };
        state.withdrawals.push(withdrawal.clone());

        Ok(withdrawal)
    }

    async fn list_withdrawals(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>> {
        let state = self.state.lock();
        // Pushed in processing order, so reversing gives newest first
        Ok(state
            .withdrawals
            .iter()
            .rev()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}
