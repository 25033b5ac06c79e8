use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppResult, LedgerError, OrderError};
use crate::ledger::{is_valid_order_number, is_whole_cents, LedgerRepository, OrderRepository, Withdrawal};

/// Spendable points and the running total already spent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSummary {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

/// Spends points from a user's balance against one of their orders
pub struct WithdrawalService {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<dyn LedgerRepository>,
}

impl WithdrawalService {
    pub fn new(orders: Arc<dyn OrderRepository>, ledger: Arc<dyn LedgerRepository>) -> Self {
        Self { orders, ledger }
    }

    pub async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> AppResult<Withdrawal> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount).into());
        }
        // Balances and withdrawals are stored in whole cents
        if !is_whole_cents(amount) {
            return Err(LedgerError::SubCentAmount(amount).into());
        }
        if !is_valid_order_number(order_number) {
            return Err(OrderError::InvalidNumber(order_number.to_string()).into());
        }

        let order = self
            .orders
            .find_by_number(order_number)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_number.to_string()))?;
        if order.user_id != user_id {
            return Err(OrderError::NotOwned(order_number.to_string()).into());
        }

        let available = self
            .ledger
            .find_balance(user_id)
            .await?
            .map(|b| b.current)
            .unwrap_or(Decimal::ZERO);
        if amount > available {
            warn!(user = %user_id, %amount, %available, "Withdrawal refused, insufficient balance");
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            }
            .into());
        }

        // The store re-checks the balance under its own lock / row lock
        let withdrawal = self.ledger.withdraw(user_id, order_number, amount).await?;
        info!(user = %user_id, order = %order_number, %amount, "💸 Withdrawal recorded");

        Ok(withdrawal)
    }

    pub async fn withdrawals(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>> {
        self.ledger.list_withdrawals(user_id).await
    }

    pub async fn summary(&self, user_id: Uuid) -> AppResult<BalanceSummary> {
        let current = self
            .ledger
            .find_balance(user_id)
            .await?
            .map(|b| b.current)
            .unwrap_or(Decimal::ZERO);
        let withdrawn: Decimal = self
            .ledger
            .list_withdrawals(user_id)
            .await?
            .iter()
            .map(|w| w.amount)
            .sum();

        Ok(BalanceSummary { current, withdrawn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::ledger::MemoryRepository;
    use rust_decimal_macros::dec;

    async fn setup(balance: Decimal) -> (Arc<MemoryRepository>, WithdrawalService, Uuid) {
        let repo = Arc::new(MemoryRepository::new());
        let user = Uuid::new_v4();
        repo.put_balance(user, balance);
        repo.insert("2377225624", user).await.unwrap();
        let service = WithdrawalService::new(repo.clone(), repo.clone());
        (repo, service, user)
    }

    #[tokio::test]
    async fn test_over_withdrawal_then_exact_withdrawal() {
        let (repo, service, user) = setup(dec!(500)).await;

        let err = service.withdraw(user, "2377225624", dec!(600)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Ledger(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(repo.find_balance(user).await.unwrap().unwrap().current, dec!(500));
        assert!(service.withdrawals(user).await.unwrap().is_empty());

        let withdrawal = service.withdraw(user, "2377225624", dec!(500)).await.unwrap();
        assert_eq!(withdrawal.amount, dec!(500));
        assert_eq!(withdrawal.order_number, "2377225624");
        assert_eq!(repo.find_balance(user).await.unwrap().unwrap().current, dec!(0));

        let history = service.withdrawals(user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, dec!(500));

        let summary = service.summary(user).await.unwrap();
        assert_eq!(summary.current, dec!(0));
        assert_eq!(summary.withdrawn, dec!(500));
    }

    #[tokio::test]
    async fn test_unknown_and_foreign_orders_rejected() {
        let (repo, service, user) = setup(dec!(500)).await;
        let other = Uuid::new_v4();
        repo.insert("79927398713", other).await.unwrap();

        let err = service.withdraw(user, "12345678903", dec!(10)).await.unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::NotFound(_))));

        let err = service.withdraw(user, "79927398713", dec!(10)).await.unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::NotOwned(_))));

        assert_eq!(repo.find_balance(user).await.unwrap().unwrap().current, dec!(500));
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let (_, service, user) = setup(dec!(500)).await;

        let err = service.withdraw(user, "2377225624", dec!(0)).await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::NonPositiveAmount(_))));

        let err = service.withdraw(user, "2377225624", dec!(-1)).await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::NonPositiveAmount(_))));

        let err = service.withdraw(user, "2377225625", dec!(1)).await.unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::InvalidNumber(_))));
    }

    #[tokio::test]
    async fn test_sub_cent_sum_rejected_without_mutation() {
        let (repo, service, user) = setup(dec!(500)).await;

        for sum in [dec!(0.005), dec!(0.004), dec!(10.001)] {
            let err = service.withdraw(user, "2377225624", sum).await.unwrap_err();
            assert!(matches!(err, AppError::Ledger(LedgerError::SubCentAmount(_))));
            assert!(err.is_rejection());
        }

        assert_eq!(repo.find_balance(user).await.unwrap().unwrap().current, dec!(500));
        assert!(service.withdrawals(user).await.unwrap().is_empty());

        // Trailing zeros are still whole cents
        let withdrawal = service.withdraw(user, "2377225624", dec!(0.010)).await.unwrap();
        assert_eq!(withdrawal.amount, dec!(0.01));
        assert_eq!(repo.find_balance(user).await.unwrap().unwrap().current, dec!(499.99));

        let summary = service.summary(user).await.unwrap();
        assert_eq!(summary.current + summary.withdrawn, dec!(500));
    }

    #[tokio::test]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let (repo, service, user) = setup(dec!(500)).await;
        let service = Arc::new(service);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.withdraw(user, "2377225624", dec!(200)).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 2);
        assert_eq!(repo.find_balance(user).await.unwrap().unwrap().current, dec!(100));
    }
}
