use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use super::repository::{LedgerRepository, OrderRepository};
use crate::error::{AppError, AppResult, LedgerError};

const ORDER_COLUMNS: &str = "number, user_id, status, accrual, uploaded_at";
const NON_TERMINAL: &str = "('NEW', 'REGISTERED', 'PROCESSING')";

/// Postgres-backed order and ledger store - the source of truth in production
pub struct PgRepository {
    pub pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Close the pool. Call only after the reconciliation task has finished.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("✓ Database pool closed");
    }

    fn order_from_row(row: &PgRow) -> AppResult<Order> {
        let accrual: Option<BigDecimal> = row.try_get("accrual")?;
        Ok(Order {
            number: row.try_get("number")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            accrual: accrual.as_ref().map(from_numeric).transpose()?,
            uploaded_at: row.try_get("uploaded_at")?,
        })
    }

    fn balance_from_row(row: &PgRow) -> AppResult<Balance> {
        let current: BigDecimal = row.try_get("current")?;
        Ok(Balance {
            user_id: row.try_get("user_id")?,
            current: from_numeric(&current)?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn withdrawal_from_row(row: &PgRow) -> AppResult<Withdrawal> {
        let amount: BigDecimal = row.try_get("amount")?;
        Ok(Withdrawal {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            order_number: row.try_get("order_number")?,
            amount: from_numeric(&amount)?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    /// Credit inside an open transaction. Upserts so a credit never depends on
    /// the balance row having been provisioned beforehand.
    async fn credit(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        amount: Decimal,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO balances (user_id, current)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET
                current = balances.current + EXCLUDED.current,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(to_numeric(amount)?)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(AppError::Internal(format!(
                "Credit for user {} touched {} rows",
                user_id,
                result.rows_affected()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgRepository {
    async fn find_by_number(&self, number: &str) -> AppResult<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE number = $1", ORDER_COLUMNS))
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::order_from_row).transpose()
    }

    async fn insert(&self, number: &str, user_id: Uuid) -> AppResult<Option<Order>> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (number, user_id, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (number) DO NOTHING
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(number)
        .bind(user_id)
        .bind(OrderStatus::New)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::order_from_row).transpose()
    }

    async fn update_status(&self, number: &str, status: OrderStatus) -> AppResult<bool> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE orders
            SET status = $2
            WHERE number = $1 AND status IN {}
            "#,
            NON_TERMINAL
        ))
        .bind(number)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn settle_and_credit(&self, number: &str, accrual: Decimal) -> AppResult<SettleOutcome> {
        let mut tx = self.begin_tx().await?;

        // Row lock on the order serialises concurrent settlements of the same number
        let user_id: Option<Uuid> = sqlx::query_scalar(&format!(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3
            WHERE number = $1 AND status IN {}
            RETURNING user_id
            "#,
            NON_TERMINAL
        ))
        .bind(number)
        .bind(OrderStatus::Processed)
        .bind(to_numeric(accrual)?)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            tx.rollback().await?;
            debug!(order = %number, "Order already terminal, skipping credit");
            return Ok(SettleOutcome::AlreadyTerminal);
        };

        // Dropping `tx` on error rolls the status write back
        Self::credit(&mut tx, user_id, accrual).await?;
        tx.commit().await?;

        Ok(SettleOutcome::Credited {
            user_id,
            amount: accrual,
        })
    }

    async fn list_non_terminal(&self, limit: usize) -> AppResult<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM orders
            WHERE status IN {}
            ORDER BY uploaded_at ASC
            LIMIT $1
            "#,
            ORDER_COLUMNS, NON_TERMINAL
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::order_from_row).collect()
    }

    async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::order_from_row).collect()
    }
}

#[async_trait]
impl LedgerRepository for PgRepository {
    async fn open_balance(&self, user_id: Uuid) -> AppResult<Balance> {
        sqlx::query(
            r#"
            INSERT INTO balances (user_id, current)
            VALUES ($1, 0)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.find_balance(user_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Balance for {} vanished", user_id)))
    }

    async fn find_balance(&self, user_id: Uuid) -> AppResult<Option<Balance>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, current, updated_at
            FROM balances
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::balance_from_row).transpose()
    }

    async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: Decimal,
    ) -> AppResult<Withdrawal> {
        let mut tx = self.begin_tx().await?;
        let numeric_amount = to_numeric(amount)?;

        // Guarded debit: the WHERE clause re-checks sufficiency under the row lock
        let debited = sqlx::query(
            r#"
            UPDATE balances
            SET current = current - $2, updated_at = NOW()
            WHERE user_id = $1 AND current >= $2
            "#,
        )
        .bind(user_id)
        .bind(numeric_amount.clone())
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() == 0 {
            tx.rollback().await?;
            let available = self
                .find_balance(user_id)
                .await?
                .map(|b| b.current)
                .unwrap_or(Decimal::ZERO);
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            }
            .into());
        }

        let row = sqlx::query(
            r#"
            INSERT INTO withdrawals (id, user_id, order_number, amount, processed_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, order_number, amount, processed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(order_number)
        .bind(numeric_amount)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        let withdrawal = Self::withdrawal_from_row(&row)?;
        tx.commit().await?;

        Ok(withdrawal)
    }

    async fn list_withdrawals(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, order_number, amount, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::withdrawal_from_row).collect()
    }
}

fn to_numeric(value: Decimal) -> AppResult<BigDecimal> {
    BigDecimal::from_str(&value.to_string())
        .map_err(|e| AppError::Internal(format!("Decimal conversion error: {}", e)))
}

fn from_numeric(value: &BigDecimal) -> AppResult<Decimal> {
    let text = value.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(AppError::from)
}
