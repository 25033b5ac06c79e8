use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::accrual::AccrualOutcome;
use crate::error::{AppResult, LedgerError};
use crate::ledger::{round_to_cents, Order, OrderRepository, OrderStatus, SettleOutcome};

/// What applying one accrual outcome did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementEffect {
    /// Order was terminal before we started, nothing written
    AlreadyTerminal,
    /// Order moved to INVALID, no ledger effect
    Invalidated,
    /// Intermediate status persisted
    StatusUpdated(OrderStatus),
    /// Intermediate status equal to the stored one, or not a legal move
    Unchanged,
    /// Order moved to PROCESSED and its owner was credited
    Credited { user_id: Uuid, amount: Decimal },
    /// Another writer finalised the order between our read and our write
    LostRace,
    /// Rate limit or transient failure, nothing to apply
    Deferred,
}

/// Turns accrual outcomes into order and balance mutations.
///
/// An order contributes to a balance at most once: the only credit path is
/// `settle_and_credit`, which refuses terminal orders.
pub struct SettlementCoordinator {
    orders: Arc<dyn OrderRepository>,
}

impl SettlementCoordinator {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    pub async fn apply(&self, order: &Order, outcome: &AccrualOutcome) -> AppResult<SettlementEffect> {
        if order.is_terminal() {
            return Ok(SettlementEffect::AlreadyTerminal);
        }

        match outcome {
            AccrualOutcome::Unknown
            | AccrualOutcome::Settled {
                status: OrderStatus::Invalid,
                ..
            } => self.invalidate(order).await,
            AccrualOutcome::Settled {
                status: OrderStatus::Processed,
                accrual,
            } => self.settle(order, accrual.unwrap_or(Decimal::ZERO)).await,
            AccrualOutcome::Settled { status, .. } => self.advance(order, *status).await,
            AccrualOutcome::RateLimited { .. } | AccrualOutcome::TransientFailure => {
                Ok(SettlementEffect::Deferred)
            }
        }
    }

    async fn invalidate(&self, order: &Order) -> AppResult<SettlementEffect> {
        if self
            .orders
            .update_status(&order.number, OrderStatus::Invalid)
            .await?
        {
            info!(order = %order.number, "❌ Order marked INVALID");
            Ok(SettlementEffect::Invalidated)
        } else {
            Ok(SettlementEffect::LostRace)
        }
    }

    async fn advance(&self, order: &Order, status: OrderStatus) -> AppResult<SettlementEffect> {
        if order.status == status || !order.status.can_transition_to(status) {
            return Ok(SettlementEffect::Unchanged);
        }

        if self.orders.update_status(&order.number, status).await? {
            info!(order = %order.number, from = %order.status, to = %status, "Order status updated");
            Ok(SettlementEffect::StatusUpdated(status))
        } else {
            Ok(SettlementEffect::LostRace)
        }
    }

    async fn settle(&self, order: &Order, accrual: Decimal) -> AppResult<SettlementEffect> {
        if accrual < Decimal::ZERO {
            warn!(order = %order.number, %accrual, "Refusing negative accrual");
            return Err(LedgerError::NegativeAccrual(accrual).into());
        }
        // Credit exactly what the cents column will hold
        let accrual = round_to_cents(accrual);

        match self.orders.settle_and_credit(&order.number, accrual).await {
            Ok(SettleOutcome::Credited { user_id, amount }) => {
                info!(order = %order.number, user = %user_id, %amount, "✅ Order settled and credited");
                Ok(SettlementEffect::Credited { user_id, amount })
            }
            Ok(SettleOutcome::AlreadyTerminal) => Ok(SettlementEffect::LostRace),
            Err(e) => {
                error!(order = %order.number, error = %e, "Settlement unit failed");
                // Park the order in PROCESSING so the next cycle retries it
                if let Err(revert) = self
                    .orders
                    .update_status(&order.number, OrderStatus::Processing)
                    .await
                {
                    error!(order = %order.number, error = %revert, "Failed to revert order to PROCESSING");
                }
                Err(e)
            }
        }
    }
}
