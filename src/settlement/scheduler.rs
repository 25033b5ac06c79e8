// Reconciliation scheduler - drives pending orders towards a terminal status
//
// Each cycle:
// - Pulls a bounded batch of non-terminal orders, oldest first
// - Looks each one up in the accrual service, one order at a time
// - Hands final or intermediate answers to the settlement coordinator
// - Backs off on 429 / transient failures, up to `max_retries` lookups per order
//
// Nothing here is fatal. Failures are logged and the order waits for the next cycle.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accrual::{AccrualClient, AccrualOutcome};
use crate::ledger::{Order, OrderRepository};
use crate::settlement::coordinator::{SettlementCoordinator, SettlementEffect};

/// Polling and retry knobs, fixed at startup
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum spacing between cycles, and the wait after an empty batch
    pub poll_interval: Duration,
    /// Accrual lookups allowed per order per cycle
    pub max_retries: u32,
    /// Wait used for 5xx and for a 429 without `Retry-After`
    pub default_backoff: Duration,
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_retries: 3,
            default_backoff: Duration::from_secs(10),
            batch_size: 100,
        }
    }
}

/// How one order fared within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderProgress {
    Applied(SettlementEffect),
    /// Retry budget spent on rate limits / transient failures
    Abandoned,
    /// Coordinator or store failure; retried next cycle
    Failed,
    Cancelled,
}

/// Per-cycle counters, mostly for logs and tests
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub applied: usize,
    pub abandoned: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct ReconciliationScheduler {
    config: SchedulerConfig,
    orders: Arc<dyn OrderRepository>,
    client: Arc<dyn AccrualClient>,
    coordinator: SettlementCoordinator,
}

impl ReconciliationScheduler {
    pub fn new(
        config: SchedulerConfig,
        orders: Arc<dyn OrderRepository>,
        client: Arc<dyn AccrualClient>,
    ) -> Self {
        let coordinator = SettlementCoordinator::new(orders.clone());
        Self {
            config,
            orders,
            client,
            coordinator,
        }
    }

    /// Start the scheduler (runs in background until `token` is cancelled).
    /// The returned handle completes once the loop has fully stopped.
    pub fn start(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    async fn run(&self, token: CancellationToken) {
        info!(
            poll_interval = ?self.config.poll_interval,
            max_retries = self.config.max_retries,
            batch_size = self.config.batch_size,
            "⏰ Reconciliation scheduler started"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_cycle(&token).await;
            if report.cancelled {
                break;
            }
            if report.fetched > 0 {
                info!(
                    fetched = report.fetched,
                    applied = report.applied,
                    abandoned = report.abandoned,
                    failed = report.failed,
                    "✓ Reconciliation cycle completed"
                );
            }
        }

        info!("🛑 Reconciliation scheduler stopped");
    }

    /// One pass over a batch of pending orders
    pub async fn run_cycle(&self, token: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();

        let batch = match self.orders.list_non_terminal(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "❌ Failed to fetch pending orders");
                return report;
            }
        };

        if batch.is_empty() {
            debug!("No pending orders");
            report.cancelled = !sleep_or_cancel(self.config.poll_interval, token).await;
            return report;
        }

        report.fetched = batch.len();
        info!(count = batch.len(), "🔄 Reconciling pending orders");

        for order in &batch {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.process_order(order, token).await {
                OrderProgress::Applied(_) => report.applied += 1,
                OrderProgress::Abandoned => report.abandoned += 1,
                OrderProgress::Failed => report.failed += 1,
                OrderProgress::Cancelled => {
                    report.cancelled = true;
                    break;
                }
            }
        }

        report
    }

    /// Bounded retry loop for one order: at most `max_retries` lookups.
    pub async fn process_order(&self, order: &Order, token: &CancellationToken) -> OrderProgress {
        let max_retries = self.config.max_retries.max(1);

        for attempt in 1..=max_retries {
            let outcome = self.client.lookup(&order.number).await;

            let wait = match &outcome {
                AccrualOutcome::RateLimited { retry_after } => {
                    let wait = retry_after.unwrap_or(self.config.default_backoff);
                    warn!(order = %order.number, attempt, ?wait, "Accrual service rate limited");
                    wait
                }
                AccrualOutcome::TransientFailure => {
                    warn!(order = %order.number, attempt, "Accrual lookup failed, backing off");
                    if attempt == max_retries {
                        break;
                    }
                    self.config.default_backoff
                }
                AccrualOutcome::Settled { .. } | AccrualOutcome::Unknown => {
                    return match self.coordinator.apply(order, &outcome).await {
                        Ok(effect) => OrderProgress::Applied(effect),
                        Err(e) => {
                            error!(order = %order.number, error = %e, "Settlement deferred to next cycle");
                            OrderProgress::Failed
                        }
                    };
                }
            };

            // A rate-limit wait is honoured even after the last attempt
            if !sleep_or_cancel(wait, token).await {
                return OrderProgress::Cancelled;
            }
        }

        debug!(order = %order.number, max_retries, "Retry budget spent, order left for next cycle");
        OrderProgress::Abandoned
    }
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::MockAccrualClient;
    use crate::ledger::{LedgerRepository, MemoryRepository, OrderStatus};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn fast_config(max_retries: u32) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            max_retries,
            default_backoff: Duration::from_millis(1),
            batch_size: 10,
        }
    }

    #[tokio::test]
    async fn test_rate_limited_order_is_looked_up_exactly_max_retries_times() {
        let repo = Arc::new(MemoryRepository::new());
        let user = Uuid::new_v4();
        repo.insert("79927398713", user).await.unwrap();

        let mut client = MockAccrualClient::new();
        client.expect_lookup().times(3).returning(|_| AccrualOutcome::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        });

        let scheduler = ReconciliationScheduler::new(fast_config(3), repo.clone(), Arc::new(client));
        let report = scheduler.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.fetched, 1);
        assert_eq!(report.abandoned, 1);
        let stored = repo.find_by_number("79927398713").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::New);
    }

    fn slow_backoff_config(max_retries: u32) -> SchedulerConfig {
        SchedulerConfig {
            default_backoff: Duration::from_secs(30),
            ..fast_config(max_retries)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_stop_at_max_retries_without_trailing_backoff() {
        let repo = Arc::new(MemoryRepository::new());
        let order = repo.insert("79927398713", Uuid::new_v4()).await.unwrap().unwrap();

        let mut client = MockAccrualClient::new();
        client
            .expect_lookup()
            .times(3)
            .returning(|_| AccrualOutcome::TransientFailure);

        let scheduler =
            ReconciliationScheduler::new(slow_backoff_config(3), repo.clone(), Arc::new(client));
        let started = tokio::time::Instant::now();
        let progress = scheduler.process_order(&order, &CancellationToken::new()).await;

        assert!(matches!(progress, OrderProgress::Abandoned));
        // Backoff between attempts only: two waits for three lookups
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        let stored = repo.find_by_number("79927398713").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::New);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_without_retry_after_waits_default_backoff() {
        let repo = Arc::new(MemoryRepository::new());
        let order = repo.insert("79927398713", Uuid::new_v4()).await.unwrap().unwrap();

        let mut client = MockAccrualClient::new();
        client
            .expect_lookup()
            .times(2)
            .returning(|_| AccrualOutcome::RateLimited { retry_after: None });

        let scheduler =
            ReconciliationScheduler::new(slow_backoff_config(2), repo.clone(), Arc::new(client));
        let started = tokio::time::Instant::now();
        let progress = scheduler.process_order(&order, &CancellationToken::new()).await;

        assert!(matches!(progress, OrderProgress::Abandoned));
        // Every rate-limited attempt waits, including the last one
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_transient_failure_then_settlement() {
        let repo = Arc::new(MemoryRepository::new());
        let user = Uuid::new_v4();
        repo.open_balance(user).await.unwrap();
        repo.insert("79927398713", user).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut client = MockAccrualClient::new();
        client.expect_lookup().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                AccrualOutcome::TransientFailure
            } else {
                AccrualOutcome::Settled {
                    status: OrderStatus::Processed,
                    accrual: Some(dec!(500)),
                }
            }
        });

        let scheduler = ReconciliationScheduler::new(fast_config(3), repo.clone(), Arc::new(client));
        let report = scheduler.run_cycle(&CancellationToken::new()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.applied, 1);
        assert_eq!(repo.find_balance(user).await.unwrap().unwrap().current, dec!(500));
    }

    #[tokio::test]
    async fn test_cycle_settles_and_invalidates_orders() {
        let repo = Arc::new(MemoryRepository::new());
        let user = Uuid::new_v4();
        repo.open_balance(user).await.unwrap();
        repo.insert("79927398713", user).await.unwrap();
        repo.insert("12345678903", user).await.unwrap();

        let mut client = MockAccrualClient::new();
        client.expect_lookup().times(2).returning(|number| match number {
            "79927398713" => AccrualOutcome::Settled {
                status: OrderStatus::Processed,
                accrual: Some(dec!(500)),
            },
            _ => AccrualOutcome::Unknown,
        });

        let scheduler = ReconciliationScheduler::new(fast_config(3), repo.clone(), Arc::new(client));
        let report = scheduler.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.applied, 2);

        let settled = repo.find_by_number("79927398713").await.unwrap().unwrap();
        assert_eq!(settled.status, OrderStatus::Processed);
        assert_eq!(settled.accrual, Some(dec!(500)));
        let invalid = repo.find_by_number("12345678903").await.unwrap().unwrap();
        assert_eq!(invalid.status, OrderStatus::Invalid);
        assert_eq!(repo.find_balance(user).await.unwrap().unwrap().current, dec!(500));

        // Both orders are terminal now; a further cycle has nothing to do
        let report = scheduler.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.fetched, 0);
        assert_eq!(repo.find_balance(user).await.unwrap().unwrap().current, dec!(500));
    }

    #[tokio::test]
    async fn test_cancelled_cycle_makes_no_lookups() {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert("79927398713", Uuid::new_v4()).await.unwrap();

        let mut client = MockAccrualClient::new();
        client.expect_lookup().never();

        let token = CancellationToken::new();
        token.cancel();

        let scheduler = ReconciliationScheduler::new(fast_config(3), repo, Arc::new(client));
        let report = scheduler.run_cycle(&token).await;
        assert!(report.cancelled);
        assert_eq!(report.applied, 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert("79927398713", Uuid::new_v4()).await.unwrap();

        let mut client = MockAccrualClient::new();
        client.expect_lookup().times(1).returning(|_| AccrualOutcome::RateLimited {
            retry_after: Some(Duration::from_secs(3600)),
        });

        let scheduler = ReconciliationScheduler::new(fast_config(3), repo, Arc::new(client));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let report = tokio::time::timeout(Duration::from_secs(5), scheduler.run_cycle(&token))
            .await
            .unwrap();
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_started_scheduler_stops_on_cancel() {
        let repo = Arc::new(MemoryRepository::new());
        let mut client = MockAccrualClient::new();
        client.expect_lookup().never();

        let config = SchedulerConfig {
            poll_interval: Duration::from_secs(3600),
            ..fast_config(3)
        };
        let token = CancellationToken::new();
        let handle = ReconciliationScheduler::new(config, repo, Arc::new(client)).start(token.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
