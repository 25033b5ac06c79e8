use std::{sync::Arc, time::Duration};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};

use crate::{
    accrual::HttpAccrualClient,
    api::handler::AppState,
    config::Config,
    error::AppResult,
    ledger::{LedgerRepository, MemoryRepository, OrderRepository, PgRepository},
    orders::OrderService,
    settlement::ReconciliationScheduler,
    withdrawal::WithdrawalService,
};

/// Everything `main` needs to run and later shut down
pub struct Application {
    pub state: AppState,
    pub scheduler: ReconciliationScheduler,
    /// Present when running against Postgres; closed after the scheduler stops
    pub database: Option<Arc<PgRepository>>,
}

pub async fn initialize_application(config: &Config) -> AppResult<Application> {
    info!("Initializing application components ...");

    let (orders, ledger, database): (
        Arc<dyn OrderRepository>,
        Arc<dyn LedgerRepository>,
        Option<Arc<PgRepository>>,
    ) = match config.database_uri() {
        Some(uri) => {
            let pool = initialize_database(uri).await?;
            let repo = Arc::new(PgRepository::new(pool));
            let orders: Arc<dyn OrderRepository> = repo.clone();
            let ledger: Arc<dyn LedgerRepository> = repo.clone();
            (orders, ledger, Some(repo))
        }
        None => {
            warn!("⚠️  DATABASE_URI not set - using in-memory store, data is lost on exit");
            let repo = Arc::new(MemoryRepository::new());
            let orders: Arc<dyn OrderRepository> = repo.clone();
            let ledger: Arc<dyn LedgerRepository> = repo;
            (orders, ledger, None)
        }
    };

    let client = Arc::new(HttpAccrualClient::new(
        &config.accrual_system_address,
        config.request_timeout(),
    )?);
    info!("✅ Accrual client configured for {}", config.accrual_system_address);

    let scheduler = ReconciliationScheduler::new(config.scheduler(), orders.clone(), client);
    let state = build_state(orders, ledger);

    info!("✓ Application components ready");
    Ok(Application {
        state,
        scheduler,
        database,
    })
}

pub fn build_state(orders: Arc<dyn OrderRepository>, ledger: Arc<dyn LedgerRepository>) -> AppState {
    AppState {
        orders: Arc::new(OrderService::new(orders.clone())),
        withdrawals: Arc::new(WithdrawalService::new(orders, ledger.clone())),
        ledger,
    }
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
