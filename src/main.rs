mod error;
mod accrual;
mod api;
mod ledger;
mod orders;
mod settlement;
mod withdrawal;
mod server;
mod bootstrap;
mod middleware;
mod config;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::{error, info};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,points_ledger=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("❌ Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting points ledger");

    let config = config::Config::from_env().context("invalid configuration")?;
    let app = bootstrap::initialize_application(&config)
        .await
        .context("failed to initialize application")?;

    let shutdown = CancellationToken::new();
    let scheduler = app.scheduler.start(shutdown.child_token());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("🛑 Shutdown signal received");
        signal_token.cancel();
    });

    let router = server::create_app(app.state).await;
    let served = server::run_server(router, &config.run_address, shutdown.clone()).await;

    // Stop the scheduler even if the server failed, and wait for it before the pool goes away
    shutdown.cancel();
    if let Err(e) = scheduler.await {
        error!("❌ Reconciliation task ended abnormally: {}", e);
    }

    if let Some(database) = app.database {
        database.close().await;
    }

    served?;
    info!("👋 Shutdown complete");
    Ok(())
}
