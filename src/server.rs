use anyhow::Context;
use axum::{
    Router, routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    trace::TraceLayer,
};
use tracing::info;
use crate::api::handler::{
    AppState, get_balance, health_check, list_orders, list_withdrawals, upload_order, withdraw,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest("/api/user",
            Router::new()
                .route("/orders", post(upload_order).get(list_orders))
                .route("/balance", get(get_balance))
                .route("/balance/withdraw", post(withdraw))
                .route("/withdrawals", get(list_withdrawals))
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests
pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server error")?;

    info!("✓ HTTP server stopped");
    Ok(())
}
