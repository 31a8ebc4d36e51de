use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::signal;
use tracing::{error, info};

use dukapay_backend::api::{self, AppState};
use dukapay_backend::config::AppConfig;
use dukapay_backend::database::{init_pool_from_config, PgTransactionStore};
use dukapay_backend::logging::init_tracing;
use dukapay_backend::mpesa::{DarajaClient, TokenManager};
use dukapay_backend::orders::PgOrderProjector;
use dukapay_backend::services::{CallbackProcessor, PaymentService};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "Starting Dukapay backend service"
    );

    let config = AppConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!(e)
    })?;
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!("Initializing database connection pool...");
    let pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!(e)
    })?;

    let tokens = Arc::new(TokenManager::new(config.mpesa.clone())?);
    let gateway = Arc::new(DarajaClient::new(config.mpesa.clone(), tokens)?);
    let store = Arc::new(PgTransactionStore::new(pool.clone()));
    let orders = Arc::new(PgOrderProjector::new(pool.clone()));

    let payments = Arc::new(PaymentService::new(gateway, store, orders));
    let callbacks = Arc::new(CallbackProcessor::new(payments.clone()));

    let state = Arc::new(AppState {
        payments,
        callbacks,
        pool,
    });
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
