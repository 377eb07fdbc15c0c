//! Syncline Sync Worker
//!
//! Periodically drains the entity change log and delivers deduplicated
//! snapshots to the message bus. Requires a registered tenant (see
//! `sl-registrar`); until one is installed, non-empty batches are rejected
//! and retried on the next poll.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SL_DATABASE_URL` | - | PostgreSQL connection URL (required) |
//! | `SL_AMQP_URL` | - | RabbitMQ connection URI (required) |
//! | `SL_EXCHANGE` | `syncline.entities` | Topic exchange deliveries are published to |
//! | `SL_POLL_INTERVAL_MS` | `1000` | Poll interval in milliseconds |
//! | `SL_BATCH_SIZE` | `5000` | Max change-log entries per run (capped at 5000) |
//! | `SL_HEALTH_PORT` | `9090` | Health/metrics port |
//! | `RUST_LOG` | `info` | Log level |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sl_bus::RabbitPublisher;
use sl_store::{
    schema, PgChangeLogStore, PgPropertyStore, PgRecordStore, PgReferenceTypeStore,
    PgSyncSettings, PgValueStore,
};
use sl_sync::{
    ChangeSender, EntitySender, EventPublisher, SyncPipeline, SyncWorker, MAX_BATCH_SIZE,
};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} environment variable is required", key))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting Syncline Sync Worker");

    let database_url = env_required("SL_DATABASE_URL")?;
    let amqp_url = env_required("SL_AMQP_URL")?;
    let exchange = env_or("SL_EXCHANGE", "syncline.entities");
    let poll_interval_ms: u64 = env_or_parse("SL_POLL_INTERVAL_MS", 1000);
    let batch_size: u32 = env_or_parse("SL_BATCH_SIZE", MAX_BATCH_SIZE);
    let health_port: u16 = env_or_parse("SL_HEALTH_PORT", 9090);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await?;
    schema::init_schema(&pool).await?;
    info!("Store initialized");

    let publisher: Arc<dyn EventPublisher> =
        Arc::new(RabbitPublisher::connect(&amqp_url, &exchange).await?);
    info!("Publisher initialized, exchange: {}", exchange);

    let senders: Vec<Arc<dyn ChangeSender>> = vec![
        Arc::new(EntitySender::new(
            Arc::new(PgReferenceTypeStore::new(pool.clone())),
            Arc::clone(&publisher),
        )),
        Arc::new(EntitySender::new(
            Arc::new(PgRecordStore::new(pool.clone())),
            Arc::clone(&publisher),
        )),
        Arc::new(EntitySender::new(
            Arc::new(PgPropertyStore::new(pool.clone())),
            Arc::clone(&publisher),
        )),
        Arc::new(EntitySender::new(
            Arc::new(PgValueStore::new(pool.clone())),
            Arc::clone(&publisher),
        )),
    ];

    let pipeline = SyncPipeline::new(
        Arc::new(PgChangeLogStore::new(pool.clone())),
        Arc::new(PgSyncSettings::new(pool.clone())),
        senders,
        exchange,
        batch_size,
    );
    let worker = SyncWorker::new(pipeline, Duration::from_millis(poll_interval_ms));

    let worker_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = worker.start() => {}
                _ = shutdown_rx.recv() => {
                    info!("Sync worker shutting down");
                }
            }
        })
    };

    let health_addr = SocketAddr::from(([0, 0, 0, 0], health_port));
    info!("Health server listening on http://{}/health", health_addr);

    let health_app = axum::Router::new()
        .route("/health", axum::routing::get(health_handler))
        .route("/ready", axum::routing::get(ready_handler))
        .route("/metrics", axum::routing::get(metrics_handler));

    let health_listener = tokio::net::TcpListener::bind(health_addr).await?;
    let health_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(health_listener, health_app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    info!("Syncline Sync Worker started");
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = worker_handle.await;
        let _ = health_handle.await;
    })
    .await;

    info!("Syncline Sync Worker shutdown complete");
    Ok(())
}

async fn health_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "READY"
    }))
}

async fn metrics_handler() -> String {
    "# HELP syncline_up Sync worker is up\n# TYPE syncline_up gauge\nsyncline_up 1\n".to_string()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
}
