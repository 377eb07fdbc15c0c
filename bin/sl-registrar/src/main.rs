//! Syncline Registrar
//!
//! One-shot operator tool for the registration boundary: registers this
//! installation with the remote peer and grants or revokes per-property
//! subscriptions for a consumer. The sync worker refuses non-empty batches
//! until a tenant has been registered here.
//!
//! ## Usage
//!
//! ```text
//! sl-registrar register
//! sl-registrar subscribe <property_id>
//! sl-registrar unsubscribe <property_id>
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SL_DATABASE_URL` | - | PostgreSQL connection URL (required) |
//! | `SL_GATEWAY_URL` | `http://localhost:8080` | Base URL of the registration gateway |
//! | `SL_GATEWAY_TIMEOUT_SECS` | `30` | Request timeout for gateway calls |
//! | `SL_CONSUMER_ID` | `default` | Consumer the subscriptions are granted to |
//! | `RUST_LOG` | `info` | Log level |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sl_registration::{
    HttpGatewayConfig, HttpSyncGateway, PgRegistrationStore, RegistrationService,
};
use sl_store::schema;

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

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);

    let database_url = env_required("SL_DATABASE_URL")?;
    let gateway_url = env_or("SL_GATEWAY_URL", "http://localhost:8080");
    let gateway_timeout_secs: u64 = env_or_parse("SL_GATEWAY_TIMEOUT_SECS", 30);
    let consumer_id = env_or("SL_CONSUMER_ID", "default");

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await?;
    schema::init_schema(&pool).await?;

    let gateway = HttpSyncGateway::new(HttpGatewayConfig {
        base_url: gateway_url.clone(),
        request_timeout: Duration::from_secs(gateway_timeout_secs),
        ..Default::default()
    })?;
    let service = RegistrationService::new(
        Arc::new(gateway),
        Arc::new(PgRegistrationStore::new(pool)),
        consumer_id,
    );

    match command {
        Some("register") => {
            info!("Registering with gateway at {}", gateway_url);
            let tenant_id = service.register().await?;
            info!("Tenant {} installed; delivery state reset", tenant_id);
        }
        Some("subscribe") => {
            let property_id = property_argument(&args)?;
            service.subscribe(property_id).await?;
        }
        Some("unsubscribe") => {
            let property_id = property_argument(&args)?;
            service.unsubscribe(property_id).await?;
        }
        _ => {
            anyhow::bail!("Usage: sl-registrar <register|subscribe|unsubscribe> [property_id]")
        }
    }

    Ok(())
}

fn property_argument(args: &[String]) -> Result<Uuid> {
    let raw = args
        .get(2)
        .ok_or_else(|| anyhow::anyhow!("property_id argument is required"))?;
    Uuid::parse_str(raw).map_err(|e| anyhow::anyhow!("invalid property id {:?}: {}", raw, e))
}
