//! Tenant Settings
//!
//! Key/value settings table holding the registered tenant identifier. The
//! pipeline re-reads it on every run instead of caching, so a completed
//! re-registration takes effect without restarting the worker.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};

use sl_common::Result;
use sl_sync::TenantConfig;

use crate::db_err;

const TENANT_ID_KEY: &str = "tenant_id";

pub struct PgSyncSettings {
    pool: PgPool,
}

impl PgSyncSettings {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantConfig for PgSyncSettings {
    async fn tenant_id(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_settings WHERE key = $1")
            .bind(TENANT_ID_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|row| row.get("value")))
    }
}

/// Upserts the tenant id on the given connection, so registration can make
/// it part of the install transaction.
pub async fn store_tenant_id(conn: &mut PgConnection, tenant_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_settings (key, value) VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
        "#,
    )
    .bind(TENANT_ID_KEY)
    .bind(tenant_id)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}
