//! Registration Store
//!
//! Registering replaces the remote peer, so the recorded sent hashes and
//! the accumulated change backlog no longer describe it. The install
//! therefore runs as one transaction: upsert the tenant id, drop the
//! backlog, clear the sent state. Every entity is delivered fresh on its
//! next mutation; at-least-once delivery tolerates the re-sends.

use async_trait::async_trait;
use sqlx::PgPool;

use sl_common::{Result, SyncError};
use sl_store::{change_log, sent_state, settings, PgSyncSettings};
use sl_sync::TenantConfig;

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Currently installed tenant id, if any.
    async fn tenant_id(&self) -> Result<Option<String>>;

    /// Installs a tenant id and resets delivery state atomically.
    async fn install_tenant(&self, tenant_id: &str) -> Result<()>;
}

pub struct PgRegistrationStore {
    pool: PgPool,
    settings: PgSyncSettings,
}

impl PgRegistrationStore {
    pub fn new(pool: PgPool) -> Self {
        let settings = PgSyncSettings::new(pool.clone());
        Self { pool, settings }
    }
}

#[async_trait]
impl RegistrationStore for PgRegistrationStore {
    async fn tenant_id(&self) -> Result<Option<String>> {
        self.settings.tenant_id().await
    }

    async fn install_tenant(&self, tenant_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(SyncError::store)?;
        settings::store_tenant_id(&mut tx, tenant_id).await?;
        change_log::purge_with(&mut tx, i64::MAX).await?;
        sent_state::reset_all(&mut tx).await?;
        tx.commit().await.map_err(SyncError::store)?;
        Ok(())
    }
}
