//! Tenant Registration & Property Subscriptions
//!
//! Local side of the registration boundary. [`RegistrationService`] drives
//! the remote [`SyncGateway`] and keeps the stored tenant id in step with
//! it; subscription calls are rejected locally when no tenant is
//! installed.

pub mod gateway;
pub mod store;

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use sl_common::{Result, SyncError};

pub use gateway::{HttpGatewayConfig, HttpSyncGateway, SyncGateway};
pub use store::{PgRegistrationStore, RegistrationStore};

pub struct RegistrationService {
    gateway: Arc<dyn SyncGateway>,
    store: Arc<dyn RegistrationStore>,
    consumer_id: String,
}

impl RegistrationService {
    pub fn new(
        gateway: Arc<dyn SyncGateway>,
        store: Arc<dyn RegistrationStore>,
        consumer_id: String,
    ) -> Self {
        Self {
            gateway,
            store,
            consumer_id,
        }
    }

    /// Registers with the remote gateway and installs the returned tenant
    /// id. Re-running replaces a previous registration.
    pub async fn register(&self) -> Result<String> {
        let tenant_id = self.gateway.register().await?;
        self.store.install_tenant(&tenant_id).await?;
        info!("Registered tenant {}", tenant_id);
        Ok(tenant_id)
    }

    pub async fn subscribe(&self, property_id: Uuid) -> Result<()> {
        let tenant_id = self.require_tenant().await?;
        self.gateway
            .subscribe(&tenant_id, &self.consumer_id, property_id)
            .await?;
        info!(
            "Subscribed consumer {} to property {}",
            self.consumer_id, property_id
        );
        Ok(())
    }

    pub async fn unsubscribe(&self, property_id: Uuid) -> Result<()> {
        let tenant_id = self.require_tenant().await?;
        self.gateway
            .unsubscribe(&tenant_id, &self.consumer_id, property_id)
            .await?;
        info!(
            "Unsubscribed consumer {} from property {}",
            self.consumer_id, property_id
        );
        Ok(())
    }

    async fn require_tenant(&self) -> Result<String> {
        self.store
            .tenant_id()
            .await?
            .ok_or(SyncError::NotRegistered)
    }
}
