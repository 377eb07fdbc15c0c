//! Registration Gateway
//!
//! RPC boundary to the remote peer: register once to obtain the tenant
//! identifier, then grant or revoke per-property subscriptions for a
//! consumer. Transport and non-2xx failures surface as the `Gateway`
//! error; nothing here touches local state.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use sl_common::{Result, SyncError};

#[async_trait]
pub trait SyncGateway: Send + Sync {
    /// Registers this installation and returns the tenant identifier the
    /// peer assigned to it.
    async fn register(&self) -> Result<String>;

    async fn subscribe(&self, tenant_id: &str, consumer_id: &str, property_id: Uuid)
        -> Result<()>;

    async fn unsubscribe(
        &self,
        tenant_id: &str,
        consumer_id: &str,
        property_id: Uuid,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    tenant_id: String,
}

#[derive(Debug, Serialize)]
struct SubscriptionRequest<'a> {
    tenant_id: &'a str,
    consumer_id: &'a str,
    property_id: Uuid,
}

pub struct HttpSyncGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSyncGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(SyncError::gateway)?;

        Ok(Self {
            base_url: config.base_url,
            client,
        })
    }

    async fn post_subscription(
        &self,
        endpoint: &str,
        request: &SubscriptionRequest<'_>,
    ) -> Result<()> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("Sending subscription request to {}", url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(SyncError::gateway)?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Gateway(format!("HTTP {}: {}", status, body)))
}

#[async_trait]
impl SyncGateway for HttpSyncGateway {
    async fn register(&self) -> Result<String> {
        let url = format!("{}/register", self.base_url);
        debug!("Registering at {}", url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(SyncError::gateway)?;
        let response = check_status(response).await?;
        let body: RegisterResponse = response.json().await.map_err(SyncError::gateway)?;
        Ok(body.tenant_id)
    }

    async fn subscribe(
        &self,
        tenant_id: &str,
        consumer_id: &str,
        property_id: Uuid,
    ) -> Result<()> {
        self.post_subscription(
            "/subscriptions",
            &SubscriptionRequest {
                tenant_id,
                consumer_id,
                property_id,
            },
        )
        .await
    }

    async fn unsubscribe(
        &self,
        tenant_id: &str,
        consumer_id: &str,
        property_id: Uuid,
    ) -> Result<()> {
        self.post_subscription(
            "/subscriptions/remove",
            &SubscriptionRequest {
                tenant_id,
                consumer_id,
                property_id,
            },
        )
        .await
    }
}
