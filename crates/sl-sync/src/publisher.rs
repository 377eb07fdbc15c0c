use async_trait::async_trait;
use sl_common::Result;

/// A serialized entity snapshot ready for the broker.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    pub exchange: String,
    /// The body is published once per routing key.
    pub routing_keys: Vec<String>,
    /// Kind tag carried in the `delivery_type` header.
    pub delivery_type: &'static str,
    /// Tenant identifier carried as the AMQP app id.
    pub app_id: String,
    pub body: Vec<u8>,
}

/// Delivery side of the pipeline. Implementations must only return `Ok`
/// once the broker has confirmed the publish; a confirmed-but-unrouted
/// message is the subscriber's concern, not the pipeline's.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<()>;
}
