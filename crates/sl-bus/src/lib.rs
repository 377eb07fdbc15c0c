//! RabbitMQ Publisher
//!
//! Publishes entity snapshots to a durable topic exchange with publisher
//! confirms enabled. `publish` only returns `Ok` once the broker has acked
//! every routing key, which is what lets the sender commit its sent-state
//! transaction afterwards.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::info;

use sl_common::{Result, SyncError};
use sl_sync::{EventPublisher, OutboundEnvelope};

/// Persistent delivery, survives a broker restart.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

pub struct RabbitPublisher {
    channel: Channel,
}

impl RabbitPublisher {
    /// Connects, enables confirms, and declares the durable topic exchange
    /// deliveries are routed through.
    pub async fn connect(uri: &str, exchange: &str) -> Result<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(SyncError::broker)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(SyncError::broker)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(SyncError::broker)?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(SyncError::broker)?;

        info!("Connected to broker, topic exchange {} declared", exchange);
        Ok(Self { channel })
    }
}

fn build_properties(envelope: &OutboundEnvelope) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        "delivery_type".into(),
        AMQPValue::LongString(envelope.delivery_type.into()),
    );
    BasicProperties::default()
        .with_content_type("application/json".into())
        .with_app_id(envelope.app_id.as_str().into())
        .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
        .with_headers(headers)
}

#[async_trait]
impl EventPublisher for RabbitPublisher {
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<()> {
        let properties = build_properties(&envelope);
        for routing_key in &envelope.routing_keys {
            let confirmation = self
                .channel
                .basic_publish(
                    &envelope.exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    &envelope.body,
                    properties.clone(),
                )
                .await
                .map_err(SyncError::broker)?
                .await
                .map_err(SyncError::broker)?;

            if confirmation.is_nack() {
                return Err(SyncError::Broker(format!(
                    "publish nacked for routing key {}",
                    routing_key
                )));
            }
        }
        Ok(())
    }
}
