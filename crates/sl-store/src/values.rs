//! Value Resolution
//!
//! Stored payloads are re-validated against their type tag on the way out
//! through the typed value validator, so a snapshot never carries a payload
//! the wire schema could not express.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use sl_common::{ChangeKind, Result, SyncError, ValueKey, ValueSnapshot};
use sl_sync::{EntityStore, SentStateTx};
use sl_values::{decode_value, ValueType};

use crate::db_err;
use crate::sent_state::ValueDeliveryTx;

pub struct PgValueStore {
    pool: PgPool,
}

impl PgValueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgValueStore {
    type Key = ValueKey;
    type Snapshot = ValueSnapshot;

    const KIND: ChangeKind = ChangeKind::Value;

    async fn resolve(&self, key: &ValueKey) -> Result<Option<ValueSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT record_id, property_id, value_type, reference_type_id, payload,
                   content_hash, changed_at
            FROM record_values WHERE record_id = $1 AND property_id = $2
            "#,
        )
        .bind(key.record_id)
        .bind(key.property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let value_type: ValueType = row
            .get::<&str, _>("value_type")
            .parse()
            .map_err(SyncError::serialization)?;
        let raw: serde_json::Value =
            serde_json::from_str(row.get("payload")).map_err(SyncError::serialization)?;
        let payload = decode_value(value_type, &raw).map_err(SyncError::serialization)?;

        Ok(Some(ValueSnapshot {
            record_id: row.get("record_id"),
            property_id: row.get("property_id"),
            value_type,
            reference_type_id: row.get("reference_type_id"),
            payload,
            content_hash: row.get("content_hash"),
            changed_at: row.get("changed_at"),
        }))
    }

    async fn begin_delivery(&self, key: &ValueKey) -> Result<Box<dyn SentStateTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(ValueDeliveryTx::new(tx, *key)))
    }
}
