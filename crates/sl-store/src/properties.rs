//! Property Resolution
//!
//! The `types` and `reference_type_ids` columns hold JSON arrays as text;
//! a row that fails to parse is store corruption, not a transient fault.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use sl_common::{ChangeKind, PropertySnapshot, Result, SyncError};
use sl_sync::{EntityStore, SentStateTx};
use sl_values::ValueType;

use crate::db_err;
use crate::sent_state::UuidDeliveryTx;

pub struct PgPropertyStore {
    pool: PgPool,
}

impl PgPropertyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgPropertyStore {
    type Key = Uuid;
    type Snapshot = PropertySnapshot;

    const KIND: ChangeKind = ChangeKind::Property;

    async fn resolve(&self, key: &Uuid) -> Result<Option<PropertySnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, types, reference_type_ids, owner_reference_type_id,
                   content_hash, changed_at
            FROM properties WHERE id = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let types: Vec<ValueType> =
            serde_json::from_str(row.get("types")).map_err(SyncError::serialization)?;
        let reference_type_ids: Vec<Uuid> = match row.get::<Option<&str>, _>("reference_type_ids")
        {
            Some(raw) => serde_json::from_str(raw).map_err(SyncError::serialization)?,
            None => Vec::new(),
        };

        Ok(Some(PropertySnapshot {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            types,
            reference_type_ids,
            owner_reference_type_id: row.get("owner_reference_type_id"),
            content_hash: row.get("content_hash"),
            changed_at: row.get("changed_at"),
        }))
    }

    async fn begin_delivery(&self, key: &Uuid) -> Result<Box<dyn SentStateTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(UuidDeliveryTx::new(
            tx,
            "property_sent_state",
            *key,
        )))
    }
}
