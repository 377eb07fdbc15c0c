//! Record Resolution

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use sl_common::{ChangeKind, RecordSnapshot, Result};
use sl_sync::{EntityStore, SentStateTx};

use crate::db_err;
use crate::sent_state::UuidDeliveryTx;

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgRecordStore {
    type Key = Uuid;
    type Snapshot = RecordSnapshot;

    const KIND: ChangeKind = ChangeKind::Record;

    async fn resolve(&self, key: &Uuid) -> Result<Option<RecordSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, deletion_mark, reference_type_id, content_hash, changed_at
            FROM records WHERE id = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|row| RecordSnapshot {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            deletion_mark: row.get("deletion_mark"),
            reference_type_id: row.get("reference_type_id"),
            content_hash: row.get("content_hash"),
            changed_at: row.get("changed_at"),
        }))
    }

    async fn begin_delivery(&self, key: &Uuid) -> Result<Box<dyn SentStateTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(UuidDeliveryTx::new(tx, "record_sent_state", *key)))
    }
}
