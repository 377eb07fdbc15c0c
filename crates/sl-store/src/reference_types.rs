//! Reference Type Resolution

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use sl_common::{ChangeKind, ReferenceTypeSnapshot, Result};
use sl_sync::{EntityStore, SentStateTx};

use crate::db_err;
use crate::sent_state::UuidDeliveryTx;

pub struct PgReferenceTypeStore {
    pool: PgPool,
}

impl PgReferenceTypeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgReferenceTypeStore {
    type Key = Uuid;
    type Snapshot = ReferenceTypeSnapshot;

    const KIND: ChangeKind = ChangeKind::ReferenceType;

    async fn resolve(&self, key: &Uuid) -> Result<Option<ReferenceTypeSnapshot>> {
        let row = sqlx::query(
            "SELECT id, name, description, content_hash, changed_at FROM reference_types WHERE id = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|row| ReferenceTypeSnapshot {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            content_hash: row.get("content_hash"),
            changed_at: row.get("changed_at"),
        }))
    }

    async fn begin_delivery(&self, key: &Uuid) -> Result<Box<dyn SentStateTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(UuidDeliveryTx::new(
            tx,
            "reference_type_sent_state",
            *key,
        )))
    }
}
