//! Sent-State Delivery Transactions
//!
//! One transaction per delivered entity. `get_for_update` takes the row
//! lock that serializes concurrent deliveries of the same identity; the
//! upsert only becomes visible on commit, which the sender issues after a
//! confirmed publish.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Postgres, Row, Transaction};
use uuid::Uuid;

use sl_common::{Result, SentState, ValueKey};
use sl_sync::SentStateTx;

use crate::db_err;

const SENT_STATE_TABLES: [&str; 4] = [
    "reference_type_sent_state",
    "record_sent_state",
    "property_sent_state",
    "value_sent_state",
];

fn sent_state_from_row(row: &PgRow) -> SentState {
    SentState {
        sum: row.get("sum"),
        sent_at: row.get("sent_at"),
    }
}

/// Clears every sent-state table on the given connection. Used when a
/// registration replaces the remote peer and all entities must be
/// delivered fresh.
pub async fn reset_all(conn: &mut PgConnection) -> Result<()> {
    for table in SENT_STATE_TABLES {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
    }
    Ok(())
}

/// Delivery transaction for the three kinds keyed by a single UUID.
pub(crate) struct UuidDeliveryTx {
    tx: Transaction<'static, Postgres>,
    table: &'static str,
    id: Uuid,
}

impl UuidDeliveryTx {
    pub(crate) fn new(tx: Transaction<'static, Postgres>, table: &'static str, id: Uuid) -> Self {
        Self { tx, table, id }
    }
}

#[async_trait]
impl SentStateTx for UuidDeliveryTx {
    async fn get_for_update(&mut self) -> Result<Option<SentState>> {
        let row = sqlx::query(&format!(
            "SELECT sum, sent_at FROM {} WHERE id = $1 FOR UPDATE",
            self.table
        ))
        .bind(self.id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.as_ref().map(sent_state_from_row))
    }

    async fn set_sent_state(&mut self, sum: &str, sent_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, sum, sent_at) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET sum = EXCLUDED.sum, sent_at = EXCLUDED.sent_at
            "#,
            self.table
        ))
        .bind(self.id)
        .bind(sum)
        .bind(sent_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}

/// Delivery transaction for values, keyed by (record, property).
pub(crate) struct ValueDeliveryTx {
    tx: Transaction<'static, Postgres>,
    key: ValueKey,
}

impl ValueDeliveryTx {
    pub(crate) fn new(tx: Transaction<'static, Postgres>, key: ValueKey) -> Self {
        Self { tx, key }
    }
}

#[async_trait]
impl SentStateTx for ValueDeliveryTx {
    async fn get_for_update(&mut self) -> Result<Option<SentState>> {
        let row = sqlx::query(
            "SELECT sum, sent_at FROM value_sent_state WHERE record_id = $1 AND property_id = $2 FOR UPDATE",
        )
        .bind(self.key.record_id)
        .bind(self.key.property_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.as_ref().map(sent_state_from_row))
    }

    async fn set_sent_state(&mut self, sum: &str, sent_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO value_sent_state (record_id, property_id, sum, sent_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (record_id, property_id)
            DO UPDATE SET sum = EXCLUDED.sum, sent_at = EXCLUDED.sent_at
            "#,
        )
        .bind(self.key.record_id)
        .bind(self.key.property_id)
        .bind(sum)
        .bind(sent_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}
