//! Change Log
//!
//! The four kind-specific log tables share one id sequence, so a UNION
//! ordered by id is a valid global processing order across kinds.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};

use sl_common::{ChangeKind, ChangeLogEntry, Result, SyncError};
use sl_sync::ChangeLogStore;

use crate::db_err;

const CHANGE_TABLES: [&str; 4] = [
    "reference_type_changes",
    "record_changes",
    "property_changes",
    "value_changes",
];

const FETCH_BATCH: &str = r#"
    SELECT id, kind, key FROM (
        SELECT id, 'reference_type' AS kind, key FROM reference_type_changes
        UNION ALL
        SELECT id, 'record' AS kind, key FROM record_changes
        UNION ALL
        SELECT id, 'property' AS kind, key FROM property_changes
        UNION ALL
        SELECT id, 'value' AS kind, key FROM value_changes
    ) AS changes
    ORDER BY id
    LIMIT $1
"#;

pub struct PgChangeLogStore {
    pool: PgPool,
}

impl PgChangeLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Deletes entries with `id <= up_to` from every log table on the given
/// connection, so callers can make the purge part of a larger transaction.
pub async fn purge_with(conn: &mut PgConnection, up_to: i64) -> Result<u64> {
    let mut purged = 0;
    for table in CHANGE_TABLES {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id <= $1", table))
            .bind(up_to)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        purged += result.rows_affected();
    }
    Ok(purged)
}

fn change_kind(raw: &str) -> Result<ChangeKind> {
    match raw {
        "reference_type" => Ok(ChangeKind::ReferenceType),
        "record" => Ok(ChangeKind::Record),
        "property" => Ok(ChangeKind::Property),
        "value" => Ok(ChangeKind::Value),
        other => Err(SyncError::Store(format!("unknown change kind {:?}", other))),
    }
}

#[async_trait]
impl ChangeLogStore for PgChangeLogStore {
    async fn fetch_batch(&self, limit: u32) -> Result<Vec<ChangeLogEntry>> {
        let rows = sqlx::query(FETCH_BATCH)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(ChangeLogEntry {
                id: row.get("id"),
                kind: change_kind(row.get("kind"))?,
                key: row.get("key"),
            });
        }
        Ok(entries)
    }

    async fn purge_up_to(&self, up_to: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let purged = purge_with(&mut tx, up_to).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(purged)
    }
}
