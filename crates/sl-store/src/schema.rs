//! Schema Bootstrap
//!
//! Creates everything the pipeline reads: the shared change sequence, the
//! four change-log tables, the four sent-state tables and the settings
//! table, plus the entity tables a development deployment writes into.
//! Content hashes and change-log rows are maintained by the writing side
//! (trigger or application code); nothing in this crate computes them.

use sqlx::PgPool;
use tracing::info;

use sl_common::Result;

use crate::db_err;

const STATEMENTS: &[&str] = &[
    "CREATE SEQUENCE IF NOT EXISTS entity_change_seq",
    r#"
    CREATE TABLE IF NOT EXISTS reference_type_changes (
        id BIGINT PRIMARY KEY DEFAULT nextval('entity_change_seq'),
        key TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS record_changes (
        id BIGINT PRIMARY KEY DEFAULT nextval('entity_change_seq'),
        key TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS property_changes (
        id BIGINT PRIMARY KEY DEFAULT nextval('entity_change_seq'),
        key TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS value_changes (
        id BIGINT PRIMARY KEY DEFAULT nextval('entity_change_seq'),
        key TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reference_type_sent_state (
        id UUID PRIMARY KEY,
        sum TEXT NOT NULL,
        sent_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS record_sent_state (
        id UUID PRIMARY KEY,
        sum TEXT NOT NULL,
        sent_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS property_sent_state (
        id UUID PRIMARY KEY,
        sum TEXT NOT NULL,
        sent_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS value_sent_state (
        record_id UUID NOT NULL,
        property_id UUID NOT NULL,
        sum TEXT NOT NULL,
        sent_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (record_id, property_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reference_types (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        content_hash TEXT NOT NULL,
        changed_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS records (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        deletion_mark BOOLEAN NOT NULL DEFAULT FALSE,
        reference_type_id UUID,
        content_hash TEXT NOT NULL,
        changed_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS properties (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        types TEXT NOT NULL,
        reference_type_ids TEXT,
        owner_reference_type_id UUID,
        content_hash TEXT NOT NULL,
        changed_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS record_values (
        record_id UUID NOT NULL,
        property_id UUID NOT NULL,
        value_type TEXT NOT NULL,
        reference_type_id UUID,
        payload TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        changed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (record_id, property_id)
    )
    "#,
];

/// Creates the sync schema if it does not exist. One statement per query;
/// prepared statements cannot carry more.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(db_err)?;
    }
    info!("Sync schema ready");
    Ok(())
}
