//! PostgreSQL Store
//!
//! sqlx-backed implementations of the pipeline's store contracts: change
//! log read/purge, per-kind entity resolution, row-locked sent-state
//! delivery transactions, tenant settings, and schema bootstrap.

pub mod change_log;
pub mod properties;
pub mod records;
pub mod reference_types;
pub mod schema;
pub mod sent_state;
pub mod settings;
pub mod values;

pub use change_log::PgChangeLogStore;
pub use properties::PgPropertyStore;
pub use records::PgRecordStore;
pub use reference_types::PgReferenceTypeStore;
pub use settings::PgSyncSettings;
pub use values::PgValueStore;

use sl_common::SyncError;

pub(crate) fn db_err(err: sqlx::Error) -> SyncError {
    SyncError::store(err)
}
