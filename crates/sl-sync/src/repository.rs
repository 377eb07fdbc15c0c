use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sl_common::{ChangeKey, ChangeKind, ChangeLogEntry, EntitySnapshot, Result, SentState};

/// Read/purge access to the shared change log.
#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// Oldest outstanding entries across all kinds, ascending by id,
    /// at most `limit`. An empty vec means the log is drained.
    async fn fetch_batch(&self, limit: u32) -> Result<Vec<ChangeLogEntry>>;

    /// Deletes entries with `id <= up_to` for every kind and returns the
    /// number removed. Purging is cleanup, not correctness: an unpurged,
    /// already-delivered change is skipped again by the hash check.
    async fn purge_up_to(&self, up_to: i64) -> Result<u64>;
}

/// Store access for one tracked entity kind: snapshot resolution plus the
/// row-locked delivery transaction over its sent state.
#[async_trait]
pub trait EntityStore: Send + Sync {
    type Key: ChangeKey;
    type Snapshot: EntitySnapshot + Send + Sync;

    const KIND: ChangeKind;

    /// Current snapshot for the identity; `None` when the row is gone.
    /// Resolution reads current state only, so mutations between two
    /// change-log entries for the same entity collapse into one delivery.
    async fn resolve(&self, key: &Self::Key) -> Result<Option<Self::Snapshot>>;

    /// Opens the delivery transaction bound to the identity's sent-state
    /// row.
    async fn begin_delivery(&self, key: &Self::Key) -> Result<Box<dyn SentStateTx>>;
}

/// Delivery transaction over one entity's sent-state row.
///
/// `get_for_update` takes the row lock that serializes concurrent
/// deliveries of the same entity. `sum` must never be written without a
/// publish decision in the same transaction.
#[async_trait]
pub trait SentStateTx: Send {
    /// Locked read of the row; `None` means never sent.
    async fn get_for_update(&mut self) -> Result<Option<SentState>>;

    /// Upserts the sent hash and timestamp.
    async fn set_sent_state(&mut self, sum: &str, sent_at: DateTime<Utc>) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Process-wide tenant identity, written by registration and re-read at the
/// start of every pipeline run so a re-registration takes effect without a
/// restart.
#[async_trait]
pub trait TenantConfig: Send + Sync {
    async fn tenant_id(&self) -> Result<Option<String>>;
}
