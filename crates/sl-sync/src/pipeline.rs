//! Batch Orchestrator
//!
//! Drives one pipeline invocation: fetch a bounded batch from the change
//! log, deliver each entry in id order through its kind's sender, then
//! advance the purge watermark to the last fully processed id. The first
//! failure aborts the remainder of the batch; the failing entry and its
//! tail stay in the log for the next invocation, which is what makes
//! delivery at-least-once across restarts.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, warn};

use sl_common::{ChangeKind, Result, SyncError};

use crate::repository::{ChangeLogStore, TenantConfig};
use crate::sender::{ChangeSender, DeliveryContext, SendOutcome};

/// Upper bound on one batch, regardless of configuration.
pub const MAX_BATCH_SIZE: u32 = 5000;

/// What one pipeline invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub published: usize,
    pub unchanged: usize,
    pub missing: usize,
    pub purged: u64,
}

pub struct SyncPipeline {
    change_log: Arc<dyn ChangeLogStore>,
    tenant: Arc<dyn TenantConfig>,
    senders: HashMap<ChangeKind, Arc<dyn ChangeSender>>,
    exchange: String,
    batch_size: u32,
}

impl SyncPipeline {
    pub fn new(
        change_log: Arc<dyn ChangeLogStore>,
        tenant: Arc<dyn TenantConfig>,
        senders: Vec<Arc<dyn ChangeSender>>,
        exchange: String,
        batch_size: u32,
    ) -> Self {
        let senders = senders.into_iter().map(|s| (s.kind(), s)).collect();
        Self {
            change_log,
            tenant,
            senders,
            exchange,
            batch_size: batch_size.min(MAX_BATCH_SIZE),
        }
    }

    /// Processes one batch. Returns the first delivery error, if any; the
    /// watermark purge still covers every entry processed before it.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let batch = self.change_log.fetch_batch(self.batch_size).await?;
        let mut summary = RunSummary {
            fetched: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(summary);
        }

        // Re-read rather than cache: registration can be re-run while the
        // worker is up.
        let tenant_id = self
            .tenant
            .tenant_id()
            .await?
            .ok_or(SyncError::NotRegistered)?;
        let ctx = DeliveryContext {
            tenant_id,
            exchange: self.exchange.clone(),
        };

        let mut watermark: Option<i64> = None;
        let mut first_error: Option<SyncError> = None;

        for entry in &batch {
            let Some(sender) = self.senders.get(&entry.kind) else {
                first_error = Some(SyncError::Store(format!(
                    "no sender registered for kind {}",
                    entry.kind
                )));
                break;
            };

            match sender.send(entry, &ctx).await {
                Ok(SendOutcome::Published) => summary.published += 1,
                Ok(SendOutcome::Unchanged) => summary.unchanged += 1,
                Ok(SendOutcome::Missing) => summary.missing += 1,
                Err(e) => {
                    error!(
                        "Failed to deliver {} change {} (key {}): {}",
                        entry.kind, entry.id, entry.key, e
                    );
                    first_error = Some(e);
                    break;
                }
            }
            watermark = Some(entry.id);
        }

        if let Some(up_to) = watermark {
            match self.change_log.purge_up_to(up_to).await {
                Ok(count) => summary.purged = count,
                Err(e) => warn!("Failed to purge change log up to {}: {}", up_to, e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}
