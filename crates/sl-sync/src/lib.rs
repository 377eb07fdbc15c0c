//! Change-Capture Delivery Pipeline
//!
//! Core contracts and orchestration for propagating entity mutations from
//! the durable change log to the message bus: the store-side traits
//! ([`ChangeLogStore`], [`EntityStore`], [`SentStateTx`], [`TenantConfig`]),
//! the broker-side [`EventPublisher`], the generic per-kind
//! [`EntitySender`], the batch orchestrator [`SyncPipeline`], and the
//! periodic [`SyncWorker`] driver binaries run.

pub mod pipeline;
pub mod publisher;
pub mod repository;
pub mod sender;

use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

pub use pipeline::{RunSummary, SyncPipeline, MAX_BATCH_SIZE};
pub use publisher::{EventPublisher, OutboundEnvelope};
pub use repository::{ChangeLogStore, EntityStore, SentStateTx, TenantConfig};
pub use sender::{ChangeSender, DeliveryContext, EntitySender, SendOutcome};

/// Periodic driver around [`SyncPipeline`].
pub struct SyncWorker {
    pipeline: SyncPipeline,
    poll_interval: Duration,
}

impl SyncWorker {
    pub fn new(pipeline: SyncPipeline, poll_interval: Duration) -> Self {
        Self {
            pipeline,
            poll_interval,
        }
    }

    /// Runs forever; callers race this against their shutdown signal.
    pub async fn start(&self) {
        info!("Starting sync worker");
        loop {
            match self.pipeline.run_once().await {
                Ok(summary) if summary.fetched > 0 => {
                    info!(
                        "Processed {} changes: {} published, {} unchanged, {} missing, {} purged",
                        summary.fetched,
                        summary.published,
                        summary.unchanged,
                        summary.missing,
                        summary.purged
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Sync run failed: {}", e);
                }
            }
            sleep(self.poll_interval).await;
        }
    }
}
