//! Per-Kind Change Senders
//!
//! A sender turns one change-log entry into at most one delivery: decode
//! the key, resolve the current snapshot, compare its content hash against
//! the sent state under a row lock, and publish only when they differ.
//! The sent state is marked before the publish, inside the same
//! transaction; a crash between the two leaves the hash marked sent though
//! not delivered, which this design accepts in exchange for never
//! double-publishing on the common path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use sl_common::{ChangeKey, ChangeKind, ChangeLogEntry, EntitySnapshot, Result, SyncError};

use crate::publisher::{EventPublisher, OutboundEnvelope};
use crate::repository::{EntityStore, SentStateTx};

/// Per-invocation delivery parameters shared by every sender.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub tenant_id: String,
    pub exchange: String,
}

impl DeliveryContext {
    /// Routing key for one kind: `"{kind}.{tenant_id}"`.
    pub fn routing_key(&self, kind: ChangeKind) -> String {
        format!("{}.{}", kind, self.tenant_id)
    }
}

/// Outcome of processing one change-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Snapshot published and sent state committed.
    Published,
    /// Content hash unchanged since the last delivery; nothing sent.
    Unchanged,
    /// Entity no longer exists; treated as processed.
    Missing,
}

/// Sender for one entity kind: resolve, compare, mark sent, publish.
#[async_trait]
pub trait ChangeSender: Send + Sync {
    fn kind(&self) -> ChangeKind;

    async fn send(&self, entry: &ChangeLogEntry, ctx: &DeliveryContext) -> Result<SendOutcome>;
}

/// Generic [`ChangeSender`] over any entity store. All four kinds share
/// this one implementation; the store supplies the key shape, the snapshot
/// and the sent-state transaction.
pub struct EntitySender<S: EntityStore> {
    store: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
}

impl<S: EntityStore> EntitySender<S> {
    pub fn new(store: Arc<S>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }
}

/// Rolls the delivery transaction back and hands the original error on.
async fn abort(tx: Box<dyn SentStateTx>, err: SyncError) -> SyncError {
    if let Err(rollback_err) = tx.rollback().await {
        warn!("Rollback failed after delivery error: {}", rollback_err);
    }
    err
}

#[async_trait]
impl<S: EntityStore> ChangeSender for EntitySender<S> {
    fn kind(&self) -> ChangeKind {
        S::KIND
    }

    async fn send(&self, entry: &ChangeLogEntry, ctx: &DeliveryContext) -> Result<SendOutcome> {
        let key = S::Key::decode(&entry.key).ok_or_else(|| SyncError::KeyDecode {
            kind: S::KIND,
            key: entry.key.clone(),
        })?;

        let snapshot = match self.store.resolve(&key).await? {
            Some(snapshot) => snapshot,
            None => {
                debug!(
                    "{} {} no longer exists, skipping change {}",
                    S::KIND,
                    entry.key,
                    entry.id
                );
                return Ok(SendOutcome::Missing);
            }
        };

        let mut tx = self.store.begin_delivery(&key).await?;

        let sent = match tx.get_for_update().await {
            Ok(sent) => sent,
            Err(e) => return Err(abort(tx, e).await),
        };

        if let Some(state) = sent {
            if state.sum == snapshot.content_hash() {
                tx.rollback().await?;
                debug!(
                    "{} {} unchanged since last delivery, skipping change {}",
                    S::KIND,
                    entry.key,
                    entry.id
                );
                return Ok(SendOutcome::Unchanged);
            }
        }

        let body = match serde_json::to_vec(&snapshot.to_wire()) {
            Ok(body) => body,
            Err(e) => return Err(abort(tx, SyncError::serialization(e)).await),
        };

        if let Err(e) = tx.set_sent_state(snapshot.content_hash(), Utc::now()).await {
            return Err(abort(tx, e).await);
        }

        let envelope = OutboundEnvelope {
            exchange: ctx.exchange.clone(),
            routing_keys: vec![ctx.routing_key(S::KIND)],
            delivery_type: S::KIND.as_str(),
            app_id: ctx.tenant_id.clone(),
            body,
        };

        if let Err(e) = self.publisher.publish(envelope).await {
            return Err(abort(tx, e).await);
        }

        tx.commit().await?;

        debug!("Delivered {} change {} (key {})", S::KIND, entry.id, entry.key);
        Ok(SendOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use sl_common::{RecordMessage, RecordSnapshot, SentState, ValueKey, ValueSnapshot};
    use sl_values::{TypedPayload, ValueType};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    struct MockRecordStore {
        snapshots: HashMap<Uuid, RecordSnapshot>,
        sent: Arc<Mutex<HashMap<Uuid, SentState>>>,
        calls: CallLog,
        begin_count: AtomicUsize,
    }

    impl MockRecordStore {
        fn new(calls: CallLog) -> Self {
            Self {
                snapshots: HashMap::new(),
                sent: Arc::new(Mutex::new(HashMap::new())),
                calls,
                begin_count: AtomicUsize::new(0),
            }
        }

        fn with_snapshot(mut self, snapshot: RecordSnapshot) -> Self {
            self.snapshots.insert(snapshot.id, snapshot);
            self
        }

        fn seed_sent(&self, id: Uuid, sum: &str) {
            self.sent.lock().unwrap().insert(
                id,
                SentState {
                    sum: sum.to_string(),
                    sent_at: Utc::now(),
                },
            );
        }

        fn sent_sum(&self, id: Uuid) -> Option<String> {
            self.sent.lock().unwrap().get(&id).map(|s| s.sum.clone())
        }
    }

    struct MockTx<K> {
        key: K,
        sent: Arc<Mutex<HashMap<K, SentState>>>,
        staged: Option<SentState>,
        calls: CallLog,
    }

    #[async_trait]
    impl<K> SentStateTx for MockTx<K>
    where
        K: Copy + Eq + std::hash::Hash + Send + 'static,
    {
        async fn get_for_update(&mut self) -> Result<Option<SentState>> {
            self.calls.lock().unwrap().push("get_for_update");
            Ok(self.sent.lock().unwrap().get(&self.key).cloned())
        }

        async fn set_sent_state(&mut self, sum: &str, sent_at: DateTime<Utc>) -> Result<()> {
            self.calls.lock().unwrap().push("set_sent_state");
            self.staged = Some(SentState {
                sum: sum.to_string(),
                sent_at,
            });
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.calls.lock().unwrap().push("commit");
            if let Some(state) = self.staged {
                self.sent.lock().unwrap().insert(self.key, state);
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.calls.lock().unwrap().push("rollback");
            Ok(())
        }
    }

    #[async_trait]
    impl EntityStore for MockRecordStore {
        type Key = Uuid;
        type Snapshot = RecordSnapshot;

        const KIND: ChangeKind = ChangeKind::Record;

        async fn resolve(&self, key: &Uuid) -> Result<Option<RecordSnapshot>> {
            Ok(self.snapshots.get(key).cloned())
        }

        async fn begin_delivery(&self, key: &Uuid) -> Result<Box<dyn SentStateTx>> {
            self.begin_count.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockTx {
                key: *key,
                sent: Arc::clone(&self.sent),
                staged: None,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    struct MockPublisher {
        envelopes: Mutex<Vec<OutboundEnvelope>>,
        calls: CallLog,
        fail: AtomicBool,
    }

    impl MockPublisher {
        fn new(calls: CallLog) -> Self {
            Self {
                envelopes: Mutex::new(Vec::new()),
                calls,
                fail: AtomicBool::new(false),
            }
        }

        fn published(&self) -> Vec<OutboundEnvelope> {
            self.envelopes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventPublisher for MockPublisher {
        async fn publish(&self, envelope: OutboundEnvelope) -> Result<()> {
            self.calls.lock().unwrap().push("publish");
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Broker("connection refused".to_string()));
            }
            self.envelopes.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    struct MockValueStore {
        snapshots: HashMap<ValueKey, ValueSnapshot>,
        sent: Arc<Mutex<HashMap<ValueKey, SentState>>>,
        calls: CallLog,
    }

    impl MockValueStore {
        fn new(calls: CallLog) -> Self {
            Self {
                snapshots: HashMap::new(),
                sent: Arc::new(Mutex::new(HashMap::new())),
                calls,
            }
        }

        fn with_snapshot(mut self, snapshot: ValueSnapshot) -> Self {
            let key = ValueKey {
                record_id: snapshot.record_id,
                property_id: snapshot.property_id,
            };
            self.snapshots.insert(key, snapshot);
            self
        }

        fn sent_sum(&self, key: &ValueKey) -> Option<String> {
            self.sent.lock().unwrap().get(key).map(|s| s.sum.clone())
        }
    }

    #[async_trait]
    impl EntityStore for MockValueStore {
        type Key = ValueKey;
        type Snapshot = ValueSnapshot;

        const KIND: ChangeKind = ChangeKind::Value;

        async fn resolve(&self, key: &ValueKey) -> Result<Option<ValueSnapshot>> {
            Ok(self.snapshots.get(key).cloned())
        }

        async fn begin_delivery(&self, key: &ValueKey) -> Result<Box<dyn SentStateTx>> {
            Ok(Box::new(MockTx {
                key: *key,
                sent: Arc::clone(&self.sent),
                staged: None,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    fn record_snapshot(id: Uuid, hash: &str) -> RecordSnapshot {
        RecordSnapshot {
            id,
            name: "Pallet 7".to_string(),
            description: None,
            deletion_mark: false,
            reference_type_id: None,
            content_hash: hash.to_string(),
            changed_at: Utc::now(),
        }
    }

    fn entry(id: i64, key: &Uuid) -> ChangeLogEntry {
        ChangeLogEntry {
            id,
            kind: ChangeKind::Record,
            key: key.encode(),
        }
    }

    fn ctx() -> DeliveryContext {
        DeliveryContext {
            tenant_id: "tom-42".to_string(),
            exchange: "entities".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_send_marks_then_publishes_then_commits() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let id = Uuid::new_v4();
        let store = Arc::new(
            MockRecordStore::new(Arc::clone(&calls)).with_snapshot(record_snapshot(id, "h1")),
        );
        let publisher = Arc::new(MockPublisher::new(Arc::clone(&calls)));
        let sender = EntitySender::new(Arc::clone(&store), publisher.clone());

        let outcome = sender.send(&entry(1, &id), &ctx()).await.unwrap();

        assert_eq!(outcome, SendOutcome::Published);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["get_for_update", "set_sent_state", "publish", "commit"]
        );
        assert_eq!(store.sent_sum(id), Some("h1".to_string()));

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        let body: RecordMessage = serde_json::from_slice(&published[0].body).unwrap();
        assert_eq!(body.id, id);
        assert_eq!(body.name, "Pallet 7");
    }

    #[tokio::test]
    async fn test_unchanged_hash_skips_publish_and_rolls_back() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let id = Uuid::new_v4();
        let store = Arc::new(
            MockRecordStore::new(Arc::clone(&calls)).with_snapshot(record_snapshot(id, "h1")),
        );
        store.seed_sent(id, "h1");
        let publisher = Arc::new(MockPublisher::new(Arc::clone(&calls)));
        let sender = EntitySender::new(Arc::clone(&store), publisher.clone());

        let outcome = sender.send(&entry(1, &id), &ctx()).await.unwrap();

        assert_eq!(outcome, SendOutcome::Unchanged);
        assert_eq!(*calls.lock().unwrap(), vec!["get_for_update", "rollback"]);
        assert!(publisher.published().is_empty());
        assert_eq!(store.sent_sum(id), Some("h1".to_string()));
    }

    #[tokio::test]
    async fn test_changed_hash_republishes() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let id = Uuid::new_v4();
        let store = Arc::new(
            MockRecordStore::new(Arc::clone(&calls)).with_snapshot(record_snapshot(id, "h2")),
        );
        store.seed_sent(id, "h1");
        let publisher = Arc::new(MockPublisher::new(Arc::clone(&calls)));
        let sender = EntitySender::new(Arc::clone(&store), publisher.clone());

        let outcome = sender.send(&entry(2, &id), &ctx()).await.unwrap();

        assert_eq!(outcome, SendOutcome::Published);
        assert_eq!(publisher.published().len(), 1);
        assert_eq!(store.sent_sum(id), Some("h2".to_string()));
    }

    #[tokio::test]
    async fn test_missing_entity_is_tolerated_without_a_transaction() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let id = Uuid::new_v4();
        let store = Arc::new(MockRecordStore::new(Arc::clone(&calls)));
        let publisher = Arc::new(MockPublisher::new(Arc::clone(&calls)));
        let sender = EntitySender::new(Arc::clone(&store), publisher.clone());

        let outcome = sender.send(&entry(1, &id), &ctx()).await.unwrap();

        assert_eq!(outcome, SendOutcome::Missing);
        assert_eq!(store.begin_count.load(Ordering::SeqCst), 0);
        assert!(calls.lock().unwrap().is_empty());
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_key_is_fatal_for_the_item() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(MockRecordStore::new(Arc::clone(&calls)));
        let publisher = Arc::new(MockPublisher::new(Arc::clone(&calls)));
        let sender = EntitySender::new(Arc::clone(&store), publisher);

        let bad = ChangeLogEntry {
            id: 1,
            kind: ChangeKind::Record,
            key: "not-a-uuid".to_string(),
        };
        let err = sender.send(&bad, &ctx()).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::KeyDecode {
                kind: ChangeKind::Record,
                ..
            }
        ));
        assert_eq!(store.begin_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_rolls_back_the_sent_state() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let id = Uuid::new_v4();
        let store = Arc::new(
            MockRecordStore::new(Arc::clone(&calls)).with_snapshot(record_snapshot(id, "h1")),
        );
        let publisher = Arc::new(MockPublisher::new(Arc::clone(&calls)));
        publisher.fail.store(true, Ordering::SeqCst);
        let sender = EntitySender::new(Arc::clone(&store), publisher.clone());

        let err = sender.send(&entry(1, &id), &ctx()).await.unwrap_err();

        assert!(matches!(err, SyncError::Broker(_)));
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["get_for_update", "set_sent_state", "publish", "rollback"]
        );
        assert_eq!(store.sent_sum(id), None);
    }

    #[tokio::test]
    async fn test_envelope_carries_routing_and_tenant_metadata() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let id = Uuid::new_v4();
        let store = Arc::new(
            MockRecordStore::new(Arc::clone(&calls)).with_snapshot(record_snapshot(id, "h1")),
        );
        let publisher = Arc::new(MockPublisher::new(Arc::clone(&calls)));
        let sender = EntitySender::new(Arc::clone(&store), publisher.clone());

        sender.send(&entry(1, &id), &ctx()).await.unwrap();

        let published = publisher.published();
        assert_eq!(published[0].exchange, "entities");
        assert_eq!(published[0].routing_keys, vec!["record.tom-42".to_string()]);
        assert_eq!(published[0].delivery_type, "record");
        assert_eq!(published[0].app_id, "tom-42");
    }

    #[tokio::test]
    async fn test_value_first_send_publishes_the_composite_identity() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let key = ValueKey {
            record_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
        };
        let store = Arc::new(MockValueStore::new(Arc::clone(&calls)).with_snapshot(
            ValueSnapshot {
                record_id: key.record_id,
                property_id: key.property_id,
                value_type: ValueType::Number,
                reference_type_id: None,
                payload: TypedPayload::Number(serde_json::Number::from(12)),
                content_hash: "h1".to_string(),
                changed_at: Utc::now(),
            },
        ));
        let publisher = Arc::new(MockPublisher::new(Arc::clone(&calls)));
        let sender = EntitySender::new(Arc::clone(&store), publisher.clone());

        let change = ChangeLogEntry {
            id: 1,
            kind: ChangeKind::Value,
            key: key.encode(),
        };
        let outcome = sender.send(&change, &ctx()).await.unwrap();

        assert_eq!(outcome, SendOutcome::Published);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["get_for_update", "set_sent_state", "publish", "commit"]
        );
        assert_eq!(store.sent_sum(&key), Some("h1".to_string()));

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].delivery_type, "value");
        assert_eq!(published[0].routing_keys, vec!["value.tom-42".to_string()]);
        let body: serde_json::Value = serde_json::from_slice(&published[0].body).unwrap();
        assert_eq!(body["record_id"], json!(key.record_id));
        assert_eq!(body["property_id"], json!(key.property_id));
        assert_eq!(body["type"], json!("number"));
        assert_eq!(body["value"], json!(12));
    }

    #[tokio::test]
    async fn test_send_runs_on_a_spawned_worker_task() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let id = Uuid::new_v4();
        let store = Arc::new(
            MockRecordStore::new(Arc::clone(&calls)).with_snapshot(record_snapshot(id, "h1")),
        );
        let publisher = Arc::new(MockPublisher::new(Arc::clone(&calls)));
        let sender = Arc::new(EntitySender::new(Arc::clone(&store), publisher.clone()));

        // The worker loop drives senders from a spawned task, so the send
        // future has to cross threads.
        let outcome = tokio::spawn({
            let sender = Arc::clone(&sender);
            async move { sender.send(&entry(1, &id), &ctx()).await }
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(outcome, SendOutcome::Published);
        assert_eq!(store.sent_sum(id), Some("h1".to_string()));
        assert_eq!(publisher.published().len(), 1);
    }
}
