use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sl_values::{TypedPayload, ValueType};

// ============================================================================
// Change Log Types
// ============================================================================

/// Kind of tracked entity a change-log entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ReferenceType,
    Record,
    Property,
    Value,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::ReferenceType => "reference_type",
            ChangeKind::Record => "record",
            ChangeKind::Property => "property",
            ChangeKind::Value => "value",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record noting that a tracked entity mutated.
///
/// Entries are created by the storage layer on every insert/update and
/// deleted only by the delivery pipeline, up to a fully processed watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    /// Globally monotonic id drawn from one sequence shared by all kinds.
    pub id: i64,
    pub kind: ChangeKind,
    /// Kind-specific identity rendered as text; decoded only by the
    /// matching sender.
    pub key: String,
}

/// Identity carried in a change-log key, rendered to and from text.
pub trait ChangeKey: Send + Sync {
    fn encode(&self) -> String;
    fn decode(raw: &str) -> Option<Self>
    where
        Self: Sized;
}

impl ChangeKey for Uuid {
    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        Uuid::from_str(raw).ok()
    }
}

/// Composite identity of a single record property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueKey {
    pub record_id: Uuid,
    pub property_id: Uuid,
}

impl ChangeKey for ValueKey {
    fn encode(&self) -> String {
        format!("{}:{}", self.record_id, self.property_id)
    }

    fn decode(raw: &str) -> Option<Self> {
        let (record, property) = raw.split_once(':')?;
        Some(Self {
            record_id: Uuid::from_str(record).ok()?,
            property_id: Uuid::from_str(property).ok()?,
        })
    }
}

// ============================================================================
// Sent State
// ============================================================================

/// Last content hash successfully handed to the publisher for one entity.
///
/// Absence of a row means "never sent". `sum` must only ever be written
/// inside the delivery transaction that decided to publish (or intentionally
/// skip) that hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentState {
    pub sum: String,
    pub sent_at: DateTime<Utc>,
}

// ============================================================================
// Entity Snapshots
// ============================================================================

/// Point-in-time view of a tracked entity, as resolved for delivery.
///
/// The content hash is a storage-computed digest over the entity's
/// significant fields; the pipeline compares it for equality and never
/// recomputes it.
pub trait EntitySnapshot {
    /// Outbound body schema for this kind. Bodies are built inside the
    /// sender's delivery future, so they must be able to cross threads.
    type Wire: Serialize + Send;

    fn content_hash(&self) -> &str;

    fn to_wire(&self) -> Self::Wire;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTypeSnapshot {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub content_hash: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub deletion_mark: bool,
    pub reference_type_id: Option<Uuid>,
    pub content_hash: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySnapshot {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Value types this property accepts.
    pub types: Vec<ValueType>,
    /// Allowed target reference types, when `types` includes references.
    pub reference_type_ids: Vec<Uuid>,
    pub owner_reference_type_id: Option<Uuid>,
    pub content_hash: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueSnapshot {
    pub record_id: Uuid,
    pub property_id: Uuid,
    pub value_type: ValueType,
    pub reference_type_id: Option<Uuid>,
    pub payload: TypedPayload,
    pub content_hash: String,
    pub changed_at: DateTime<Utc>,
}

impl EntitySnapshot for ReferenceTypeSnapshot {
    type Wire = ReferenceTypeMessage;

    fn content_hash(&self) -> &str {
        &self.content_hash
    }

    fn to_wire(&self) -> ReferenceTypeMessage {
        self.into()
    }
}

impl EntitySnapshot for RecordSnapshot {
    type Wire = RecordMessage;

    fn content_hash(&self) -> &str {
        &self.content_hash
    }

    fn to_wire(&self) -> RecordMessage {
        self.into()
    }
}

impl EntitySnapshot for PropertySnapshot {
    type Wire = PropertyMessage;

    fn content_hash(&self) -> &str {
        &self.content_hash
    }

    fn to_wire(&self) -> PropertyMessage {
        self.into()
    }
}

impl EntitySnapshot for ValueSnapshot {
    type Wire = ValueMessage;

    fn content_hash(&self) -> &str {
        &self.content_hash
    }

    fn to_wire(&self) -> ValueMessage {
        self.into()
    }
}

// ============================================================================
// Outbound Wire Schemas
// ============================================================================

/// Body published for reference type changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTypeMessage {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// Body published for record changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub deletion_mark: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_type_id: Option<Uuid>,
}

/// Body published for property changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMessage {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub types: Vec<ValueType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_type_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_reference_type_id: Option<Uuid>,
}

/// Body published for value changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMessage {
    pub record_id: Uuid,
    pub property_id: Uuid,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_type_id: Option<Uuid>,
    pub value: serde_json::Value,
}

impl From<&ReferenceTypeSnapshot> for ReferenceTypeMessage {
    fn from(snapshot: &ReferenceTypeSnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
        }
    }
}

impl From<&RecordSnapshot> for RecordMessage {
    fn from(snapshot: &RecordSnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            deletion_mark: snapshot.deletion_mark,
            reference_type_id: snapshot.reference_type_id,
        }
    }
}

impl From<&PropertySnapshot> for PropertyMessage {
    fn from(snapshot: &PropertySnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            types: snapshot.types.clone(),
            reference_type_ids: snapshot.reference_type_ids.clone(),
            owner_reference_type_id: snapshot.owner_reference_type_id,
        }
    }
}

impl From<&ValueSnapshot> for ValueMessage {
    fn from(snapshot: &ValueSnapshot) -> Self {
        Self {
            record_id: snapshot.record_id,
            property_id: snapshot.property_id,
            value_type: snapshot.value_type,
            reference_type_id: snapshot.reference_type_id,
            value: snapshot.payload.canonical_json(),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("cannot decode {kind} change key {key:?}")]
    KeyDecode { kind: ChangeKind, key: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no tenant registered")]
    NotRegistered,

    #[error("gateway error: {0}")]
    Gateway(String),
}

impl SyncError {
    pub fn store(err: impl fmt::Display) -> Self {
        SyncError::Store(err.to_string())
    }

    pub fn broker(err: impl fmt::Display) -> Self {
        SyncError::Broker(err.to_string())
    }

    pub fn serialization(err: impl fmt::Display) -> Self {
        SyncError::Serialization(err.to_string())
    }

    pub fn gateway(err: impl fmt::Display) -> Self {
        SyncError::Gateway(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
