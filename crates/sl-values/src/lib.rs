//! Typed Value Validation
//!
//! Pure mapping between value type tags, accepted runtime payload shapes,
//! and the canonical JSON encoding stored for each value. Two entry points
//! share one rule table: [`encode_value`] produces the JSON the write path
//! persists, [`decode_value`] validates a payload read back from the store
//! into a typed in-memory value.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type tag of a generic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    Text,
    Bool,
    Date,
    Uuid,
    Reference,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Number => "number",
            ValueType::Text => "text",
            ValueType::Bool => "bool",
            ValueType::Date => "date",
            ValueType::Uuid => "uuid",
            ValueType::Reference => "reference",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, ValueError> {
        match s {
            "number" => Ok(ValueType::Number),
            "text" => Ok(ValueType::Text),
            "bool" => Ok(ValueType::Bool),
            "date" => Ok(ValueType::Date),
            "uuid" => Ok(ValueType::Uuid),
            "reference" => Ok(ValueType::Reference),
            other => Err(ValueError::UnknownType(other.to_string())),
        }
    }
}

/// A validated in-memory value, one variant per supported type.
///
/// Callers that already hold a native `DateTime<Utc>` or `Uuid` construct
/// the matching variant directly; JSON inputs go through [`decode_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedPayload {
    Number(serde_json::Number),
    Text(String),
    Bool(bool),
    Date(DateTime<Utc>),
    Uuid(Uuid),
    Reference(Uuid),
}

impl TypedPayload {
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedPayload::Number(_) => ValueType::Number,
            TypedPayload::Text(_) => ValueType::Text,
            TypedPayload::Bool(_) => ValueType::Bool,
            TypedPayload::Date(_) => ValueType::Date,
            TypedPayload::Uuid(_) => ValueType::Uuid,
            TypedPayload::Reference(_) => ValueType::Reference,
        }
    }

    /// Canonical JSON encoding: numbers, strings and booleans pass through,
    /// dates render as UTC RFC 3339, ids as their hyphenated string form.
    pub fn canonical_json(&self) -> serde_json::Value {
        match self {
            TypedPayload::Number(n) => serde_json::Value::Number(n.clone()),
            TypedPayload::Text(s) => serde_json::Value::String(s.clone()),
            TypedPayload::Bool(b) => serde_json::Value::Bool(*b),
            TypedPayload::Date(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            TypedPayload::Uuid(id) => serde_json::Value::String(id.to_string()),
            TypedPayload::Reference(id) => serde_json::Value::String(id.to_string()),
        }
    }
}

/// A fully validated value of a record property.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub record_id: Uuid,
    pub property_id: Uuid,
    pub value_type: ValueType,
    pub reference_type_id: Option<Uuid>,
    pub payload: TypedPayload,
}

impl TypedValue {
    /// Builds a value, enforcing that the payload matches the type tag and
    /// that a reference type id is present exactly for reference values.
    pub fn new(
        record_id: Uuid,
        property_id: Uuid,
        value_type: ValueType,
        reference_type_id: Option<Uuid>,
        payload: TypedPayload,
    ) -> Result<Self, ValueError> {
        if payload.value_type() != value_type {
            return Err(ValueError::TypeMismatch {
                expected: value_type,
                actual: payload.value_type().as_str().to_string(),
            });
        }
        match (value_type, reference_type_id) {
            (ValueType::Reference, None) => return Err(ValueError::MissingReferenceType),
            (vt, Some(_)) if vt != ValueType::Reference => {
                return Err(ValueError::UnexpectedReferenceType)
            }
            _ => {}
        }
        Ok(Self {
            record_id,
            property_id,
            value_type,
            reference_type_id,
            payload,
        })
    }
}

/// Validation failures for typed values. These belong to the write
/// boundary; the delivery pipeline never produces them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("type mismatch: expected {expected} payload, got {actual}")]
    TypeMismatch { expected: ValueType, actual: String },

    #[error("cannot parse {input:?} as {expected}: {message}")]
    Parse {
        expected: ValueType,
        input: String,
        message: String,
    },

    #[error("unknown value type {0:?}")]
    UnknownType(String),

    #[error("reference values require a reference type id")]
    MissingReferenceType,

    #[error("only reference values may carry a reference type id")]
    UnexpectedReferenceType,
}

/// Validates a JSON payload against `value_type` and returns the typed
/// in-memory value. Dates accept any RFC 3339 string and normalize to UTC;
/// ids accept the canonical hyphenated form.
pub fn decode_value(
    value_type: ValueType,
    payload: &serde_json::Value,
) -> Result<TypedPayload, ValueError> {
    match (value_type, payload) {
        (ValueType::Number, serde_json::Value::Number(n)) => Ok(TypedPayload::Number(n.clone())),
        (ValueType::Text, serde_json::Value::String(s)) => Ok(TypedPayload::Text(s.clone())),
        (ValueType::Bool, serde_json::Value::Bool(b)) => Ok(TypedPayload::Bool(*b)),
        (ValueType::Date, serde_json::Value::String(s)) => parse_date(s),
        (ValueType::Uuid, serde_json::Value::String(s)) => {
            parse_uuid(ValueType::Uuid, s).map(TypedPayload::Uuid)
        }
        (ValueType::Reference, serde_json::Value::String(s)) => {
            parse_uuid(ValueType::Reference, s).map(TypedPayload::Reference)
        }
        (expected, other) => Err(ValueError::TypeMismatch {
            expected,
            actual: json_type_name(other).to_string(),
        }),
    }
}

/// Validates a runtime JSON payload against `value_type` and returns the
/// canonical JSON to persist for it.
pub fn encode_value(
    value_type: ValueType,
    raw: &serde_json::Value,
) -> Result<serde_json::Value, ValueError> {
    Ok(decode_value(value_type, raw)?.canonical_json())
}

fn parse_date(s: &str) -> Result<TypedPayload, ValueError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| TypedPayload::Date(dt.with_timezone(&Utc)))
        .map_err(|e| ValueError::Parse {
            expected: ValueType::Date,
            input: s.to_string(),
            message: e.to_string(),
        })
}

fn parse_uuid(expected: ValueType, s: &str) -> Result<Uuid, ValueError> {
    Uuid::from_str(s).map_err(|e| ValueError::Parse {
        expected,
        input: s.to_string(),
        message: e.to_string(),
    })
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
