//! Remote document-store abstraction.
//!
//! This module defines the `RemoteStore` trait: a narrow, collection-scoped
//! view of a cloud document database. Documents are JSON objects addressed by
//! `(collection, key)`. Writes carry [`FieldValue`]s so that server-side
//! primitives (server timestamps, numeric increments, array unions) can be
//! expressed without read-modify-write on the client.
//!
//! Implementations must make [`RemoteStore::commit`] atomic: either every
//! write in the batch is applied or none is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Stored document body
pub type DocumentData = Map<String, Value>;

/// Field writes keyed by field name
pub type Fields = BTreeMap<String, FieldValue>;

/// Address of one document
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub collection: String,
    pub key: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// A document read back from the store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub key: String,
    pub data: DocumentData,
}

impl DocumentSnapshot {
    pub fn new(key: impl Into<String>, data: DocumentData) -> Self {
        Self {
            key: key.into(),
            data,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

/// A value to write into one field
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// A plain JSON value
    Value(Value),
    /// Replaced by the store's clock at apply time
    ServerTimestamp,
    /// Added to the existing number (missing or non-numeric counts as 0)
    Increment(i64),
    /// Appended to the existing array, skipping elements already present
    ArrayUnion(Vec<Value>),
}

impl FieldValue {
    /// Resolve this write against the field's current value
    pub fn resolve(&self, current: Option<&Value>, now: DateTime<Utc>) -> Value {
        match self {
            FieldValue::Value(value) => value.clone(),
            FieldValue::ServerTimestamp => Value::String(now.to_rfc3339()),
            FieldValue::Increment(delta) => {
                let base = current.and_then(Value::as_i64).unwrap_or(0);
                Value::from(base.saturating_add(*delta))
            }
            FieldValue::ArrayUnion(elements) => {
                let mut merged = match current {
                    Some(Value::Array(existing)) => existing.clone(),
                    _ => Vec::new(),
                };
                for element in elements {
                    if !merged.contains(element) {
                        merged.push(element.clone());
                    }
                }
                Value::Array(merged)
            }
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Value(Value::String(value.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Value(Value::String(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Value(Value::Bool(value))
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Value(Value::from(value))
    }
}

/// How `set` treats fields already on the document
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetMode {
    /// Replace the whole document
    Overwrite,
    /// Update only the given fields, keeping the rest
    Merge,
}

/// One write inside a [`WriteBatch`]
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    Set {
        doc: DocumentRef,
        fields: Fields,
        mode: SetMode,
    },
    Update {
        doc: DocumentRef,
        fields: Fields,
    },
    Delete {
        doc: DocumentRef,
    },
}

impl WriteOp {
    pub fn doc(&self) -> &DocumentRef {
        match self {
            WriteOp::Set { doc, .. } | WriteOp::Update { doc, .. } | WriteOp::Delete { doc } => doc,
        }
    }
}

/// Writes accumulated for one atomic commit
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, doc: DocumentRef, fields: Fields, mode: SetMode) -> &mut Self {
        self.writes.push(WriteOp::Set { doc, fields, mode });
        self
    }

    pub fn update(&mut self, doc: DocumentRef, fields: Fields) -> &mut Self {
        self.writes.push(WriteOp::Update { doc, fields });
        self
    }

    pub fn delete(&mut self, doc: DocumentRef) -> &mut Self {
        self.writes.push(WriteOp::Delete { doc });
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[WriteOp] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<WriteOp> {
        self.writes
    }
}

/// Errors reported by a remote store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network unreachable or timed out
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Remote quota exceeded")]
    QuotaExceeded,

    /// `update` on a document that does not exist
    #[error("Document not found: {0}")]
    NotFound(DocumentRef),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Serialization(err.to_string())
    }
}

/// Result type for remote store operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Contract of the remote document database.
///
/// Every method is a suspend point; callers must not assume any ordering
/// between separate calls beyond the order in which they await them.
#[trait_variant::make(Send)]
pub trait RemoteStore: Send + Sync {
    /// Point read. `Ok(None)` when the document does not exist.
    async fn get(&self, doc: &DocumentRef) -> RemoteResult<Option<DocumentSnapshot>>;

    /// Read every document of a collection
    async fn get_all(&self, collection: &str) -> RemoteResult<Vec<DocumentSnapshot>>;

    /// Upsert a document
    async fn set(&self, doc: &DocumentRef, fields: Fields, mode: SetMode) -> RemoteResult<()>;

    /// Partial update; fails with [`RemoteError::NotFound`] if the document is absent
    async fn update(&self, doc: &DocumentRef, fields: Fields) -> RemoteResult<()>;

    async fn delete(&self, doc: &DocumentRef) -> RemoteResult<()>;

    /// Create a document under a store-assigned key and return its address
    async fn add(&self, collection: &str, fields: Fields) -> RemoteResult<DocumentRef>;

    /// Apply every write in the batch atomically
    async fn commit(&self, batch: WriteBatch) -> RemoteResult<()>;
}

/// Apply one write to a document body.
///
/// `existing` is the current body (if any). Returns the new body, or `None`
/// when the document is deleted.
pub fn apply_write(
    op: &WriteOp,
    existing: Option<&DocumentData>,
    now: DateTime<Utc>,
) -> RemoteResult<Option<DocumentData>> {
    match op {
        WriteOp::Set { fields, mode, .. } => {
            let mut data = match (mode, existing) {
                (SetMode::Merge, Some(current)) => current.clone(),
                _ => DocumentData::new(),
            };
            apply_fields(&mut data, fields, now);
            Ok(Some(data))
        }
        WriteOp::Update { doc, fields } => {
            let mut data = existing
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(doc.clone()))?;
            apply_fields(&mut data, fields, now);
            Ok(Some(data))
        }
        WriteOp::Delete { .. } => Ok(None),
    }
}

fn apply_fields(data: &mut DocumentData, fields: &Fields, now: DateTime<Utc>) {
    for (name, value) in fields {
        let resolved = value.resolve(data.get(name), now);
        data.insert(name.clone(), resolved);
    }
}
