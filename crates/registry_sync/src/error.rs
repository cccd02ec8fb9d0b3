//! Error types for the sync engine.
//!
//! Expected failures (remote unreachable, a write rejected) are reported
//! through outcome values such as [`PushOutcome`](crate::PushOutcome). The
//! variants here are for conditions the caller cannot simply retry past:
//! malformed payloads, cache corruption, invalid input and permission
//! violations.

use crate::cache::CacheError;
use crate::remote::RemoteError;
use registry_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// A remote document could not be projected into a record
    #[error("Malformed document {collection}/{key}: {reason}")]
    MalformedDocument {
        collection: String,
        key: String,
        reason: String,
    },

    /// The operation needs the remote store and the device is offline
    #[error("This operation requires an internet connection")]
    Offline,
}

impl SyncError {
    pub(crate) fn malformed(
        collection: &str,
        key: &str,
        reason: impl Into<String>,
    ) -> Self {
        SyncError::MalformedDocument {
            collection: collection.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for sync engine operations
pub type SyncResult<T> = Result<T, SyncError>;
