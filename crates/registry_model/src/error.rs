//! Error types for registry model operations

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Phone must be 9 digits (got {digits:?})")]
    PhoneLength { digits: String },

    #[error("Number cannot start with 0 (got {digits:?})")]
    PhoneLeadingZero { digits: String },

    #[error("Unknown status token: {0}")]
    UnknownStatus(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Record not found: {collection} area {area:?} index {index}")]
    RecordNotFound {
        collection: &'static str,
        area: String,
        index: usize,
    },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Permission denied: {action} requires the admin role")]
    PermissionDenied { action: String },
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;
