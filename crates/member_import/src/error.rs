//! Error types for import and export

use registry_model::ModelError;
use registry_sync::SyncError;
use thiserror::Error;

/// Errors that abort an import or export as a whole.
///
/// Per-row validation problems are not errors; they end up in the
/// [`ImportReport`](crate::ImportReport).
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The file held no rows besides (at most) the header
    #[error("No data rows in {0}")]
    EmptyFile(String),

    #[error("No {0} data to export")]
    NothingToExport(&'static str),
}

/// Result type for import and export operations
pub type ImportResult<T> = std::result::Result<T, ImportError>;
