//! Error types for LakeCopy
//!
//! Every fallible operation in the crate returns [`TransferError`]. Batch
//! operations never fail because of a single item: the executor stores each
//! item's error in that item's outcome slot instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for LakeCopy operations
#[derive(Error, Debug)]
pub enum TransferError {
    /// Malformed or unsupported location string
    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    /// Source or destination does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Query input format could not be determined or is not supported
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Local file could not be read or written
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// File or directory being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A remote store operation reported an error
    #[error("{operation} failed for '{location}': {message}")]
    TransferFailure {
        /// Store operation, e.g. `put` or `copy`
        operation: &'static str,
        /// Location the operation addressed
        location: String,
        /// Error reported by the store
        message: String,
    },

    /// Conditional copy guard rejected by the store
    #[error("Precondition failed for '{0}'")]
    PreconditionFailed(String),

    /// Select response could not be decoded into records
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Join(String),
}

/// Coarse classification of a [`TransferError`], convenient for reporting
/// which step of a batch item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`TransferError::InvalidLocation`]
    InvalidLocation,
    /// See [`TransferError::NotFound`]
    NotFound,
    /// See [`TransferError::UnsupportedFormat`]
    UnsupportedFormat,
    /// See [`TransferError::Io`]
    Io,
    /// Remote operation failed, including a worker that died mid-transfer
    TransferFailure,
    /// See [`TransferError::DecodeError`]
    Decode,
    /// See [`TransferError::ConfigError`]
    Config,
}

impl TransferError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a remote operation failure
    pub fn transfer(
        operation: &'static str,
        location: impl ToString,
        message: impl ToString,
    ) -> Self {
        Self::TransferFailure {
            operation,
            location: location.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidLocation(_) => ErrorKind::InvalidLocation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::Io { .. } => ErrorKind::Io,
            Self::TransferFailure { .. } | Self::PreconditionFailed(_) | Self::Join(_) => {
                ErrorKind::TransferFailure
            }
            Self::DecodeError(_) => ErrorKind::Decode,
            Self::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// Check if this error means the addressed object or file is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Get the local path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for LakeCopy operations
pub type Result<T> = std::result::Result<T, TransferError>;

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::DecodeError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| TransferError::io(path, e))
    }
}
