//! Error types for nsmeta
//!
//! Provides a unified error type for all operations. Every variant maps to one
//! [`ErrorKind`]; the kind is what callers (and the HTTP layer) branch on.

use thiserror::Error;

/// Result type alias using MetaError
pub type Result<T> = std::result::Result<T, MetaError>;

/// Unified error type for nsmeta operations
#[derive(Debug, Error)]
pub enum MetaError {
    // -------------------------------------------------------------------------
    // Caller-visible Errors
    // -------------------------------------------------------------------------
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("service is not accepting requests")]
    Unavailable,

    #[error("cancelled: {0}")]
    Cancelled(String),

    // -------------------------------------------------------------------------
    // Data Errors
    // -------------------------------------------------------------------------
    #[error("metadata corrupted: {0}")]
    Corrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of a [`MetaError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Conflict,
    Unavailable,
    Cancelled,
    Internal,
}

impl MetaError {
    /// The kind this error propagates as
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetaError::NotFound(_) => ErrorKind::NotFound,
            MetaError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            MetaError::Conflict(_) => ErrorKind::Conflict,
            MetaError::Unavailable => ErrorKind::Unavailable,
            MetaError::Cancelled(_) => ErrorKind::Cancelled,
            MetaError::Corrupted(_)
            | MetaError::Serialization(_)
            | MetaError::Io(_)
            | MetaError::WalCorruption(_)
            | MetaError::Storage(_)
            | MetaError::Config(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        MetaError::NotFound(what.to_string())
    }

    pub fn invalid(what: impl std::fmt::Display) -> Self {
        MetaError::InvalidArgument(what.to_string())
    }
}

impl From<bincode::Error> for MetaError {
    fn from(err: bincode::Error) -> Self {
        MetaError::Serialization(err.to_string())
    }
}

/// Reject non-positive ids before they reach the key codec
pub fn ensure_id(field: &str, id: i64) -> Result<()> {
    if id <= 0 {
        return Err(MetaError::InvalidArgument(format!(
            "{} must be a positive integer, got {}",
            field, id
        )));
    }
    Ok(())
}
