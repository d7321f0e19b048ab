//! Error types for block descriptors

use std::path::PathBuf;

use thiserror::Error;

/// Result type for descriptor operations
pub type Result<T> = std::result::Result<T, MetaError>;

/// Block descriptor errors
///
/// `Parse`, `Schema` and `Validation` are data problems and will fail the
/// same way on every attempt. `Io` is a transport failure and may succeed
/// when retried.
#[derive(Error, Debug)]
pub enum MetaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Descriptor not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Malformed descriptor JSON: {0}")]
    Parse(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid descriptor field {field}: {reason}")]
    Validation { field: String, reason: String },
}

impl MetaError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// The offending field path of a validation failure
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}
