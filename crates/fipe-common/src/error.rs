//! Error types shared across the FIPE workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, FipeError>;

/// Errors raised while normalizing upstream text into records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FipeError {
    #[error("Unexpected response for value field: {0:?}")]
    InvalidValue(String),

    #[error("Unexpected entry for month reference: {0:?}")]
    InvalidMonthReference(String),
}
