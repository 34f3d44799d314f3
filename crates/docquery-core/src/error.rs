//! Error types shared across the docquery crates.

use crate::storage::StoreError;

/// Result type for query translation.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Query translation error.
///
/// Raised by the optimizer and the emitter. A translation never recovers
/// from these internally; they always reach the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// A node or operator outside the supported allow-list.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A structurally valid but contradictory request.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl QueryError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Get error code for client handling.
    pub fn code(&self) -> &str {
        match self {
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::InvalidOperation(_) => "INVALID_OPERATION",
        }
    }
}

/// Umbrella error for callers that mix translation and storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unsupported query construct: {0}")]
    Unsupported(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Resource out of date: {0}")]
    OutOfDate(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type using the umbrella error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Get error code for client handling.
    pub fn code(&self) -> &str {
        match self {
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::InvalidOperation(_) => "INVALID_OPERATION",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::OutOfDate(_) => "OUT_OF_DATE",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Storage(_) => "STORAGE",
        }
    }
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Unsupported(s) => Error::Unsupported(s),
            QueryError::InvalidOperation(s) => Error::InvalidOperation(s),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::BadRequest(s) => Error::BadRequest(s),
            StoreError::NotFound(s) => Error::NotFound(s),
            StoreError::Conflict(s) => Error::Conflict(s),
            StoreError::OutOfDate(s) => Error::OutOfDate(s),
            StoreError::Query(e) => e.into(),
            StoreError::Serialization(s) => Error::Serialization(s),
            StoreError::Backend(s) => Error::Storage(s),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
