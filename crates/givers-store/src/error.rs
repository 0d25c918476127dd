//! Store Error Types

use givers_core::ModelError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Row absent (or soft-deleted)
    #[error("{0} not found")]
    NotFound(String),

    /// Row exists but belongs to someone else
    #[error("not the owner of this donation")]
    Forbidden,

    /// Change not allowed for this row
    #[error("invalid change: {0}")]
    Invalid(String),

    /// Database unreachable or statement failed
    #[error("database error: {0}")]
    Database(String),

    /// Statement or pool checkout exceeded its deadline
    #[error("database timeout")]
    Timeout,

    /// Stored value did not decode into the domain model
    #[error("corrupt row: {0}")]
    Model(#[from] ModelError),
}

impl StoreError {
    /// Check if this error is transient
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Timeout)
    }
}

#[cfg(feature = "postgres")]
impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => StoreError::NotFound("row".into()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<diesel_async::pooled_connection::deadpool::PoolError> for StoreError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        match err {
            diesel_async::pooled_connection::deadpool::PoolError::Timeout(_) => StoreError::Timeout,
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StoreError::Timeout
    }
}
