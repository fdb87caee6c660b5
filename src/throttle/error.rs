//! Throttle Error Types
//!
//! Errors raised by the storage layer. None of these reach callers of the
//! admission operations: the throttle logs them and admits the call.

/// Errors returned by a [`KeyValueStore`](super::store::KeyValueStore)
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backing file could not be read or written
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be encoded for storage
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store lock was poisoned by a panicking writer
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}
