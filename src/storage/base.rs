//! Base storage trait and errors

use thiserror::Error;

/// Errors that can occur in a storage tier
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying file operation failed
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted data could not be encoded or decoded
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The tier is disabled or its lock was poisoned
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A per-origin string key/value tier
///
/// Mirrors the synchronous get/set/remove/clear surface of browser storage.
/// Durable and session tiers share this trait so callers can guard each
/// tier independently.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send + Sync {
    /// Reads a value
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Writes a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes a value, returning whether it existed
    fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// Removes every value in the tier
    fn clear(&self) -> Result<(), StorageError>;

    /// Lists stored keys
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}
