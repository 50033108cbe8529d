//! Cache module - Named request/response buckets
//!
//! Provides:
//! - The `CacheStorage` trait exposed by the platform to page and agent
//! - An in-memory bucket store
//! - `CacheSelector`, the content-category classifier used by selective clears

mod selector;
mod storage;

pub use selector::CacheSelector;
pub use storage::{CacheError, CacheStorage, CachedResponse, MemoryCacheStorage};

#[cfg(test)]
pub use storage::MockCacheStorage;
