//! Storage module - Durable and session-scoped key/value tiers
//!
//! Provides:
//! - The `KeyValueStore` trait shared by every storage tier
//! - An in-memory store (session tier, tests)
//! - A JSON file store (durable per-origin tier)

mod base;
mod file_store;
mod memory;

pub use base::{KeyValueStore, StorageError};
pub use file_store::FileStore;
pub use memory::MemoryStore;

#[cfg(test)]
pub use base::MockKeyValueStore;
