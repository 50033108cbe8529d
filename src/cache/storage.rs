//! Named cache buckets
//!
//! The platform exposes one `CacheStorage` per origin. The background agent
//! fills and prunes it; the page may only enumerate and delete.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur while accessing cache buckets
#[derive(Debug, Error)]
pub enum CacheError {
    /// The named bucket does not exist
    #[error("Cache bucket not found: {0}")]
    BucketNotFound(String),

    /// The cache API is disabled or failed
    #[error("Cache storage unavailable: {0}")]
    Unavailable(String),
}

/// A stored response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// When the response entered the cache
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    /// Creates a 200 response with the given body
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            cached_at: Utc::now(),
        }
    }
}

/// Platform cache API: named buckets of request URL → response
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Lists bucket names
    async fn bucket_names(&self) -> Result<Vec<String>, CacheError>;

    /// Deletes a whole bucket, returning whether it existed
    async fn delete_bucket(&self, name: &str) -> Result<bool, CacheError>;

    /// Lists the request URLs stored in a bucket
    async fn requests(&self, bucket: &str) -> Result<Vec<String>, CacheError>;

    /// Deletes one entry, returning whether it existed
    async fn delete_entry(&self, bucket: &str, url: &str) -> Result<bool, CacheError>;

    /// Stores a response, creating the bucket if needed
    async fn put(&self, bucket: &str, url: &str, response: CachedResponse)
        -> Result<(), CacheError>;
}

/// Bucket store kept in memory
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, CachedResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of cached entries across buckets
    pub async fn entry_count(&self) -> usize {
        self.buckets.read().await.values().map(|b| b.len()).sum()
    }

    /// Returns true if a bucket with this name exists
    pub async fn has_bucket(&self, name: &str) -> bool {
        self.buckets.read().await.contains_key(name)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn bucket_names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.buckets.read().await.keys().cloned().collect())
    }

    async fn delete_bucket(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.buckets.write().await.remove(name).is_some())
    }

    async fn requests(&self, bucket: &str) -> Result<Vec<String>, CacheError> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|entries| entries.keys().cloned().collect())
            .ok_or_else(|| CacheError::BucketNotFound(bucket.to_string()))
    }

    async fn delete_entry(&self, bucket: &str, url: &str) -> Result<bool, CacheError> {
        let mut buckets = self.buckets.write().await;
        let entries = buckets
            .get_mut(bucket)
            .ok_or_else(|| CacheError::BucketNotFound(bucket.to_string()))?;
        Ok(entries.remove(url).is_some())
    }

    async fn put(
        &self,
        bucket: &str,
        url: &str,
        response: CachedResponse,
    ) -> Result<(), CacheError> {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(url.to_string(), response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_creates_bucket() {
        let caches = MemoryCacheStorage::new();
        caches
            .put("v1-api", "/api/poses", CachedResponse::ok("[]"))
            .await
            .unwrap();

        assert!(caches.has_bucket("v1-api").await);
        assert!(!caches.has_bucket("v1-images").await);
        assert_eq!(caches.requests("v1-api").await.unwrap(), vec!["/api/poses"]);
    }

    #[tokio::test]
    async fn test_delete_bucket() {
        let caches = MemoryCacheStorage::new();
        caches.put("v1-images", "/img/a.png", CachedResponse::ok("")).await.unwrap();

        assert!(caches.delete_bucket("v1-images").await.unwrap());
        assert!(!caches.delete_bucket("v1-images").await.unwrap());
        assert!(caches.bucket_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let caches = MemoryCacheStorage::new();
        caches.put("v1-api", "/api/poses", CachedResponse::ok("[]")).await.unwrap();
        caches.put("v1-api", "/api/flows", CachedResponse::ok("[]")).await.unwrap();

        assert!(caches.delete_entry("v1-api", "/api/poses").await.unwrap());
        assert_eq!(caches.requests("v1-api").await.unwrap(), vec!["/api/flows"]);
        assert_eq!(caches.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let caches = MemoryCacheStorage::new();
        assert!(matches!(
            caches.requests("nope").await,
            Err(CacheError::BucketNotFound(_))
        ));
        assert!(caches.delete_entry("nope", "/").await.is_err());
    }
}
