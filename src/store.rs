//! The idempotency store: field-sets under string keys, with optional expiration

use std::{io, time::Duration};

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no such key {0:?}")]
    NoSuchKey(String),
    #[error("expiration of {0:?} is out of range")]
    InvalidTtl(Duration),
    #[error("store snapshot IO failed: {0}")]
    Io(#[from] io::Error),
    #[error("store snapshot is invalid: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Safe to share between any number of tasks.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// is there a live (unexpired) record at `key`
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    /// set `fields` on the record at `key`, creating it if needed
    async fn write_fields(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), StoreError>;
    /// expire the record at `key` once `ttl` has passed, replacing any earlier expiration
    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
    /// remove the record at `key`, if there is one
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
