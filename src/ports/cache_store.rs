//! Cache Store Port - Durable Keyed Storage for Last-Known-Good Values
//!
//! The freshness cache only needs `get`, `put` and `delete` on string keys.
//! Adapters provide in-memory and file-backed implementations; anything
//! offering atomic per-key writes qualifies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::market::{Payload, SourceTag};

/// Persisted value layout: `{data, timestamp}` plus the tier tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Cached payload.
    pub data: Payload,
    /// Write time (Unix ms).
    pub timestamp: i64,
    /// Tier that produced the value. Absent in entries written by older
    /// clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceTag>,
}

/// Keyed store backing the freshness cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read one entry.
    async fn get(&self, key: &str) -> anyhow::Result<Option<StoredValue>>;

    /// Upsert one entry.
    async fn put(&self, key: &str, value: StoredValue) -> anyhow::Result<()>;

    /// Remove one entry (missing keys are not an error).
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}
