//! Remote (L3) tier seam.
//!
//! The cache does not define a network protocol for L3. Integrators plug in
//! any store that can keep a [`RemoteRecord`] per key. Records carry the
//! encoded (and possibly compressed) value plus the entry metadata, so the
//! transport never needs to know the cached type.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteTierError {
    #[error("Remote tier unavailable: {0}")]
    Unavailable(String),

    #[error("Remote tier rejected {key}: {reason}")]
    Rejected { key: String, reason: String },
}

/// An entry as stored in the remote tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Codec output, zstd-compressed when `compressed` is set.
    pub bytes: Vec<u8>,
    pub compressed: bool,
    pub created_at: u64,
    pub ttl_ms: u64,
    pub access_count: u64,
    pub last_accessed_at: u64,
    pub size_bytes: usize,
    pub dependency_keys: Vec<String>,
}

impl RemoteRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) >= self.ttl_ms
    }
}

/// Storage backend for the L3 tier.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RemoteRecord>, RemoteTierError>;

    async fn put(&self, key: &str, record: RemoteRecord) -> Result<(), RemoteTierError>;

    /// Returns whether the key existed.
    async fn remove(&self, key: &str) -> Result<bool, RemoteTierError>;

    /// Count an access on an existing record without touching its value.
    /// Returns false if the key is gone.
    ///
    /// The default reads and rewrites the record. Backends that can update
    /// metadata in place should override it, so a concurrent write is
    /// never replaced by the record read here.
    async fn touch(&self, key: &str, now: u64) -> Result<bool, RemoteTierError> {
        let Some(mut record) = self.get(key).await? else {
            return Ok(false);
        };
        record.access_count += 1;
        record.last_accessed_at = now;
        self.put(key, record).await?;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>, RemoteTierError>;

    async fn clear(&self) -> Result<(), RemoteTierError>;
}

/// In-process remote tier, for single-node use and tests.
#[derive(Debug, Default)]
pub struct MemoryRemoteTier {
    records: Mutex<HashMap<String, RemoteRecord>>,
}

impl MemoryRemoteTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RemoteTier for MemoryRemoteTier {
    async fn get(&self, key: &str) -> Result<Option<RemoteRecord>, RemoteTierError> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, record: RemoteRecord) -> Result<(), RemoteTierError> {
        self.records.lock().insert(key.to_string(), record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, RemoteTierError> {
        Ok(self.records.lock().remove(key).is_some())
    }

    async fn touch(&self, key: &str, now: u64) -> Result<bool, RemoteTierError> {
        match self.records.lock().get_mut(key) {
            Some(record) => {
                record.access_count += 1;
                record.last_accessed_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, RemoteTierError> {
        Ok(self.records.lock().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), RemoteTierError> {
        self.records.lock().clear();
        Ok(())
    }
}
