//! Backup and restore of cache contents.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::entry::Tier;

/// Why an exported entry is refused on import.
#[derive(Error, Debug, PartialEq)]
pub enum SnapshotError {
    #[error("Entry has an empty key")]
    EmptyKey,

    #[error("Entry {key} was created in the future ({created_at} > {now})")]
    FutureTimestamp { key: String, created_at: u64, now: u64 },

    #[error("Entry {key} has expired")]
    Expired { key: String },
}

/// One exported entry, always holding the decoded value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry<T> {
    pub key: String,
    pub value: T,
    pub tier: Tier,
    pub created_at: u64,
    pub ttl_ms: u64,
    pub access_count: u64,
    pub last_accessed_at: u64,
    pub size_bytes: usize,
    #[serde(default)]
    pub dependency_keys: Vec<String>,
}

impl<T> SnapshotEntry<T> {
    /// Structural check applied before an entry is loaded.
    pub fn validate(&self, now: u64) -> Result<(), SnapshotError> {
        if self.key.is_empty() {
            return Err(SnapshotError::EmptyKey);
        }
        if self.created_at > now {
            return Err(SnapshotError::FutureTimestamp {
                key: self.key.clone(),
                created_at: self.created_at,
                now,
            });
        }
        if now - self.created_at >= self.ttl_ms {
            return Err(SnapshotError::Expired {
                key: self.key.clone(),
            });
        }
        Ok(())
    }
}

/// A full export of a cache instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot<T> {
    pub id: Uuid,
    pub exported_at: u64,
    pub entries: Vec<SnapshotEntry<T>>,
}

impl<T> CacheSnapshot<T> {
    pub fn new(exported_at: u64, entries: Vec<SnapshotEntry<T>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            exported_at,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
