//! Persistence Backends
//!
//! Persistent tiers write entries through to an injected key-value store. The
//! engine assumes nothing about the storage technology; entries are stored as
//! a self-describing JSON envelope so flags, tags and TTL survive a reload.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;
use super::serializer::Payload;
use crate::error::Result;

/// Storage backend for persistent tiers
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Load the stored bytes for a key
    async fn load(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store bytes under a key, replacing any previous value
    async fn save(&self, key: &str, data: Bytes) -> Result<()>;

    /// Remove a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Get storage statistics
    fn stats(&self) -> BackendStats;
}

/// Backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    /// Total objects stored
    pub object_count: u64,
    /// Total bytes stored
    pub total_bytes: u64,
    pub loads: u64,
    pub saves: u64,
    pub deletes: u64,
}

/// In-memory backend for tests and the replay tool
#[derive(Default)]
pub struct InMemoryBackend {
    storage: DashMap<String, Bytes>,
    total_bytes: AtomicU64,
    loads: AtomicU64,
    saves: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.storage.contains_key(key)
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(key).map(|data| data.clone()))
    }

    async fn save(&self, key: &str, data: Bytes) -> Result<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);

        let size = data.len() as u64;
        if let Some(old) = self.storage.insert(key.to_string(), data) {
            self.total_bytes
                .fetch_sub(old.len() as u64, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);

        match self.storage.remove(key) {
            Some((_, data)) => {
                self.total_bytes
                    .fetch_sub(data.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            object_count: self.storage.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

/// Envelope written to the backend for each entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub payload: Vec<u8>,
    pub compressed: bool,
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: u64,
}

impl PersistedEntry {
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            payload: entry.data().to_vec(),
            compressed: entry.is_compressed(),
            encrypted: entry.is_encrypted(),
            ttl_ms: entry
                .ttl()
                .map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
            tags: entry.tags().iter().cloned().collect(),
            created_at: entry.created_at(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Rebuild a cache entry; access counters restart at `now`
    pub fn into_entry(self, key: &str, now: u64, generation: u64) -> CacheEntry {
        let payload = Payload::from_parts(Bytes::from(self.payload), self.compressed, self.encrypted);
        CacheEntry::restore(
            key.to_string(),
            payload,
            self.tags.into_iter().collect::<BTreeSet<_>>(),
            self.ttl_ms.map(Duration::from_millis),
            self.created_at,
            now,
            generation,
        )
    }
}
