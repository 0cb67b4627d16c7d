//! Cache Tier
//!
//! A bounded store with a declared capacity, entry limit, latency class and
//! eviction policy.
//!
//! # Design
//!
//! - One `RwLock` over the entry index; every operation takes it once and
//!   releases it before any backend I/O, so no guard lives across an await
//! - Lock waits are bounded; a timeout surfaces as [`Error::LockTimeout`]
//! - Writes that would exceed capacity or the entry limit purge expired
//!   entries, then evict in policy order one entry at a time, re-checking the
//!   limits after each removal
//! - Persistent tiers keep the index in memory for accounting and write
//!   through to their backend; an index miss falls back to the backend

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use super::entry::{CacheEntry, EntrySnapshot, Generations};
use super::metrics::{hit_rate, LatencyTracker, TierCounters, TierStats};
use super::persistence::{PersistedEntry, PersistenceBackend};
use super::policy::{EvictionPolicy, TierShape};
use crate::config::{TierConfig, TierKind};
use crate::error::{Error, Result};

/// Mutable part of a tier's configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TierSettings {
    pub capacity_bytes: u64,
    pub max_entries: usize,
    pub eviction_policy: EvictionPolicy,
    pub ttl_default: Option<Duration>,
    pub compression_threshold: Option<u64>,
    /// Largest single entry accepted (None = bounded by capacity only)
    pub max_entry_bytes: Option<u64>,
}

impl TierSettings {
    pub fn from_config(config: &TierConfig) -> Self {
        Self {
            capacity_bytes: config.capacity_bytes,
            max_entries: config.max_entries,
            eviction_policy: config.eviction_policy,
            ttl_default: config.ttl_default,
            compression_threshold: config.compression_threshold,
            max_entry_bytes: None,
        }
    }

    pub fn shape(&self) -> TierShape {
        TierShape {
            capacity_bytes: self.capacity_bytes,
            max_entry_bytes: self.max_entry_bytes,
        }
    }

    /// Whether a single entry of `size` bytes may ever be stored
    pub fn admits(&self, size: u64) -> bool {
        self.max_entries > 0
            && size <= self.capacity_bytes
            && self.max_entry_bytes.map_or(true, |max| size <= max)
    }
}

/// What a write did to the tier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// False when a newer write for the key was already present
    pub stored: bool,
    /// An older version of the key was replaced
    pub replaced: bool,
    /// Keys removed by the eviction policy
    pub evicted: Vec<String>,
    /// Expired keys purged to make room
    pub expired: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertMode {
    /// Caller write: replace older versions, evict as needed
    Overwrite,
    /// Backend rehydration: only if absent, evict as needed
    Fill,
    /// Promotion/demotion: only if absent and room exists without eviction
    Transfer,
}

enum Lookup {
    Hit(CacheEntry),
    Expired,
    Missing,
}

/// A bounded store of cache entries
pub struct Tier {
    id: String,
    kind: TierKind,
    latency: Duration,
    settings: RwLock<TierSettings>,
    index: RwLock<HashMap<String, CacheEntry>>,
    used_bytes: AtomicU64,
    entry_count: AtomicUsize,
    counters: TierCounters,
    lock_timeout: Duration,
    backend: Option<Arc<dyn PersistenceBackend>>,
    generations: Arc<Generations>,
}

impl Tier {
    /// Create a tier; `backend` is required for persistent tiers and ignored otherwise
    pub fn new(
        config: &TierConfig,
        lock_timeout: Duration,
        backend: Option<Arc<dyn PersistenceBackend>>,
        generations: Arc<Generations>,
    ) -> Result<Self> {
        let backend = match (config.kind, backend) {
            (TierKind::Persistent, Some(backend)) => Some(backend),
            (TierKind::Persistent, None) => {
                return Err(Error::Config(format!(
                    "persistent tier '{}' has no backend",
                    config.id
                )))
            }
            (TierKind::Memory, _) => None,
        };

        debug!(
            tier = %config.id,
            kind = %config.kind,
            capacity = config.capacity_bytes,
            max_entries = config.max_entries,
            policy = %config.eviction_policy,
            "Created tier"
        );

        Ok(Self {
            id: config.id.clone(),
            kind: config.kind,
            latency: config.latency,
            settings: RwLock::new(TierSettings::from_config(config)),
            index: RwLock::new(HashMap::new()),
            used_bytes: AtomicU64::new(0),
            entry_count: AtomicUsize::new(0),
            counters: TierCounters::default(),
            lock_timeout,
            backend,
            generations,
        })
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn kind(&self) -> TierKind {
        self.kind
    }

    #[inline]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_some()
    }

    pub fn settings(&self) -> TierSettings {
        self.settings.read().clone()
    }

    pub fn counters(&self) -> &TierCounters {
        &self.counters
    }

    /// Sum of stored entry sizes
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of capacity in use
    pub fn utilization(&self) -> f64 {
        let capacity = self.settings.read().capacity_bytes;
        if capacity == 0 {
            0.0
        } else {
            self.used_bytes() as f64 / capacity as f64
        }
    }

    pub fn stats(&self) -> TierStats {
        let settings = self.settings();
        let hits = self.counters.hits();
        let misses = self.counters.misses();
        let bytes_stored = self.used_bytes();
        TierStats {
            tier_id: self.id.clone(),
            kind: self.kind,
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            evictions: self.counters.evictions(),
            expirations: self.counters.expirations(),
            writes: self.counters.writes(),
            promotions: self.counters.promotions(),
            demotions: self.counters.demotions(),
            entries: self.len(),
            bytes_stored,
            capacity_bytes: settings.capacity_bytes,
            utilization: if settings.capacity_bytes == 0 {
                0.0
            } else {
                bytes_stored as f64 / settings.capacity_bytes as f64
            },
            avg_latency_us: self.counters.read_latency().as_micros() as u64,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a live entry, recording a hit or miss.
    ///
    /// Expired entries are purged here rather than waiting for the sweep.
    /// Persistent tiers fall back to their backend on an index miss; a backend
    /// failure is logged and reported as a miss.
    pub async fn get(&self, key: &str, now: u64) -> Result<Option<CacheEntry>> {
        let tracker = LatencyTracker::start();
        let ttl_default = self.settings.read().ttl_default;

        let result = match self.lookup(key, now, ttl_default)? {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Expired => {
                self.forget(key).await;
                None
            }
            Lookup::Missing => self.rehydrate(key, now, ttl_default).await?,
        };

        self.counters.record_read_latency(tracker.elapsed());
        match result {
            Some(_) => self.counters.record_hit(),
            None => self.counters.record_miss(),
        }
        Ok(result)
    }

    fn lookup(&self, key: &str, now: u64, ttl_default: Option<Duration>) -> Result<Lookup> {
        {
            let index = self.read_index()?;
            match index.get(key) {
                None => return Ok(Lookup::Missing),
                Some(entry) if !entry.is_expired(now, ttl_default) => {
                    entry.record_access(now, self.generations.next());
                    return Ok(Lookup::Hit(entry.clone()));
                }
                Some(_) => {}
            }
        }

        let mut index = self.write_index()?;
        match index.get(key) {
            Some(entry) if entry.is_expired(now, ttl_default) => {
                self.remove_locked(&mut index, key);
                self.counters.record_expirations(1);
                debug!(tier = %self.id, key, "Purged expired entry on read");
                Ok(Lookup::Expired)
            }
            Some(entry) => {
                entry.record_access(now, self.generations.next());
                Ok(Lookup::Hit(entry.clone()))
            }
            None => Ok(Lookup::Missing),
        }
    }

    async fn rehydrate(
        &self,
        key: &str,
        now: u64,
        ttl_default: Option<Duration>,
    ) -> Result<Option<CacheEntry>> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };

        let data = match backend.load(key).await {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(tier = %self.id, key, error = %e, "Persistence load failed, treating as miss");
                return Ok(None);
            }
        };

        let entry = match PersistedEntry::decode(&data) {
            Ok(persisted) => persisted.into_entry(key, now, self.generations.next()),
            Err(e) => {
                warn!(tier = %self.id, key, error = %e, "Discarding undecodable persisted entry");
                return Ok(None);
            }
        };

        if entry.is_expired(now, ttl_default) {
            self.counters.record_expirations(1);
            self.forget(key).await;
            return Ok(None);
        }

        entry.record_access(now, self.generations.next());
        let settings = self.settings();
        if settings.admits(entry.size()) {
            let outcome = self.insert(entry.clone(), now, &settings, InsertMode::Fill)?;
            self.forget_all(&outcome).await;
        }
        debug!(tier = %self.id, key, "Rehydrated entry from backend");
        Ok(Some(entry))
    }

    /// Current entry without touching counters or access metadata
    pub fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.read_index()?.get(key).cloned())
    }

    /// Whether a live copy of the key is indexed (no backend lookup)
    pub fn contains_live(&self, key: &str, now: u64) -> Result<bool> {
        let ttl_default = self.settings.read().ttl_default;
        Ok(self
            .read_index()?
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now, ttl_default)))
    }

    /// Whether a live copy exists, consulting the backend on an index miss.
    /// Counters and access metadata are left untouched.
    pub async fn contains(&self, key: &str, now: u64) -> Result<bool> {
        if self.contains_live(key, now)? {
            return Ok(true);
        }
        let Some(backend) = &self.backend else {
            return Ok(false);
        };
        if self.peek(key)?.is_some() {
            // Indexed but expired
            return Ok(false);
        }

        let ttl_default = self.settings.read().ttl_default;
        match backend.load(key).await {
            Ok(Some(data)) => Ok(PersistedEntry::decode(&data)
                .map(|persisted| {
                    let entry = persisted.into_entry(key, now, 0);
                    !entry.is_expired(now, ttl_default)
                })
                .unwrap_or(false)),
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(tier = %self.id, key, error = %e, "Persistence load failed, treating as absent");
                Ok(false)
            }
        }
    }

    /// Lazy, restartable iteration over the tier's entries
    pub fn scan(&self) -> Result<TierScan<'_>> {
        TierScan::new(self)
    }

    /// Metadata of every live entry
    pub fn snapshots(&self, now: u64) -> Result<Vec<EntrySnapshot>> {
        let ttl_default = self.settings.read().ttl_default;
        Ok(self
            .read_index()?
            .values()
            .filter(|entry| !entry.is_expired(now, ttl_default))
            .map(|entry| entry.snapshot(ttl_default))
            .collect())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.read_index()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store an entry, evicting as needed.
    ///
    /// Fails with [`Error::Capacity`] when the entry can never fit, and with
    /// [`Error::Persistence`] when a persistent tier's backend rejects the write.
    pub async fn put(&self, entry: CacheEntry, now: u64) -> Result<PutOutcome> {
        let settings = self.settings();
        self.check_admission(&entry, &settings)?;

        if let Some(backend) = &self.backend {
            let data = PersistedEntry::from_entry(&entry).encode()?;
            backend
                .save(entry.key(), data)
                .await
                .map_err(|e| Error::persistence(&self.id, e))?;
        }

        let key = entry.key().to_string();
        let outcome = match self.insert(entry, now, &settings, InsertMode::Overwrite) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.forget(&key).await;
                return Err(e);
            }
        };

        if outcome.stored {
            self.counters.record_write();
        }
        self.forget_all(&outcome).await;
        Ok(outcome)
    }

    /// Insert only if the key is absent and fits without evicting anything.
    /// Used when moving entries between tiers.
    pub async fn try_insert(&self, entry: CacheEntry, now: u64) -> Result<bool> {
        let settings = self.settings();
        if !settings.admits(entry.size()) {
            return Ok(false);
        }

        let key = entry.key().to_string();
        let generation = entry.generation();
        let persisted = match &self.backend {
            Some(_) => Some(PersistedEntry::from_entry(&entry).encode()?),
            None => None,
        };

        if !self.insert(entry, now, &settings, InsertMode::Transfer)?.stored {
            return Ok(false);
        }

        if let (Some(backend), Some(data)) = (&self.backend, persisted) {
            if let Err(e) = backend.save(&key, data).await {
                self.remove_matching(&key, |entry| entry.generation() == generation)?;
                return Err(Error::persistence(&self.id, e));
            }
        }
        Ok(true)
    }

    /// Replace an entry in place if it still carries `generation` and the new
    /// version fits without eviction.
    pub async fn replace_if_generation(
        &self,
        generation: u64,
        replacement: CacheEntry,
    ) -> Result<bool> {
        let settings = self.settings();
        let key = replacement.key().to_string();
        let persisted = match &self.backend {
            Some(_) => Some(PersistedEntry::from_entry(&replacement).encode()?),
            None => None,
        };

        {
            let mut index = self.write_index()?;
            let Some(current) = index.get(&key) else {
                return Ok(false);
            };
            if current.generation() != generation || !settings.admits(replacement.size()) {
                return Ok(false);
            }
            let projected = self.used_bytes() - current.size() + replacement.size();
            if projected > settings.capacity_bytes {
                return Ok(false);
            }
            self.remove_locked(&mut index, &key);
            self.insert_locked(&mut index, replacement);
        }

        if let (Some(backend), Some(data)) = (&self.backend, persisted) {
            backend
                .save(&key, data)
                .await
                .map_err(|e| Error::persistence(&self.id, e))?;
        }
        Ok(true)
    }

    fn check_admission(&self, entry: &CacheEntry, settings: &TierSettings) -> Result<()> {
        if settings.admits(entry.size()) {
            return Ok(());
        }
        debug!(
            tier = %self.id,
            key = entry.key(),
            size = entry.size(),
            capacity = settings.capacity_bytes,
            "Entry rejected by tier limits"
        );
        Err(Error::Capacity {
            key: entry.key().to_string(),
            size: entry.size(),
            largest_capacity: settings.capacity_bytes,
        })
    }

    fn insert(
        &self,
        entry: CacheEntry,
        now: u64,
        settings: &TierSettings,
        mode: InsertMode,
    ) -> Result<PutOutcome> {
        let mut index = self.write_index()?;
        let mut outcome = PutOutcome::default();

        if let Some(existing) = index.get(entry.key()) {
            let superseded = match mode {
                InsertMode::Overwrite => existing.generation() > entry.generation(),
                InsertMode::Fill | InsertMode::Transfer => true,
            };
            if superseded {
                return Ok(outcome);
            }
            self.remove_locked(&mut index, entry.key());
            outcome.replaced = true;
        }

        let size = entry.size();
        if !self.fits(&index, size, 1, settings) {
            if mode == InsertMode::Transfer {
                return Ok(outcome);
            }
            outcome.expired = self.purge_expired_locked(&mut index, now, settings);
            outcome.evicted = self.evict_locked(&mut index, size, 1, settings);
        }

        if !self.fits(&index, size, 1, settings) {
            return Err(Error::Capacity {
                key: entry.key().to_string(),
                size,
                largest_capacity: settings.capacity_bytes,
            });
        }

        self.insert_locked(&mut index, entry);
        outcome.stored = true;
        Ok(outcome)
    }

    /// Whether `bytes` more bytes in `slots` more entries stay within limits
    #[inline]
    fn fits(
        &self,
        index: &HashMap<String, CacheEntry>,
        bytes: u64,
        slots: usize,
        settings: &TierSettings,
    ) -> bool {
        self.used_bytes() + bytes <= settings.capacity_bytes
            && index.len() + slots <= settings.max_entries
    }

    fn purge_expired_locked(
        &self,
        index: &mut HashMap<String, CacheEntry>,
        now: u64,
        settings: &TierSettings,
    ) -> Vec<String> {
        let mut expired: Vec<String> = index
            .values()
            .filter(|entry| entry.is_expired(now, settings.ttl_default))
            .map(|entry| entry.key().to_string())
            .collect();
        expired.sort();

        for key in &expired {
            self.remove_locked(index, key);
        }
        if !expired.is_empty() {
            self.counters.record_expirations(expired.len() as u64);
        }
        expired
    }

    /// Remove entries in policy order until `incoming` bytes in `slots` entries fit
    fn evict_locked(
        &self,
        index: &mut HashMap<String, CacheEntry>,
        incoming: u64,
        slots: usize,
        settings: &TierSettings,
    ) -> Vec<String> {
        let snapshots = index
            .values()
            .map(|entry| entry.snapshot(settings.ttl_default))
            .collect();

        let mut evicted = Vec::new();
        for victim in settings.eviction_policy.eviction_order(snapshots) {
            if self.fits(index, incoming, slots, settings) {
                break;
            }
            self.remove_locked(index, &victim.key);
            debug!(tier = %self.id, key = %victim.key, policy = %settings.eviction_policy, "Evicted entry");
            evicted.push(victim.key);
        }
        if !evicted.is_empty() {
            self.counters.record_evictions(evicted.len() as u64);
        }
        evicted
    }

    fn insert_locked(&self, index: &mut HashMap<String, CacheEntry>, entry: CacheEntry) {
        // Later hits must sequence after this entry's own stamps
        self.generations.observe(entry.last_sequence());
        self.used_bytes.fetch_add(entry.size(), Ordering::Relaxed);
        if index.insert(entry.key().to_string(), entry).is_none() {
            self.entry_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn remove_locked(&self, index: &mut HashMap<String, CacheEntry>, key: &str) -> Option<CacheEntry> {
        let removed = index.remove(key)?;
        self.used_bytes.fetch_sub(removed.size(), Ordering::Relaxed);
        self.entry_count.fetch_sub(1, Ordering::Relaxed);
        Some(removed)
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Remove a key from the index and, for persistent tiers, the backend
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let removed = self.remove_matching(key, |_| true)?.is_some();
        let unpersisted = self.unpersist(key).await?;
        Ok(removed || unpersisted)
    }

    /// Remove a key only if it still carries `generation`
    pub async fn remove_if_generation(&self, key: &str, generation: u64) -> Result<bool> {
        let removed = self
            .remove_matching(key, |entry| entry.generation() == generation)?
            .is_some();
        if removed {
            self.unpersist(key).await?;
        }
        Ok(removed)
    }

    /// Remove any copy of a key written before `generation`
    pub async fn remove_if_older(&self, key: &str, generation: u64) -> Result<bool> {
        let removed = self
            .remove_matching(key, |entry| entry.generation() < generation)?
            .is_some();
        // An unindexed backend copy would otherwise resurface on rehydration
        if removed || self.is_persistent() {
            self.unpersist(key).await?;
        }
        Ok(removed)
    }

    fn remove_matching(
        &self,
        key: &str,
        predicate: impl FnOnce(&CacheEntry) -> bool,
    ) -> Result<Option<CacheEntry>> {
        let mut index = self.write_index()?;
        match index.get(key) {
            Some(entry) if predicate(entry) => Ok(self.remove_locked(&mut index, key)),
            _ => Ok(None),
        }
    }

    /// Purge every expired entry, one removal per lock acquisition
    pub async fn purge_expired(&self, now: u64) -> Result<Vec<String>> {
        let ttl_default = self.settings.read().ttl_default;
        let candidates: Vec<String> = {
            let index = self.read_index()?;
            let mut keys: Vec<String> = index
                .values()
                .filter(|entry| entry.is_expired(now, ttl_default))
                .map(|entry| entry.key().to_string())
                .collect();
            keys.sort();
            keys
        };

        let mut purged = Vec::with_capacity(candidates.len());
        for key in candidates {
            if self
                .remove_matching(&key, |entry| entry.is_expired(now, ttl_default))?
                .is_some()
            {
                self.forget(&key).await;
                purged.push(key);
            }
        }
        if !purged.is_empty() {
            self.counters.record_expirations(purged.len() as u64);
        }
        Ok(purged)
    }

    /// Drop every entry
    pub async fn clear(&self) -> Result<usize> {
        let drained: Vec<String> = {
            let mut index = self.write_index()?;
            let keys = index.keys().cloned().collect();
            index.clear();
            self.used_bytes.store(0, Ordering::Relaxed);
            self.entry_count.store(0, Ordering::Relaxed);
            keys
        };
        for key in &drained {
            self.unpersist(key).await?;
        }
        Ok(drained.len())
    }

    /// Change settings, evicting if the tier no longer satisfies its limits
    pub async fn reconfigure(
        &self,
        now: u64,
        update: impl FnOnce(&mut TierSettings),
    ) -> Result<Vec<String>> {
        let settings = {
            let mut settings = self.settings.write();
            update(&mut settings);
            settings.clone()
        };

        let outcome = {
            let mut index = self.write_index()?;
            let mut outcome = PutOutcome::default();
            if !self.fits(&index, 0, 0, &settings) {
                outcome.expired = self.purge_expired_locked(&mut index, now, &settings);
                outcome.evicted = self.evict_locked(&mut index, 0, 0, &settings);
            }
            outcome
        };
        self.forget_all(&outcome).await;

        let mut removed = outcome.expired;
        removed.extend(outcome.evicted);
        Ok(removed)
    }

    // =========================================================================
    // Backend helpers
    // =========================================================================

    async fn unpersist(&self, key: &str) -> Result<bool> {
        match &self.backend {
            Some(backend) => backend
                .delete(key)
                .await
                .map_err(|e| Error::persistence(&self.id, e)),
            None => Ok(false),
        }
    }

    /// Best-effort backend delete for entries the tier dropped on its own
    async fn forget(&self, key: &str) {
        if let Err(e) = self.unpersist(key).await {
            warn!(tier = %self.id, key, error = %e, "Failed to delete entry from backend");
        }
    }

    async fn forget_all(&self, outcome: &PutOutcome) {
        if self.backend.is_none() {
            return;
        }
        for key in outcome.evicted.iter().chain(&outcome.expired) {
            self.forget(key).await;
        }
    }

    // =========================================================================
    // Locking
    // =========================================================================

    fn read_index(&self) -> Result<RwLockReadGuard<'_, HashMap<String, CacheEntry>>> {
        self.index
            .try_read_for(self.lock_timeout)
            .ok_or_else(|| self.lock_timeout_error())
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, CacheEntry>>> {
        self.index
            .try_write_for(self.lock_timeout)
            .ok_or_else(|| self.lock_timeout_error())
    }

    fn lock_timeout_error(&self) -> Error {
        Error::LockTimeout {
            tier: self.id.clone(),
            waited: self.lock_timeout,
        }
    }
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("entries", &self.len())
            .field("used_bytes", &self.used_bytes())
            .finish()
    }
}

// =============================================================================
// Scan
// =============================================================================

/// Iterator over a tier's entries.
///
/// Keys are captured (sorted) when the scan starts; each step re-reads the
/// index, so entries removed since then are skipped and nothing is mutated.
pub struct TierScan<'a> {
    tier: &'a Tier,
    keys: Vec<String>,
    position: usize,
}

impl<'a> TierScan<'a> {
    fn new(tier: &'a Tier) -> Result<Self> {
        Ok(Self {
            tier,
            keys: tier.keys()?,
            position: 0,
        })
    }

    /// Start over from a fresh key snapshot
    pub fn restart(&mut self) -> Result<()> {
        self.keys = self.tier.keys()?;
        self.position = 0;
        Ok(())
    }
}

impl Iterator for TierScan<'_> {
    type Item = Result<CacheEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position < self.keys.len() {
            let key = &self.keys[self.position];
            self.position += 1;
            match self.tier.peek(key) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
