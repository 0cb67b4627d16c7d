//! Cache Entry Types
//!
//! An entry is immutable once written except for its access counters, which
//! are atomics so hits can be recorded under a shared tier lock.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::serializer::Payload;

/// Per-write options supplied by callers of `set`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Time-to-live; `None` uses the owning tier's default
    pub ttl: Option<Duration>,
    /// Labels for bulk invalidation
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Logical clock shared by every tier of one cache.
///
/// Issues write generations and access sequence numbers from one counter, so
/// writes and hits are totally ordered even within a single millisecond.
#[derive(Debug, Default)]
pub struct Generations {
    next: AtomicU64,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next tick; strictly increasing, starting at 1
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Move past a tick issued elsewhere (rehydrated or hand-built entries)
    pub fn observe(&self, tick: u64) {
        self.next.fetch_max(tick, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the metadata eviction policies order by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub key: String,
    pub size: u64,
    pub created_at: u64,
    pub last_accessed: u64,
    pub access_count: u64,
    /// Write generation; insertion order
    pub generation: u64,
    /// Latest access sequence; recency order
    pub last_sequence: u64,
    /// Absolute expiry (epoch millis) resolved against the tier default
    pub expires_at: Option<u64>,
}

/// Cache entry containing the stored payload and its metadata
pub struct CacheEntry {
    key: String,
    payload: Bytes,
    compressed: bool,
    encrypted: bool,
    /// Offloaded compression timed out; the sweep retries it
    compression_pending: bool,
    tags: Arc<BTreeSet<String>>,
    ttl: Option<Duration>,
    created_at: u64,
    last_accessed: AtomicU64,
    /// Write generation until the first hit, then the latest access sequence
    last_sequence: AtomicU64,
    access_count: AtomicU64,
    /// Write generation; doubles as the ownership token for deferred updates
    generation: u64,
}

impl CacheEntry {
    /// Create a new entry; size is the stored payload length
    pub fn new(
        key: impl Into<String>,
        payload: Payload,
        options: &SetOptions,
        now: u64,
        generation: u64,
    ) -> Self {
        Self {
            key: key.into(),
            compressed: payload.is_compressed(),
            encrypted: payload.is_encrypted(),
            payload: payload.bytes().clone(),
            compression_pending: false,
            tags: Arc::new(options.tags.iter().cloned().collect()),
            ttl: options.ttl,
            created_at: now,
            last_accessed: AtomicU64::new(now),
            last_sequence: AtomicU64::new(generation),
            access_count: AtomicU64::new(0),
            generation,
        }
    }

    pub(crate) fn with_compression_pending(mut self, pending: bool) -> Self {
        self.compression_pending = pending;
        self
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored bytes (after compression and encryption)
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.payload
    }

    /// Stored size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Stored payload with its transform flags
    pub fn payload(&self) -> Payload {
        Payload::from_parts(self.payload.clone(), self.compressed, self.encrypted)
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    #[inline]
    pub fn compression_pending(&self) -> bool {
        self.compression_pending
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Whether any of `tags` is attached to this entry
    pub fn has_any_tag(&self, tags: &BTreeSet<String>) -> bool {
        !self.tags.is_disjoint(tags)
    }

    /// Explicit TTL, if one was given at write time
    #[inline]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    #[inline]
    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Absolute expiry in epoch millis, falling back to `default_ttl`
    pub fn expires_at(&self, default_ttl: Option<Duration>) -> Option<u64> {
        self.ttl
            .or(default_ttl)
            .map(|ttl| {
                let ttl = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                self.created_at.saturating_add(ttl)
            })
    }

    /// Expired once `now >= created_at + ttl`
    #[inline]
    pub fn is_expired(&self, now: u64, default_ttl: Option<Duration>) -> bool {
        self.expires_at(default_ttl)
            .is_some_and(|deadline| now >= deadline)
    }

    /// Record an access stamped with `sequence` and return the new count
    #[inline]
    pub fn record_access(&self, now: u64, sequence: u64) -> u64 {
        self.last_accessed.fetch_max(now, Ordering::Relaxed);
        self.last_sequence.fetch_max(sequence, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self, default_ttl: Option<Duration>) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            size: self.size(),
            created_at: self.created_at,
            last_accessed: self.last_accessed(),
            access_count: self.access_count(),
            generation: self.generation,
            last_sequence: self.last_sequence(),
            expires_at: self.expires_at(default_ttl),
        }
    }

    /// Same logical write with a transformed payload (deferred compression)
    pub(crate) fn with_payload(&self, payload: Payload) -> Self {
        let mut next = self.clone();
        next.compressed = payload.is_compressed();
        next.encrypted = payload.is_encrypted();
        next.payload = payload.bytes().clone();
        next.compression_pending = false;
        next
    }

    /// Restart the TTL clock at `now`
    pub(crate) fn refreshed(&self, now: u64) -> Self {
        let mut next = self.clone();
        next.created_at = now;
        next
    }

    /// Replace the explicit TTL
    pub(crate) fn with_ttl(&self, ttl: Option<Duration>) -> Self {
        let mut next = self.clone();
        next.ttl = ttl;
        next
    }

    /// Rebuild an entry from persisted parts
    pub(crate) fn restore(
        key: String,
        payload: Payload,
        tags: BTreeSet<String>,
        ttl: Option<Duration>,
        created_at: u64,
        now: u64,
        generation: u64,
    ) -> Self {
        Self {
            key,
            compressed: payload.is_compressed(),
            encrypted: payload.is_encrypted(),
            payload: payload.bytes().clone(),
            compression_pending: false,
            tags: Arc::new(tags),
            ttl,
            created_at,
            last_accessed: AtomicU64::new(now),
            last_sequence: AtomicU64::new(generation),
            access_count: AtomicU64::new(0),
            generation,
        }
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            payload: self.payload.clone(),
            compressed: self.compressed,
            encrypted: self.encrypted,
            compression_pending: self.compression_pending,
            tags: Arc::clone(&self.tags),
            ttl: self.ttl,
            created_at: self.created_at,
            last_accessed: AtomicU64::new(self.last_accessed()),
            last_sequence: AtomicU64::new(self.last_sequence()),
            access_count: AtomicU64::new(self.access_count()),
            generation: self.generation,
        }
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("size", &self.size())
            .field("access_count", &self.access_count())
            .field("generation", &self.generation)
            .field("compressed", &self.compressed)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(ttl: Option<Duration>) -> CacheEntry {
        let options = SetOptions {
            ttl,
            tags: vec!["x".into(), "y".into()],
        };
        CacheEntry::new("k", Payload::plain(&b"hello"[..]), &options, 1_000, 7)
    }

    #[test]
    fn test_entry_creation() {
        let entry = make_entry(None);
        assert_eq!(entry.key(), "k");
        assert_eq!(entry.size(), 5);
        assert_eq!(entry.access_count(), 0);
        assert_eq!(entry.created_at(), 1_000);
        assert_eq!(entry.last_accessed(), 1_000);
        assert_eq!(entry.generation(), 7);
        assert!(!entry.is_compressed());
    }

    #[test]
    fn test_generations_increase() {
        let generations = Generations::new();
        assert_eq!(generations.next(), 1);
        assert_eq!(generations.next(), 2);

        generations.observe(10);
        assert_eq!(generations.next(), 11);
        generations.observe(3);
        assert_eq!(generations.next(), 12);
    }

    #[test]
    fn test_size_tracks_stored_payload() {
        let payload = Payload::from_parts(Bytes::from_static(b"abc"), true, false);
        let entry = CacheEntry::new("k", payload, &SetOptions::new(), 0, 1);
        assert_eq!(entry.size(), 3);
        assert!(entry.is_compressed());
    }

    #[test]
    fn test_access_tracking() {
        let entry = make_entry(None);
        assert_eq!(entry.last_sequence(), 7);
        assert_eq!(entry.record_access(1_500, 8), 1);
        assert_eq!(entry.record_access(2_000, 9), 2);
        assert_eq!(entry.last_accessed(), 2_000);
        assert_eq!(entry.last_sequence(), 9);

        // Out-of-order stamps never move recency backwards
        entry.record_access(1_200, 8);
        assert_eq!(entry.last_accessed(), 2_000);
        assert_eq!(entry.last_sequence(), 9);
    }

    #[test]
    fn test_snapshot_carries_logical_order() {
        let entry = make_entry(None);
        entry.record_access(1_000, 12);
        let snapshot = entry.snapshot(None);
        assert_eq!(snapshot.generation, 7);
        assert_eq!(snapshot.last_sequence, 12);
        assert_eq!(snapshot.last_accessed, 1_000);
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = make_entry(Some(Duration::from_millis(500)));
        assert!(!entry.is_expired(1_499, None));
        assert!(entry.is_expired(1_500, None));
    }

    #[test]
    fn test_tier_default_ttl_applies_when_absent() {
        let entry = make_entry(None);
        assert!(!entry.is_expired(u64::MAX, None));
        assert!(entry.is_expired(2_000, Some(Duration::from_secs(1))));

        let explicit = make_entry(Some(Duration::from_secs(10)));
        assert!(!explicit.is_expired(2_000, Some(Duration::from_secs(1))));
    }

    #[test]
    fn test_tags() {
        let entry = make_entry(None);
        let wanted: BTreeSet<String> = ["y".to_string(), "z".to_string()].into();
        assert!(entry.has_any_tag(&wanted));

        let other: BTreeSet<String> = ["z".to_string()].into();
        assert!(!entry.has_any_tag(&other));
    }

    #[test]
    fn test_clone_copies_counters() {
        let entry = make_entry(None);
        entry.record_access(1_100, 8);
        entry.record_access(1_200, 9);
        let cloned = entry.clone();
        assert_eq!(cloned.access_count(), 2);
        assert_eq!(cloned.last_sequence(), 9);
        assert_eq!(cloned.last_accessed(), 1_200);
        assert_eq!(cloned.generation(), entry.generation());
    }

    #[test]
    fn test_derived_entries_keep_generation() {
        let entry = make_entry(Some(Duration::from_secs(1)));
        let refreshed = entry.refreshed(5_000);
        assert_eq!(refreshed.created_at(), 5_000);
        assert_eq!(refreshed.generation(), entry.generation());

        let extended = entry.with_ttl(Some(Duration::from_secs(60)));
        assert_eq!(extended.ttl(), Some(Duration::from_secs(60)));

        let recompressed = entry
            .with_compression_pending(true)
            .with_payload(Payload::from_parts(Bytes::from_static(b"z"), true, false));
        assert!(!recompressed.compression_pending());
        assert!(recompressed.is_compressed());
        assert_eq!(recompressed.size(), 1);
    }
}
