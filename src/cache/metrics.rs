//! Cache Metrics Collection
//!
//! Per-tier counters and the stats snapshots exposed to callers. Hit rates are
//! derived from the raw counters whenever a snapshot is taken.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::TierKind;

/// Hit rate from raw counters (0.0 when nothing was requested)
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Atomic counters owned by a single tier
#[derive(Debug, Default)]
pub struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    writes: AtomicU64,
    promotions_in: AtomicU64,
    demotions_in: AtomicU64,
    // Microseconds, exponential moving average
    read_latency_us: AtomicU64,
}

impl TierCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion(&self) {
        self.demotions_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_latency(&self, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = self.read_latency_us.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if self
                .read_latency_us
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions_in.load(Ordering::Relaxed)
    }

    pub fn demotions(&self) -> u64 {
        self.demotions_in.load(Ordering::Relaxed)
    }

    pub fn read_latency(&self) -> Duration {
        Duration::from_micros(self.read_latency_us.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.expirations,
            &self.writes,
            &self.promotions_in,
            &self.demotions_in,
            &self.read_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time statistics for one tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStats {
    pub tier_id: String,
    pub kind: TierKind,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub writes: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub entries: usize,
    pub bytes_stored: u64,
    pub capacity_bytes: u64,
    pub utilization: f64,
    pub avg_latency_us: u64,
}

impl TierStats {
    /// Average stored entry size
    pub fn avg_entry_size(&self) -> u64 {
        if self.entries == 0 {
            0
        } else {
            self.bytes_stored / self.entries as u64
        }
    }
}

/// Whole-cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups answered by any tier
    pub hits: u64,
    /// Lookups no tier could answer
    pub misses: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub bytes_stored: u64,
    pub tiers: Vec<TierStats>,
}

/// Cache-wide lookup counters kept by the manager
#[derive(Debug, Default)]
pub(crate) struct LookupCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LookupCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summarize(&self, tiers: Vec<TierStats>) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            entries: tiers.iter().map(|t| t.entries).sum(),
            bytes_stored: tiers.iter().map(|t| t.bytes_stored).sum(),
            tiers,
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Latency tracker for measuring operation times
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
