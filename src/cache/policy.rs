//! Cache Eviction and Placement Policies
//!
//! Eviction policies are pure orderings over entry snapshots. Placement decides
//! which tiers a new entry may live in and when entries move between tiers.

use serde::{Deserialize, Serialize};

use super::entry::EntrySnapshot;
use crate::error::{Error, Result};

// =============================================================================
// Eviction Policy
// =============================================================================

/// Strategy ordering a tier's entries for removal under pressure.
///
/// Ties are broken by lexicographic key order so identical runs evict
/// identical entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently used: latest access sequence ascending
    #[default]
    Lru,
    /// Least frequently used: `access_count` ascending
    Lfu,
    /// First in, first out: write generation ascending
    Fifo,
    /// Nearest expiry first: `created_at + ttl` ascending, no-TTL entries last
    TtlFirst,
}

impl EvictionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::TtlFirst => "ttl_first",
        }
    }

    /// Primary sort key; smaller evicts first
    fn rank(&self, entry: &EntrySnapshot) -> u64 {
        match self {
            EvictionPolicy::Lru => entry.last_sequence,
            EvictionPolicy::Lfu => entry.access_count,
            EvictionPolicy::Fifo => entry.generation,
            EvictionPolicy::TtlFirst => entry.expires_at.unwrap_or(u64::MAX),
        }
    }

    /// Order candidates, most evictable first
    pub fn eviction_order(&self, mut entries: Vec<EntrySnapshot>) -> Vec<EntrySnapshot> {
        entries.sort_by(|a, b| {
            self.rank(a)
                .cmp(&self.rank(b))
                .then_with(|| a.key.cmp(&b.key))
        });
        entries
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Placement Policy
// =============================================================================

/// Size/latency heuristics for initial placement, promotion and demotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementPolicy {
    /// Entries at or below this size prefer the fastest tier
    pub small_entry_bytes: u64,
    /// Larger entries skip tiers where they would exceed this share of capacity
    pub max_entry_fraction: f64,
    /// Hits in a slower tier needed before promotion
    pub promotion_threshold: u64,
    /// Utilization at which rebalance starts demoting cold entries
    pub demotion_high_watermark: f64,
    /// Utilization at which rebalance stops demoting
    pub demotion_low_watermark: f64,
    /// Cold = access count below this fraction of the tier average
    pub cold_access_ratio: f64,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self::balanced()
    }
}

impl PlacementPolicy {
    /// Balanced placement (default)
    pub fn balanced() -> Self {
        Self {
            small_entry_bytes: 4 * 1024,
            max_entry_fraction: 0.25,
            promotion_threshold: 1,
            demotion_high_watermark: 0.90,
            demotion_low_watermark: 0.75,
            cold_access_ratio: 0.5,
        }
    }

    /// Promote only entries with repeated slow-tier hits
    pub fn conservative() -> Self {
        Self {
            promotion_threshold: 3,
            max_entry_fraction: 0.1,
            ..Self::balanced()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_entry_fraction > 0.0 && self.max_entry_fraction <= 1.0) {
            return Err(Error::Config(
                "placement.max_entry_fraction must be in (0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.demotion_low_watermark)
            || !(0.0..=1.0).contains(&self.demotion_high_watermark)
            || self.demotion_low_watermark > self.demotion_high_watermark
        {
            return Err(Error::Config(
                "placement watermarks must satisfy 0 <= low <= high <= 1".into(),
            ));
        }
        if self.cold_access_ratio < 0.0 {
            return Err(Error::Config(
                "placement.cold_access_ratio must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Whether an entry may be stored in a tier at all
    pub fn fits(&self, size: u64, tier: &TierShape) -> bool {
        size <= tier.capacity_bytes && tier.max_entry_bytes.map_or(true, |max| size <= max)
    }

    /// Whether a tier is a preferred home for an entry of this size
    pub fn prefers(&self, size: u64, tier: &TierShape) -> bool {
        self.fits(size, tier)
            && (size <= self.small_entry_bytes
                || size as f64 <= tier.capacity_bytes as f64 * self.max_entry_fraction)
    }

    /// Tiers to try for a new entry, in order.
    ///
    /// Starts at the fastest preferred tier and continues through slower ones;
    /// if no tier is preferred, every tier the entry fits in is a fallback.
    pub fn candidate_tiers(&self, size: u64, tiers: &[TierShape]) -> Vec<usize> {
        match tiers.iter().position(|t| self.prefers(size, t)) {
            Some(start) => (start..tiers.len())
                .filter(|&i| self.fits(size, &tiers[i]))
                .collect(),
            None => (0..tiers.len())
                .filter(|&i| self.fits(size, &tiers[i]))
                .collect(),
        }
    }

    pub fn should_promote(&self, access_count: u64) -> bool {
        access_count >= self.promotion_threshold
    }
}

/// The parts of a tier's settings placement looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierShape {
    pub capacity_bytes: u64,
    pub max_entry_bytes: Option<u64>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(key: &str, created: u64, accessed: u64, count: u64, expires: Option<u64>) -> EntrySnapshot {
        EntrySnapshot {
            key: key.to_string(),
            size: 10,
            created_at: created,
            last_accessed: accessed,
            access_count: count,
            generation: created,
            last_sequence: accessed,
            expires_at: expires,
        }
    }

    fn keys(order: Vec<EntrySnapshot>) -> Vec<String> {
        order.into_iter().map(|s| s.key).collect()
    }

    fn sample() -> Vec<EntrySnapshot> {
        vec![
            snap("a", 10, 50, 5, Some(500)),
            snap("b", 20, 30, 1, None),
            snap("c", 5, 40, 3, Some(100)),
        ]
    }

    #[test]
    fn test_lru_orders_by_last_access() {
        assert_eq!(keys(EvictionPolicy::Lru.eviction_order(sample())), ["b", "c", "a"]);
    }

    #[test]
    fn test_lfu_orders_by_access_count() {
        assert_eq!(keys(EvictionPolicy::Lfu.eviction_order(sample())), ["b", "c", "a"]);
    }

    #[test]
    fn test_fifo_orders_by_creation() {
        assert_eq!(keys(EvictionPolicy::Fifo.eviction_order(sample())), ["c", "a", "b"]);
    }

    #[test]
    fn test_ttl_first_puts_unbounded_last() {
        assert_eq!(
            keys(EvictionPolicy::TtlFirst.eviction_order(sample())),
            ["c", "a", "b"]
        );
    }

    #[test]
    fn test_logical_order_beats_equal_timestamps() {
        // Same millisecond for every write and hit; only the sequence differs
        let mut a = snap("a", 1, 3, 1, None);
        let mut b = snap("b", 2, 2, 0, None);
        for s in [&mut a, &mut b] {
            s.created_at = 1_000;
            s.last_accessed = 1_000;
        }
        let entries = vec![a, b];
        assert_eq!(keys(EvictionPolicy::Lru.eviction_order(entries.clone())), ["b", "a"]);
        assert_eq!(keys(EvictionPolicy::Fifo.eviction_order(entries)), ["a", "b"]);
    }

    #[test]
    fn test_ties_break_by_key() {
        let tied = vec![
            snap("zeta", 0, 0, 0, None),
            snap("alpha", 0, 0, 0, None),
            snap("mid", 0, 0, 0, None),
        ];
        for policy in [
            EvictionPolicy::Lru,
            EvictionPolicy::Lfu,
            EvictionPolicy::Fifo,
            EvictionPolicy::TtlFirst,
        ] {
            assert_eq!(keys(policy.eviction_order(tied.clone())), ["alpha", "mid", "zeta"]);
        }
    }

    #[test]
    fn test_policy_serde_names() {
        let policy: EvictionPolicy = serde_yaml::from_str("ttl_first").unwrap();
        assert_eq!(policy, EvictionPolicy::TtlFirst);
        assert_eq!(EvictionPolicy::Lfu.to_string(), "lfu");
    }

    fn shapes() -> Vec<TierShape> {
        vec![
            TierShape { capacity_bytes: 1_000, max_entry_bytes: None },
            TierShape { capacity_bytes: 100_000, max_entry_bytes: None },
            TierShape { capacity_bytes: 10_000_000, max_entry_bytes: None },
        ]
    }

    #[test]
    fn test_small_entries_start_at_fastest() {
        let policy = PlacementPolicy::balanced();
        assert_eq!(policy.candidate_tiers(100, &shapes()), vec![0, 1, 2]);
    }

    #[test]
    fn test_large_entries_skip_faster_tiers() {
        let policy = PlacementPolicy::balanced();
        // 20KB > 4KB small threshold and > 25% of 1KB, fits 25% of 100KB
        assert_eq!(policy.candidate_tiers(20_000, &shapes()), vec![1, 2]);
        // 50KB exceeds 25% of tier 1 as well
        assert_eq!(policy.candidate_tiers(50_000, &shapes()), vec![2]);
    }

    #[test]
    fn test_oversized_entries_fall_back_to_any_fitting_tier() {
        let mut policy = PlacementPolicy::balanced();
        policy.small_entry_bytes = 0;
        let tiers = vec![TierShape { capacity_bytes: 1_000, max_entry_bytes: None }];
        assert_eq!(policy.candidate_tiers(900, &tiers), vec![0]);
        assert!(policy.candidate_tiers(2_000, &tiers).is_empty());
    }

    #[test]
    fn test_max_entry_bytes_is_strict() {
        let policy = PlacementPolicy::balanced();
        let tiers = vec![
            TierShape { capacity_bytes: 1_000_000, max_entry_bytes: Some(100) },
            TierShape { capacity_bytes: 1_000_000, max_entry_bytes: None },
        ];
        assert_eq!(policy.candidate_tiers(50, &tiers), vec![0, 1]);
        assert_eq!(policy.candidate_tiers(500, &tiers), vec![1]);
    }

    #[test]
    fn test_validate() {
        assert!(PlacementPolicy::balanced().validate().is_ok());
        assert!(PlacementPolicy::conservative().validate().is_ok());

        let mut bad = PlacementPolicy::balanced();
        bad.max_entry_fraction = 0.0;
        assert!(bad.validate().is_err());

        let mut inverted = PlacementPolicy::balanced();
        inverted.demotion_low_watermark = 0.95;
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_promotion_threshold() {
        let policy = PlacementPolicy::conservative();
        assert!(!policy.should_promote(2));
        assert!(policy.should_promote(3));
    }
}
