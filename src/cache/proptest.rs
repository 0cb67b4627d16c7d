//! Property-Based Tests for the Tiered Cache
//!
//! # Test Properties
//!
//! 1. **Capacity**: no sequence of writes leaves a tier over its byte or entry limit
//! 2. **Accounting**: a tier's byte counter equals the sum of its entry sizes
//! 3. **Roundtrip**: get(set(v)) = v through compression and encryption
//! 4. **Determinism**: eviction order depends only on entry metadata

#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use super::clock::ManualClock;
use super::entry::{CacheEntry, EntrySnapshot, Generations, SetOptions};
use super::manager::TierManager;
use super::policy::EvictionPolicy;
use super::serializer::test_support::XorCipher;
use super::serializer::Payload;
use super::tier::Tier;
use crate::config::{CacheConfig, TierConfig};
use crate::error::Error;

// =============================================================================
// Property Strategies
// =============================================================================

fn policy_strategy() -> impl Strategy<Value = EvictionPolicy> {
    prop_oneof![
        Just(EvictionPolicy::Lru),
        Just(EvictionPolicy::Lfu),
        Just(EvictionPolicy::Fifo),
        Just(EvictionPolicy::TtlFirst),
    ]
}

/// (key index, payload size, optional TTL in ms)
fn write_strategy() -> impl Strategy<Value = Vec<(u8, usize, Option<u64>)>> {
    prop::collection::vec((0u8..24, 1usize..400, prop::option::of(1u64..50)), 1..80)
}

fn snapshot_strategy() -> impl Strategy<Value = Vec<EntrySnapshot>> {
    prop::collection::vec(
        (0u64..5, 0u64..5, 0u64..5, prop::option::of(0u64..5)),
        1..20,
    )
    .prop_map(|fields| {
        fields
            .into_iter()
            .enumerate()
            .map(|(i, (created_at, last_accessed, access_count, expires_at))| EntrySnapshot {
                key: format!("k{i:02}"),
                size: 1,
                created_at,
                last_accessed,
                access_count,
                generation: created_at,
                last_sequence: last_accessed,
                expires_at,
            })
            .collect()
    })
}

// =============================================================================
// Capacity Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Writes never push a tier past its limits, and accounting stays exact
    #[test]
    fn prop_tier_respects_limits(
        policy in policy_strategy(),
        writes in write_strategy(),
    ) {
        let capacity = 1_000;
        let max_entries = 6;
        let config = TierConfig::memory("prop", capacity, max_entries).with_policy(policy);
        let generations = Arc::new(Generations::new());
        let tier = Tier::new(&config, Duration::from_millis(50), None, generations.clone()).unwrap();

        tokio_test::block_on(async {
            for (step, (key, size, ttl)) in writes.into_iter().enumerate() {
                let now = step as u64 * 10;
                let mut options = SetOptions::new();
                if let Some(ttl) = ttl {
                    options = options.ttl(Duration::from_millis(ttl));
                }
                let entry = CacheEntry::new(
                    format!("key-{key}"),
                    Payload::plain(vec![0u8; size]),
                    &options,
                    now,
                    generations.next(),
                );

                match tier.put(entry, now).await {
                    Ok(_) | Err(Error::Capacity { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
                if key % 3 == 0 {
                    tier.get(&format!("key-{key}"), now).await.unwrap();
                }

                assert!(tier.used_bytes() <= capacity);
                assert!(tier.len() <= max_entries);

                let stored: u64 = tier.scan().unwrap().map(|e| e.unwrap().size()).sum();
                assert_eq!(stored, tier.used_bytes());
            }
        });
    }
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Values come back unchanged whichever transforms were applied
    #[test]
    fn prop_set_get_roundtrip(
        value in prop::collection::vec(any::<u8>(), 0..4_000),
        threshold in prop::option::of(0u64..2_000),
        encrypt in any::<bool>(),
    ) {
        let mut tier = TierConfig::memory("only", 1_000_000, 100);
        tier.compression_threshold = threshold;
        let mut builder = TierManager::builder(CacheConfig::with_tiers(vec![tier]))
            .clock(Arc::new(ManualClock::new(0)));
        if encrypt {
            builder = builder.cipher(Arc::new(XorCipher(0x5a)));
        }
        let cache = builder.build().unwrap();

        let restored: Option<Vec<u8>> = tokio_test::block_on(async {
            cache.set("k", &value, SetOptions::new()).await.unwrap();
            cache.get("k").await.unwrap()
        });
        prop_assert_eq!(restored, Some(value));
    }
}

// =============================================================================
// Determinism Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Eviction order ignores the order candidates were collected in
    #[test]
    fn prop_eviction_order_is_deterministic(
        policy in policy_strategy(),
        snapshots in snapshot_strategy(),
    ) {
        let mut reversed = snapshots.clone();
        reversed.reverse();

        let forward: Vec<String> = policy.eviction_order(snapshots).into_iter().map(|s| s.key).collect();
        let backward: Vec<String> = policy.eviction_order(reversed).into_iter().map(|s| s.key).collect();
        prop_assert_eq!(forward, backward);
    }
}
