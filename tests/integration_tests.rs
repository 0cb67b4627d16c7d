//! tiercache Integration Tests
//!
//! Drives the public API end to end:
//! - Cache properties: capacity, TTL, eviction order, invalidation, round trip,
//!   promotion and concurrent writers
//! - Persistent tiers over an injected backend
//! - Invalidation rules and the optimization advisor

use std::sync::Arc;
use std::time::Duration;

use tiercache::cache::{ManualClock, SetOptions, TierManager};
use tiercache::config::{CacheConfig, TierConfig};

fn hot_warm(hot_capacity: u64, warm_capacity: u64) -> CacheConfig {
    CacheConfig::with_tiers(vec![
        TierConfig::memory("hot", hot_capacity, 10_000).with_latency(Duration::from_micros(1)),
        TierConfig::memory("warm", warm_capacity, 10_000)
            .with_latency(Duration::from_micros(100)),
    ])
}

fn build(config: CacheConfig) -> (TierManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let cache = TierManager::builder(config)
        .clock(clock.clone())
        .build()
        .unwrap();
    (cache, clock)
}

// =============================================================================
// Cache Properties
// =============================================================================

mod property_tests {
    use super::*;
    use tiercache::cache::{EvictionPolicy, PayloadCipher};
    use tiercache::Result;

    #[tokio::test]
    async fn test_capacity_invariant_holds_after_every_set() {
        let (cache, clock) = build(hot_warm(2_000, 8_000));

        for i in 0..200u64 {
            let size = ((i * 37) % 900 + 10) as usize;
            cache
                .set(&format!("key:{i}"), &"x".repeat(size), SetOptions::new())
                .await
                .unwrap();
            clock.advance(Duration::from_millis(1));

            for stats in cache.all_stats() {
                assert!(
                    stats.bytes_stored <= stats.capacity_bytes,
                    "tier {} holds {} of {} bytes",
                    stats.tier_id,
                    stats.bytes_stored,
                    stats.capacity_bytes
                );
            }
        }
    }

    #[tokio::test]
    async fn test_ttl_expiry_purges_entry() {
        let (cache, clock) = build(hot_warm(10_000, 100_000));
        cache
            .set("session", &"token", SetOptions::new().ttl(Duration::from_secs(30)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(29));
        assert_eq!(
            cache.get::<String>("session").await.unwrap().as_deref(),
            Some("token")
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get::<String>("session").await.unwrap(), None);
        assert!(!cache.has("session").await.unwrap());
        assert_eq!(cache.stats("hot").unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_tier_default_ttl_applies_to_entries_without_ttl() {
        let config = CacheConfig::with_tiers(vec![TierConfig::memory("only", 10_000, 100)
            .with_ttl_default(Duration::from_secs(10))]);
        let (cache, clock) = build(config);

        cache.set("k", &1u8, SetOptions::new()).await.unwrap();
        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get::<u8>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_used() {
        let config = CacheConfig::with_tiers(vec![
            TierConfig::memory("only", 1_000_000, 2).with_policy(EvictionPolicy::Lru)
        ]);
        let (cache, clock) = build(config);

        cache.set("a", &1u8, SetOptions::new()).await.unwrap();
        clock.advance(Duration::from_millis(1));
        cache.set("b", &2u8, SetOptions::new()).await.unwrap();
        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get::<u8>("a").await.unwrap(), Some(1));
        clock.advance(Duration::from_millis(1));
        cache.set("c", &3u8, SetOptions::new()).await.unwrap();

        assert!(cache.has("a").await.unwrap());
        assert!(!cache.has("b").await.unwrap());
        assert!(cache.has("c").await.unwrap());
        assert_eq!(cache.stats("only").unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_lru_order_holds_within_one_millisecond() {
        let config = CacheConfig::with_tiers(vec![
            TierConfig::memory("only", 1_000_000, 2).with_policy(EvictionPolicy::Lru)
        ]);
        // The clock never moves; recency comes from operation order alone
        let (cache, _) = build(config);

        cache.set("a", &1u8, SetOptions::new()).await.unwrap();
        cache.set("b", &2u8, SetOptions::new()).await.unwrap();
        assert_eq!(cache.get::<u8>("a").await.unwrap(), Some(1));
        cache.set("c", &3u8, SetOptions::new()).await.unwrap();

        assert!(cache.has("a").await.unwrap());
        assert!(!cache.has("b").await.unwrap());
        assert!(cache.has("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_lru_order_with_system_clock() {
        for round in 0..50 {
            let cache = TierManager::new(CacheConfig::with_tiers(vec![
                TierConfig::memory("only", 1_000_000, 2).with_policy(EvictionPolicy::Lru),
            ]))
            .unwrap();

            cache.set("a", &1u8, SetOptions::new()).await.unwrap();
            cache.set("b", &2u8, SetOptions::new()).await.unwrap();
            cache.get::<u8>("a").await.unwrap();
            cache.set("c", &3u8, SetOptions::new()).await.unwrap();

            assert!(cache.has("a").await.unwrap(), "a evicted in round {round}");
            assert!(!cache.has("b").await.unwrap(), "b kept in round {round}");
        }
    }

    #[tokio::test]
    async fn test_invalidate_by_tags() {
        let (cache, _) = build(hot_warm(10_000, 100_000));
        cache.set("k1", "v", SetOptions::new().tags(["x"])).await.unwrap();
        cache.set("k2", "v", SetOptions::new().tags(["x", "y"])).await.unwrap();
        cache.set("k3", "v", SetOptions::new().tags(["y"])).await.unwrap();

        let removed = cache.invalidate_by_tags(&["x".to_string()]).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!cache.has("k1").await.unwrap());
        assert!(!cache.has("k2").await.unwrap());
        assert!(cache.has("k3").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_by_pattern() {
        let (cache, _) = build(hot_warm(10_000, 100_000));
        cache.set("user:1", &1u8, SetOptions::new()).await.unwrap();
        cache.set("user:2", &2u8, SetOptions::new()).await.unwrap();
        cache.set("order:1", &3u8, SetOptions::new()).await.unwrap();

        assert_eq!(cache.invalidate("^user:.*").await.unwrap(), 2);
        assert!(!cache.has("user:1").await.unwrap());
        assert!(!cache.has("user:2").await.unwrap());
        assert!(cache.has("order:1").await.unwrap());

        // Nothing left to match is not an error
        assert_eq!(cache.invalidate("^user:.*").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_rejected() {
        let (cache, _) = build(hot_warm(10_000, 100_000));
        let err = cache.invalidate("user:(").await.unwrap_err();
        assert!(matches!(err, tiercache::Error::InvalidPattern(_)));
    }

    struct RotateCipher;

    impl PayloadCipher for RotateCipher {
        fn name(&self) -> &str {
            "rotate"
        }

        fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
            Ok(plain.iter().map(|b| b.wrapping_add(13)).collect())
        }

        fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
            Ok(sealed.iter().map(|b| b.wrapping_sub(13)).collect())
        }
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Profile {
        id: u64,
        name: String,
        bio: String,
    }

    #[tokio::test]
    async fn test_round_trip_through_compression_and_encryption() {
        let config = CacheConfig::with_tiers(vec![
            TierConfig::memory("only", 1_000_000, 100).with_compression_threshold(128)
        ]);
        let cache = TierManager::builder(config)
            .clock(Arc::new(ManualClock::new(0)))
            .cipher(Arc::new(RotateCipher))
            .build()
            .unwrap();

        let profile = Profile {
            id: 7,
            name: "ada".into(),
            bio: "engine ".repeat(200),
        };
        cache.set("profile:7", &profile, SetOptions::new()).await.unwrap();
        cache.set("small", &5u8, SetOptions::new()).await.unwrap();

        assert_eq!(cache.get::<Profile>("profile:7").await.unwrap(), Some(profile));
        assert_eq!(cache.get::<u8>("small").await.unwrap(), Some(5));

        let stored = cache.tiers()[0].peek("profile:7").unwrap().unwrap();
        assert!(stored.is_compressed());
        assert!(stored.is_encrypted());
    }

    #[tokio::test]
    async fn test_repeated_get_in_fastest_tier_is_stable() {
        let (cache, _) = build(hot_warm(10_000, 100_000));
        cache.set("k", &"v", SetOptions::new()).await.unwrap();

        for _ in 0..5 {
            assert_eq!(cache.get::<String>("k").await.unwrap().as_deref(), Some("v"));
            assert_eq!(cache.tier_of("k").unwrap().as_deref(), Some("hot"));
        }
        assert!(cache.tiers()[1].peek("k").unwrap().is_none());
        assert_eq!(cache.cache_stats().entries, 1);
        assert_eq!(cache.stats("hot").unwrap().promotions, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_with_distinct_keys() {
        let (cache, _) = build(hot_warm(100_000, 1_000_000));
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache
                        .set(&format!("k{i}"), &format!("value-{i}"), SetOptions::new())
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..64 {
            assert_eq!(
                cache.get::<String>(&format!("k{i}")).await.unwrap(),
                Some(format!("value-{i}"))
            );
        }
        assert_eq!(cache.cache_stats().entries, 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_under_pressure_respect_capacity() {
        let config = CacheConfig::with_tiers(vec![TierConfig::memory("only", 2_000, 1_000)]);
        let (cache, _) = build(config);
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        cache
                            .set(&format!("w{worker}:{i}"), &"p".repeat(100), SetOptions::new())
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = cache.stats("only").unwrap();
        assert!(stats.bytes_stored <= 2_000);
        assert_eq!(stats.writes, 400);
        assert_eq!(stats.entries as u64 + stats.evictions, 400);
    }
}

// =============================================================================
// Persistent Tiers
// =============================================================================

mod persistence_tests {
    use super::*;
    use bytes::Bytes;
    use tiercache::cache::{BackendStats, InMemoryBackend, PersistenceBackend};
    use tiercache::{Error, Result};

    fn durable_config() -> CacheConfig {
        CacheConfig::with_tiers(vec![
            TierConfig::memory("hot", 10_000, 100).with_latency(Duration::from_micros(1)),
            TierConfig::persistent("durable", 1_000_000, 1_000)
                .with_latency(Duration::from_millis(2)),
        ])
    }

    fn open(backend: Arc<InMemoryBackend>, clock: Arc<ManualClock>) -> TierManager {
        TierManager::builder(durable_config())
            .backend("durable", backend)
            .clock(clock)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_entries_survive_a_restart() {
        let backend = Arc::new(InMemoryBackend::new());
        let clock = Arc::new(ManualClock::new(0));
        let document = "d".repeat(8_000);

        let first = open(backend.clone(), clock.clone());
        first.set("doc:1", &document, SetOptions::new()).await.unwrap();
        assert_eq!(first.tier_of("doc:1").unwrap().as_deref(), Some("durable"));
        drop(first);

        let second = open(backend.clone(), clock);
        assert!(second.has("doc:1").await.unwrap());
        assert_eq!(second.get::<String>("doc:1").await.unwrap(), Some(document));

        // Promoted for speed, but the durable copy stays
        assert_eq!(second.tier_of("doc:1").unwrap().as_deref(), Some("hot"));
        assert!(backend.contains("doc:1"));
        assert_eq!(second.stats("hot").unwrap().promotions, 1);
    }

    #[tokio::test]
    async fn test_deleted_entries_do_not_resurface() {
        let backend = Arc::new(InMemoryBackend::new());
        let clock = Arc::new(ManualClock::new(0));

        let first = open(backend.clone(), clock.clone());
        first.set("doc:1", &"d".repeat(8_000), SetOptions::new()).await.unwrap();
        assert!(first.delete("doc:1").await.unwrap());
        assert!(backend.is_empty());

        let second = open(backend, clock);
        assert_eq!(second.get::<String>("doc:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_backend_entries_are_dropped() {
        let backend = Arc::new(InMemoryBackend::new());
        let clock = Arc::new(ManualClock::new(0));

        let first = open(backend.clone(), clock.clone());
        first
            .set(
                "doc:1",
                &"d".repeat(8_000),
                SetOptions::new().ttl(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        clock.advance(Duration::from_secs(6));
        let second = open(backend.clone(), clock);
        assert!(!second.has("doc:1").await.unwrap());
        assert_eq!(second.get::<String>("doc:1").await.unwrap(), None);
        assert!(!backend.contains("doc:1"));
    }

    /// Backend whose saves or loads fail on demand
    #[derive(Default)]
    struct FlakyBackend {
        inner: InMemoryBackend,
        fail_saves: bool,
        fail_loads: bool,
    }

    #[async_trait::async_trait]
    impl PersistenceBackend for FlakyBackend {
        async fn load(&self, key: &str) -> Result<Option<Bytes>> {
            if self.fail_loads {
                return Err(Error::Backend("disk unavailable".into()));
            }
            self.inner.load(key).await
        }

        async fn save(&self, key: &str, data: Bytes) -> Result<()> {
            if self.fail_saves {
                return Err(Error::Backend("disk full".into()));
            }
            self.inner.save(key, data).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }

        fn stats(&self) -> BackendStats {
            self.inner.stats()
        }
    }

    #[tokio::test]
    async fn test_save_failure_is_surfaced() {
        let backend = Arc::new(FlakyBackend {
            fail_saves: true,
            ..Default::default()
        });
        let cache = TierManager::builder(durable_config())
            .backend("durable", backend)
            .build()
            .unwrap();

        let err = cache
            .set("doc:1", &"d".repeat(8_000), SetOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence { ref tier, .. } if tier == "durable"));
        assert!(!err.is_transient());

        // Small values still land in the memory tier
        cache.set("small", &1u8, SetOptions::new()).await.unwrap();
        assert_eq!(cache.get::<u8>("small").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_load_failure_is_a_miss() {
        let backend = Arc::new(FlakyBackend {
            fail_loads: true,
            ..Default::default()
        });
        let cache = TierManager::builder(durable_config())
            .backend("durable", backend)
            .build()
            .unwrap();

        assert_eq!(cache.get::<String>("doc:404").await.unwrap(), None);
        assert_eq!(cache.cache_stats().misses, 1);
    }

    #[test]
    fn test_persistent_tier_without_backend_is_rejected() {
        let result = TierManager::builder(durable_config()).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

// =============================================================================
// Rules & Advisor
// =============================================================================

mod rule_and_advisor_tests {
    use super::*;
    use tiercache::cache::{
        ConfigChange, InvalidationRule, RuleAction, RuleMatcher, SuggestionKind, SuggestionStatus,
    };

    #[tokio::test]
    async fn test_rules_loaded_from_yaml() {
        let yaml = r#"
- id: drop-temp
  matcher:
    tags: [temp]
  action: remove
- id: extend-sessions
  matcher:
    pattern: "^session:"
  action:
    extend_ttl: 1m
"#;
        let rules: Vec<InvalidationRule> = serde_yaml::from_str(yaml).unwrap();
        let (cache, clock) = build(hot_warm(10_000, 100_000));
        for rule in rules {
            cache.add_rule(rule).unwrap();
        }

        cache
            .set("session:1", &1u8, SetOptions::new().ttl(Duration::from_secs(30)))
            .await
            .unwrap();
        cache
            .set("scratch", &2u8, SetOptions::new().tags(["temp"]))
            .await
            .unwrap();

        let counts = cache.apply_rules().await.unwrap();
        assert_eq!(counts.get("drop-temp"), Some(&1));
        assert_eq!(counts.get("extend-sessions"), Some(&1));
        assert!(!cache.has("scratch").await.unwrap());

        // 30s + 1m
        clock.advance(Duration::from_secs(89));
        assert_eq!(cache.get::<u8>("session:1").await.unwrap(), Some(1));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get::<u8>("session:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disabled_and_removed_rules_do_nothing() {
        let (cache, _) = build(hot_warm(10_000, 100_000));
        cache
            .add_rule(
                InvalidationRule::new("all", RuleMatcher::Pattern(".*".into()))
                    .with_action(RuleAction::Remove)
                    .disabled(),
            )
            .unwrap();
        cache.set("k", &1u8, SetOptions::new()).await.unwrap();

        assert!(cache.apply_rules().await.unwrap().is_empty());
        assert_eq!(cache.apply_rule("all").await.unwrap(), 0);
        assert!(cache.has("k").await.unwrap());

        assert!(cache.remove_rule("all"));
        assert!(cache.rules().is_empty());
        assert_eq!(cache.apply_rule("all").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_eviction_pressure_suggestions_can_be_applied() {
        let config = CacheConfig::with_tiers(vec![TierConfig::memory("only", 1_000, 1_000)]);
        let (cache, clock) = build(config);

        for i in 0..20 {
            cache
                .set(&format!("k{i:02}"), &"x".repeat(98), SetOptions::new())
                .await
                .unwrap();
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(cache.stats("only").unwrap().evictions, 10);

        let suggestions = cache.suggest_optimizations();
        let mut kinds: Vec<SuggestionKind> = suggestions.iter().map(|s| s.kind).collect();
        kinds.sort_by_key(|k| format!("{k:?}"));
        assert_eq!(
            kinds,
            vec![SuggestionKind::CapacityIncrease, SuggestionKind::TtlTuning]
        );

        // Asking again does not duplicate pending suggestions
        assert_eq!(cache.suggest_optimizations().len(), 2);

        let capacity = suggestions
            .iter()
            .find(|s| s.kind == SuggestionKind::CapacityIncrease)
            .unwrap();
        assert_eq!(capacity.change, ConfigChange::SetCapacity(1_500));
        assert!(cache.apply_optimization(capacity.id).await.unwrap());
        assert_eq!(cache.stats("only").unwrap().capacity_bytes, 1_500);

        let ttl = suggestions
            .iter()
            .find(|s| s.kind == SuggestionKind::TtlTuning)
            .unwrap();
        assert_eq!(ttl.change, ConfigChange::SetTtlDefault(Duration::from_secs(300)));
        assert!(cache.apply_optimization(ttl.id).await.unwrap());

        // Entries without their own TTL now age out under the new default
        clock.advance(Duration::from_secs(301));
        assert_eq!(cache.get::<String>("k19").await.unwrap(), None);

        let history = cache.suggestions();
        assert!(history.iter().all(|s| s.status == SuggestionStatus::Applied));
    }

    #[tokio::test]
    async fn test_rejected_suggestions_stay_in_history() {
        let mut config = hot_warm(10_000, 100_000);
        config.advisor.preload_miss_threshold = 3;
        let (cache, _) = build(config);

        for i in 0..3 {
            assert_eq!(cache.get::<u8>(&format!("product:{i}")).await.unwrap(), None);
        }
        let suggestions = cache.suggest_optimizations();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, SuggestionKind::Preloading);

        assert!(cache.reject_optimization(suggestions[0].id));
        assert!(!cache.apply_optimization(suggestions[0].id).await.unwrap());
        assert!(cache.preload_hints().is_empty());
        assert_eq!(cache.suggestions()[0].status, SuggestionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_sweep_once_reports_work() {
        let (cache, clock) = build(hot_warm(10_000, 100_000));
        for i in 0..4 {
            cache
                .set(
                    &format!("k{i}"),
                    &i,
                    SetOptions::new().ttl(Duration::from_secs(1)),
                )
                .await
                .unwrap();
        }
        cache.set("keep", &1u8, SetOptions::new()).await.unwrap();

        clock.advance(Duration::from_secs(2));
        let report = cache.sweep_once().await.unwrap();
        assert_eq!(report.expired, 4);
        assert_eq!(cache.cache_stats().entries, 1);

        let again = cache.sweep_once().await.unwrap();
        assert!(again.is_empty());
    }
}
