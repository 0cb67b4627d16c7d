//! Tier Manager - Cache Coordinator
//!
//! Owns the tiers (fastest first) and coordinates reads, writes, promotion,
//! demotion, invalidation and the optimization advisor.
//!
//! # Data Flow
//!
//! ```text
//! Read:  tier 0 -> tier 1 -> ... -> miss
//!        (a hit in a slower tier is promoted to the fastest tier with room)
//!
//! Write: serialize -> compress (bounded) -> encrypt -> place by size
//!        (older copies in other tiers are removed once the write lands)
//! ```
//!
//! Cross-tier operations take one tier lock at a time, in tier order, and
//! guard every move with the entry's write generation: a copy is only removed
//! or rewritten if it is still the version that was read.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::advisor::{OptimizationAdvisor, Suggestion, SuggestionStatus, SuggestionTarget, TierView};
use super::clock::{Clock, SystemClock};
use super::compression::PayloadCompressor;
use super::entry::{CacheEntry, Generations, SetOptions};
use super::invalidation::{InvalidationEngine, InvalidationRule, KeyMatcher, RuleAction};
use super::metrics::{CacheStats, LookupCounters, TierStats};
use super::persistence::PersistenceBackend;
use super::policy::{PlacementPolicy, TierShape};
use super::serializer::{seal, unseal, Payload, PayloadCipher, Serializer};
use super::sweep::{SweepConfig, SweepReport};
use super::tier::Tier;
use crate::config::CacheConfig;
use crate::error::{Error, Result};

// =============================================================================
// Builder
// =============================================================================

/// Builder wiring configuration to injected collaborators
pub struct TierManagerBuilder {
    config: CacheConfig,
    backends: HashMap<String, Arc<dyn PersistenceBackend>>,
    clock: Arc<dyn Clock>,
    cipher: Option<Arc<dyn PayloadCipher>>,
}

impl TierManagerBuilder {
    /// Attach the backend for a persistent tier
    pub fn backend<B: PersistenceBackend + 'static>(
        mut self,
        tier_id: impl Into<String>,
        backend: Arc<B>,
    ) -> Self {
        self.backends.insert(tier_id.into(), backend);
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: Arc<C>) -> Self {
        self.clock = clock;
        self
    }

    /// Encrypt stored payloads (after compression)
    pub fn cipher<P: PayloadCipher + 'static>(mut self, cipher: Arc<P>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn build(mut self) -> Result<TierManager> {
        self.config.validate()?;

        if let Some(id) = self
            .backends
            .keys()
            .find(|id| !self.config.tiers.iter().any(|t| &t.id == *id))
        {
            return Err(Error::UnknownTier(id.clone()));
        }

        let mut tier_configs = self.config.tiers.clone();
        // Stable: equal latencies keep their configured order
        tier_configs.sort_by_key(|t| t.latency);

        let generations = Arc::new(Generations::new());
        let tiers = tier_configs
            .iter()
            .map(|config| {
                Tier::new(
                    config,
                    self.config.lock_timeout,
                    self.backends.remove(&config.id),
                    generations.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            tiers = ?tiers.iter().map(Tier::id).collect::<Vec<_>>(),
            encrypted = self.cipher.is_some(),
            "Tiered cache initialized"
        );

        Ok(TierManager {
            tiers,
            placement: self.config.placement,
            compressor: PayloadCompressor::with_config(self.config.compression),
            cipher: self.cipher,
            invalidation: InvalidationEngine::new(),
            advisor: OptimizationAdvisor::new(self.config.advisor),
            lookups: LookupCounters::default(),
            generations,
            clock: self.clock,
            sweep: self.config.sweep,
        })
    }
}

// =============================================================================
// Tier Manager
// =============================================================================

/// Multi-tier cache
pub struct TierManager {
    /// Fastest first
    tiers: Vec<Tier>,
    placement: PlacementPolicy,
    compressor: PayloadCompressor,
    cipher: Option<Arc<dyn PayloadCipher>>,
    invalidation: InvalidationEngine,
    advisor: OptimizationAdvisor,
    lookups: LookupCounters,
    generations: Arc<Generations>,
    clock: Arc<dyn Clock>,
    sweep: SweepConfig,
}

impl TierManager {
    pub fn builder(config: CacheConfig) -> TierManagerBuilder {
        TierManagerBuilder {
            config,
            backends: HashMap::new(),
            clock: Arc::new(SystemClock),
            cipher: None,
        }
    }

    /// Cache with only in-memory tiers and the system clock
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Tiers, fastest first
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn sweep_config(&self) -> &SweepConfig {
        &self.sweep
    }

    fn tier(&self, tier_id: &str) -> Result<&Tier> {
        self.tiers
            .iter()
            .find(|t| t.id() == tier_id)
            .ok_or_else(|| Error::UnknownTier(tier_id.to_string()))
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value, deserializing it into `T`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(bytes) => Ok(Some(Serializer::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get a value's serialized bytes with compression and encryption removed
    #[instrument(skip(self), level = "debug")]
    pub async fn get_raw(&self, key: &str) -> Result<Option<Bytes>> {
        let now = self.now();

        for (position, tier) in self.tiers.iter().enumerate() {
            let Some(entry) = tier.get(key, now).await? else {
                continue;
            };
            self.lookups.record_hit();

            if position > 0 {
                if let Err(e) = self.promote(position, &entry, now).await {
                    warn!(key, tier = tier.id(), error = %e, "Promotion failed, entry stays in place");
                }
            }
            return self.decode(entry.payload()).map(Some);
        }

        self.lookups.record_miss();
        self.advisor.record_miss(key);
        Ok(None)
    }

    /// Whether a live entry exists; does not count as an access
    pub async fn has(&self, key: &str) -> Result<bool> {
        let now = self.now();
        for tier in &self.tiers {
            if tier.contains(key, now).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Id of the fastest tier indexing a live copy of the key
    pub fn tier_of(&self, key: &str) -> Result<Option<String>> {
        let now = self.now();
        for tier in &self.tiers {
            if tier.contains_live(key, now)? {
                return Ok(Some(tier.id().to_string()));
            }
        }
        Ok(None)
    }

    fn decode(&self, payload: Payload) -> Result<Bytes> {
        let payload = unseal(payload, self.cipher.as_deref())?;
        let payload = self.compressor.decompress(payload)?;
        Ok(payload.bytes().clone())
    }

    /// Move an entry from `source` to the fastest tier with room.
    ///
    /// The slower copy is removed only after the faster write lands, and only
    /// if it is still the version that was read; otherwise the promoted copy
    /// is withdrawn and the slower tier stays authoritative. Persistent
    /// sources keep their copy.
    async fn promote(&self, source: usize, entry: &CacheEntry, now: u64) -> Result<bool> {
        if !self.placement.should_promote(entry.access_count()) {
            return Ok(false);
        }
        let key = entry.key();
        let generation = entry.generation();

        for target in 0..source {
            if !self.tiers[target].settings().admits(entry.size()) {
                continue;
            }
            if !self.tiers[target].try_insert(entry.clone(), now).await? {
                continue;
            }
            let source_tier = &self.tiers[source];
            let released = if source_tier.is_persistent() {
                // Durable copies stay; the faster tier serves a cached copy
                source_tier
                    .peek(key)?
                    .is_some_and(|current| current.generation() == generation)
            } else {
                source_tier.remove_if_generation(key, generation).await?
            };
            if released {
                self.tiers[target].counters().record_promotion();
                debug!(
                    key,
                    from = self.tiers[source].id(),
                    to = self.tiers[target].id(),
                    "Promoted entry"
                );
                return Ok(true);
            }
            self.tiers[target].remove_if_generation(key, generation).await?;
            return Ok(false);
        }
        Ok(false)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Serialize and store a value.
    ///
    /// Small entries start at the fastest tier, large ones skip to the first
    /// tier whose capacity class fits them; a tier that cannot take the entry
    /// passes it to the next candidate.
    #[instrument(skip(self, value, options), fields(key = %key))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<()> {
        let payload = Serializer::serialize(value)?;
        self.store(key, payload, options).await
    }

    async fn store(&self, key: &str, payload: Payload, options: SetOptions) -> Result<()> {
        let now = self.now();
        let shapes: Vec<TierShape> = self.tiers.iter().map(|t| t.settings().shape()).collect();

        let threshold_tier = self
            .placement
            .candidate_tiers(payload.size(), &shapes)
            .first()
            .copied()
            .unwrap_or_else(|| self.largest_tier());
        let threshold = self.tiers[threshold_tier].settings().compression_threshold;

        let outcome = self.compressor.compress_bounded(payload, threshold).await;
        let compression_pending = outcome.timed_out();
        let payload = seal(outcome.into_payload(), self.cipher.as_deref())?;

        let size = payload.size();
        let candidates = self.placement.candidate_tiers(size, &shapes);
        let generation = self.generations.next();
        let entry = CacheEntry::new(key, payload, &options, now, generation)
            .with_compression_pending(compression_pending);

        let mut home = None;
        for position in candidates {
            match self.tiers[position].put(entry.clone(), now).await {
                Ok(outcome) => {
                    if !outcome.evicted.is_empty() {
                        debug!(
                            tier = self.tiers[position].id(),
                            evicted = outcome.evicted.len(),
                            "Made room for write"
                        );
                    }
                    home = Some(position);
                    break;
                }
                Err(Error::Capacity { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        let Some(home) = home else {
            let largest_capacity = shapes.iter().map(|s| s.capacity_bytes).max().unwrap_or(0);
            warn!(key, size, largest_capacity, "Entry does not fit in any tier");
            return Err(Error::Capacity {
                key: key.to_string(),
                size,
                largest_capacity,
            });
        };

        for (position, tier) in self.tiers.iter().enumerate() {
            if position != home {
                tier.remove_if_older(key, generation).await?;
            }
        }
        Ok(())
    }

    /// Position of the largest tier; the fastest wins ties
    fn largest_tier(&self) -> usize {
        self.tiers
            .iter()
            .enumerate()
            .max_by_key(|(position, tier)| {
                (tier.settings().capacity_bytes, std::cmp::Reverse(*position))
            })
            .map(|(position, _)| position)
            .unwrap_or(0)
    }

    /// Remove a key from every tier
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut removed = false;
        for tier in &self.tiers {
            removed |= tier.remove(key).await?;
        }
        Ok(removed)
    }

    /// Remove every entry from every tier
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for tier in &self.tiers {
            removed += tier.clear().await?;
        }
        info!(removed, "Cleared cache");
        Ok(removed)
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Remove every entry whose key matches a regular expression
    #[instrument(skip(self))]
    pub async fn invalidate(&self, pattern: &str) -> Result<usize> {
        let matcher = KeyMatcher::pattern(pattern)?;
        self.apply_matcher(&matcher, RuleAction::Remove).await
    }

    /// Remove every entry carrying any of the given tags
    #[instrument(skip(self))]
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> Result<usize> {
        let matcher = KeyMatcher::tags(tags.iter().cloned());
        self.apply_matcher(&matcher, RuleAction::Remove).await
    }

    /// Apply an action to every match; returns the number of distinct keys affected
    async fn apply_matcher(&self, matcher: &KeyMatcher, action: RuleAction) -> Result<usize> {
        let now = self.now();
        let matches = self.invalidation.collect_matches(&self.tiers, matcher)?;

        let mut affected = BTreeSet::new();
        for matched in matches {
            let tier = &self.tiers[matched.tier];
            let key = matched.entry.key();
            let generation = matched.entry.generation();

            let applied = match action.rewrite(&matched.entry, now, tier.settings().ttl_default) {
                None => tier.remove_if_generation(key, generation).await?,
                Some(replacement) => tier.replace_if_generation(generation, replacement).await?,
            };
            if applied {
                affected.insert(key.to_string());
            }
        }

        debug!(affected = affected.len(), ?action, "Applied invalidation");
        Ok(affected.len())
    }

    /// Register (or replace) an invalidation rule
    pub fn add_rule(&self, rule: InvalidationRule) -> Result<()> {
        self.invalidation.add_rule(rule)
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        self.invalidation.remove_rule(id)
    }

    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        self.invalidation.set_rule_enabled(id, enabled)
    }

    pub fn rules(&self) -> Vec<InvalidationRule> {
        self.invalidation.rules()
    }

    /// Evaluate one rule now; disabled or unknown rules affect nothing
    pub async fn apply_rule(&self, id: &str) -> Result<usize> {
        match self.invalidation.enabled_rule(id) {
            Some((matcher, action)) => self.apply_matcher(&matcher, action).await,
            None => Ok(0),
        }
    }

    /// Evaluate every enabled rule; returns affected counts by rule id
    pub async fn apply_rules(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for id in self.invalidation.enabled_ids() {
            let count = self.apply_rule(&id).await?;
            counts.insert(id, count);
        }
        Ok(counts)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Demote cold entries out of tiers above their high watermark.
    ///
    /// Cold means an access count below `cold_access_ratio` times the tier
    /// average; candidates go in eviction-policy order until the tier is at
    /// its low watermark. An entry moves only if a slower tier has room.
    #[instrument(skip(self))]
    pub async fn rebalance(&self) -> Result<usize> {
        let now = self.now();
        let mut demoted = 0;

        for source in 0..self.tiers.len().saturating_sub(1) {
            let tier = &self.tiers[source];
            if tier.utilization() < self.placement.demotion_high_watermark {
                continue;
            }

            let settings = tier.settings();
            let snapshots = tier.snapshots(now)?;
            if snapshots.is_empty() {
                continue;
            }
            let average = snapshots.iter().map(|s| s.access_count).sum::<u64>() as f64
                / snapshots.len() as f64;
            let cold_below = average * self.placement.cold_access_ratio;
            let cold = snapshots
                .into_iter()
                .filter(|s| (s.access_count as f64) < cold_below)
                .collect();
            let target_bytes =
                (settings.capacity_bytes as f64 * self.placement.demotion_low_watermark) as u64;

            for candidate in settings.eviction_policy.eviction_order(cold) {
                if tier.used_bytes() <= target_bytes {
                    break;
                }
                let Some(entry) = tier.peek(&candidate.key)? else {
                    continue;
                };
                if self.demote(source, &entry, now).await? {
                    demoted += 1;
                }
            }
        }

        if demoted > 0 {
            debug!(demoted, "Rebalanced tiers");
        }
        Ok(demoted)
    }

    async fn demote(&self, source: usize, entry: &CacheEntry, now: u64) -> Result<bool> {
        let key = entry.key();
        let generation = entry.generation();

        for target in source + 1..self.tiers.len() {
            let already_held = self.tiers[target]
                .peek(key)?
                .is_some_and(|current| current.generation() == generation);
            if already_held {
                // Promoted from a persistent tier; dropping the fast copy is enough
                return self.tiers[source].remove_if_generation(key, generation).await;
            }
            if !self.tiers[target].try_insert(entry.clone(), now).await? {
                continue;
            }
            if self.tiers[source].remove_if_generation(key, generation).await? {
                self.tiers[target].counters().record_demotion();
                debug!(
                    key,
                    from = self.tiers[source].id(),
                    to = self.tiers[target].id(),
                    "Demoted entry"
                );
                return Ok(true);
            }
            self.tiers[target].remove_if_generation(key, generation).await?;
            return Ok(false);
        }
        Ok(false)
    }

    /// Retry compression for entries stored uncompressed after a timeout
    async fn finish_deferred_compression(&self) -> Result<usize> {
        let mut compressed = 0;

        for tier in &self.tiers {
            let pending = tier
                .scan()?
                .filter(|entry| entry.as_ref().map_or(true, CacheEntry::compression_pending))
                .collect::<Result<Vec<_>>>()?;
            if pending.is_empty() {
                continue;
            }
            let threshold = tier.settings().compression_threshold;

            for entry in pending {
                let plain = unseal(entry.payload(), self.cipher.as_deref())?;
                let outcome = self.compressor.compress_bounded(plain, threshold).await;
                if outcome.timed_out() {
                    continue;
                }
                let payload = seal(outcome.into_payload(), self.cipher.as_deref())?;
                let is_compressed = payload.is_compressed();
                let replacement = entry.with_payload(payload);
                if tier
                    .replace_if_generation(entry.generation(), replacement)
                    .await?
                    && is_compressed
                {
                    compressed += 1;
                }
            }
        }
        Ok(compressed)
    }

    /// One maintenance pass: purge expired entries, finish deferred
    /// compression, demote cold entries and refresh suggestions.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.now();
        let mut report = SweepReport::default();

        for tier in &self.tiers {
            report.expired += tier.purge_expired(now).await?.len();
        }
        report.compressed = self.finish_deferred_compression().await?;
        report.demoted = self.rebalance().await?;
        report.pending_suggestions = self.suggest_optimizations().len();

        Ok(report)
    }

    // =========================================================================
    // Stats & Advisor
    // =========================================================================

    pub fn stats(&self, tier_id: &str) -> Result<TierStats> {
        Ok(self.tier(tier_id)?.stats())
    }

    /// Stats of every tier, fastest first
    pub fn all_stats(&self) -> Vec<TierStats> {
        self.tiers.iter().map(Tier::stats).collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lookups.summarize(self.all_stats())
    }

    /// Evaluate the advisor rules; returns every pending suggestion
    pub fn suggest_optimizations(&self) -> Vec<Suggestion> {
        let views: Vec<TierView> = self
            .tiers
            .iter()
            .enumerate()
            .map(|(position, tier)| TierView {
                stats: tier.stats(),
                settings: tier.settings(),
                has_slower: position + 1 < self.tiers.len(),
            })
            .collect();
        self.advisor.suggest(&views, self.now())
    }

    /// Apply a pending suggestion's configuration change.
    ///
    /// Returns false when the id is unknown or no longer pending.
    pub async fn apply_optimization(&self, id: Uuid) -> Result<bool> {
        let Some(suggestion) = self.advisor.pending(id) else {
            return Ok(false);
        };

        if let SuggestionTarget::Tier(tier_id) = &suggestion.target {
            let change = &suggestion.change;
            let evicted = self
                .tier(tier_id)?
                .reconfigure(self.now(), |settings| change.apply_to(settings))
                .await?;
            if !evicted.is_empty() {
                debug!(tier = %tier_id, evicted = evicted.len(), "Reconfiguration evicted entries");
            }
        }

        let applied = self.advisor.resolve(id, SuggestionStatus::Applied);
        if applied {
            info!(
                id = %id,
                kind = ?suggestion.kind,
                change = ?suggestion.change,
                "Applied optimization"
            );
        }
        Ok(applied)
    }

    /// Reject a pending suggestion
    pub fn reject_optimization(&self, id: Uuid) -> bool {
        self.advisor.resolve(id, SuggestionStatus::Rejected)
    }

    /// Every suggestion made so far, with its status
    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.advisor.history()
    }

    /// Key patterns from applied preloading suggestions
    pub fn preload_hints(&self) -> Vec<String> {
        self.advisor.preload_hints()
    }
}

impl std::fmt::Debug for TierManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierManager")
            .field("tiers", &self.tiers)
            .field("encrypted", &self.cipher.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
