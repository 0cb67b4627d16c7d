//! Optimization Advisor
//!
//! Rule-based suggestions derived from tier statistics. Suggestions are pure
//! output: nothing changes until an operator applies one through the manager.
//!
//! # Rules
//!
//! | Kind               | Trigger                                                    |
//! |--------------------|------------------------------------------------------------|
//! | `Compression`      | low window hit rate and large average entries              |
//! | `TtlTuning`        | evictions reach `eviction_pressure_factor` x writes        |
//! | `CapacityIncrease` | eviction pressure on a tier above `high_utilization`       |
//! | `SizeReduction`    | average entry above `oversized_entry_fraction` of capacity |
//! | `Preloading`       | a key prefix misses `preload_miss_threshold` times         |

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::compression::CompressionAlgorithm;
use super::metrics::{hit_rate, TierStats};
use super::tier::TierSettings;
use crate::config::duration_str;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Advisor thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Samples per tier kept for windowed rates
    pub window: usize,
    /// Window hit rate below which compression is considered
    pub low_hit_rate: f64,
    /// Average entry size above which entries count as large
    pub large_entry_bytes: u64,
    /// Evictions per write that count as pressure
    pub eviction_pressure_factor: f64,
    /// Utilization above which pressure suggests more capacity
    pub high_utilization: f64,
    /// Average entry share of capacity above which entries are oversized
    pub oversized_entry_fraction: f64,
    /// Misses on one key prefix before suggesting a preload
    pub preload_miss_threshold: u64,
    /// TTL proposed for tiers without a default TTL
    #[serde(with = "duration_str")]
    pub fallback_ttl: Duration,
    /// Requests in the window needed before judging a hit rate
    pub min_requests: u64,
    /// Distinct key prefixes tracked for preloading
    pub max_tracked_prefixes: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            window: 10,
            low_hit_rate: 0.5,
            large_entry_bytes: 16 * 1024,
            eviction_pressure_factor: 0.5,
            high_utilization: 0.9,
            oversized_entry_fraction: 0.1,
            preload_miss_threshold: 20,
            fallback_ttl: Duration::from_secs(300),
            min_requests: 20,
            max_tracked_prefixes: 1024,
        }
    }
}

impl AdvisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(Error::Config("advisor.window must be at least 1".into()));
        }
        for (name, value) in [
            ("advisor.low_hit_rate", self.low_hit_rate),
            ("advisor.high_utilization", self.high_utilization),
            ("advisor.oversized_entry_fraction", self.oversized_entry_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{name} must be in [0, 1]")));
            }
        }
        if self.eviction_pressure_factor <= 0.0 {
            return Err(Error::Config(
                "advisor.eviction_pressure_factor must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Suggestions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    TtlTuning,
    Compression,
    SizeReduction,
    Preloading,
    CapacityIncrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Applied,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionTarget {
    Tier(String),
    KeyPattern(String),
}

/// Configuration change carried by a suggestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigChange {
    SetTtlDefault(#[serde(with = "duration_str")] Duration),
    SetCompressionThreshold(u64),
    SetMaxEntryBytes(u64),
    SetCapacity(u64),
    AddPreloadHint(String),
}

impl ConfigChange {
    /// Apply to a tier's settings; preload hints have no tier component
    pub fn apply_to(&self, settings: &mut TierSettings) {
        match self {
            ConfigChange::SetTtlDefault(ttl) => settings.ttl_default = Some(*ttl),
            ConfigChange::SetCompressionThreshold(bytes) => {
                settings.compression_threshold = Some(*bytes)
            }
            ConfigChange::SetMaxEntryBytes(bytes) => settings.max_entry_bytes = Some(*bytes),
            ConfigChange::SetCapacity(bytes) => settings.capacity_bytes = *bytes,
            ConfigChange::AddPreloadHint(_) => {}
        }
    }
}

/// A proposed optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub kind: SuggestionKind,
    pub target: SuggestionTarget,
    /// Estimated improvement as a fraction (0.0 - 1.0)
    pub estimated_gain: f64,
    pub rationale: String,
    pub change: ConfigChange,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
}

/// What the advisor sees of a tier
#[derive(Debug, Clone)]
pub struct TierView {
    pub stats: TierStats,
    pub settings: TierSettings,
    /// A slower tier exists to take entries this tier turns away
    pub has_slower: bool,
}

// =============================================================================
// Advisor
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    hits: u64,
    misses: u64,
    evictions: u64,
    writes: u64,
}

impl Sample {
    fn of(stats: &TierStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            writes: stats.writes,
        }
    }

    /// Counter growth from `earlier` to `self`
    fn since(&self, earlier: &Sample) -> Sample {
        Sample {
            hits: self.hits.saturating_sub(earlier.hits),
            misses: self.misses.saturating_sub(earlier.misses),
            evictions: self.evictions.saturating_sub(earlier.evictions),
            writes: self.writes.saturating_sub(earlier.writes),
        }
    }
}

/// Turns observed statistics into suggestions
#[derive(Debug, Default)]
pub struct OptimizationAdvisor {
    config: AdvisorConfig,
    samples: Mutex<HashMap<String, VecDeque<Sample>>>,
    suggestions: RwLock<Vec<Suggestion>>,
    miss_prefixes: DashMap<String, u64>,
    preload_hints: RwLock<Vec<String>>,
}

impl OptimizationAdvisor {
    pub fn new(config: AdvisorConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Count a full-cache miss against the key's prefix
    pub fn record_miss(&self, key: &str) {
        let Some((prefix, _)) = key.split_once(':') else {
            return;
        };
        if let Some(mut count) = self.miss_prefixes.get_mut(prefix) {
            *count += 1;
            return;
        }
        if self.miss_prefixes.len() < self.config.max_tracked_prefixes {
            *self.miss_prefixes.entry(prefix.to_string()).or_insert(0) += 1;
        }
    }

    /// Append one sample per tier, keeping the last `window`
    pub fn record_samples(&self, stats: &[TierStats]) {
        let mut samples = self.samples.lock();
        for tier in stats {
            let window = samples.entry(tier.tier_id.clone()).or_default();
            window.push_back(Sample::of(tier));
            while window.len() > self.config.window {
                window.pop_front();
            }
        }
    }

    /// Counter growth across a tier's window (cumulative with one sample)
    fn windowed(&self, tier_id: &str) -> Sample {
        let samples = self.samples.lock();
        match samples.get(tier_id) {
            Some(window) => match (window.front(), window.back()) {
                (Some(first), Some(last)) if window.len() > 1 => last.since(first),
                (_, Some(last)) => *last,
                _ => Sample::default(),
            },
            None => Sample::default(),
        }
    }

    /// Evaluate every rule and return all pending suggestions.
    ///
    /// A rule firing for a (kind, target) pair that already has a pending
    /// suggestion does not create a duplicate.
    pub fn suggest(&self, views: &[TierView], now: u64) -> Vec<Suggestion> {
        let stats: Vec<TierStats> = views.iter().map(|v| v.stats.clone()).collect();
        self.record_samples(&stats);

        let mut candidates = Vec::new();
        for view in views {
            self.tier_rules(view, &mut candidates);
        }
        self.preload_rules(&mut candidates);

        let created_at = DateTime::<Utc>::from_timestamp_millis(now as i64).unwrap_or_default();
        let mut suggestions = self.suggestions.write();
        for (kind, target, estimated_gain, rationale, change) in candidates {
            let duplicate = suggestions.iter().any(|s| {
                s.status == SuggestionStatus::Pending && s.kind == kind && s.target == target
            });
            if duplicate {
                continue;
            }
            debug!(?kind, ?target, estimated_gain, "New optimization suggestion");
            suggestions.push(Suggestion {
                id: Uuid::new_v4(),
                kind,
                target,
                estimated_gain,
                rationale,
                change,
                status: SuggestionStatus::Pending,
                created_at,
            });
        }

        suggestions
            .iter()
            .filter(|s| s.status == SuggestionStatus::Pending)
            .cloned()
            .collect()
    }

    fn tier_rules(&self, view: &TierView, out: &mut Vec<Candidate>) {
        let config = &self.config;
        let stats = &view.stats;
        let settings = &view.settings;
        let target = SuggestionTarget::Tier(stats.tier_id.clone());
        let window = self.windowed(&stats.tier_id);
        let avg_size = stats.avg_entry_size();

        let requests = window.hits + window.misses;
        let window_hit_rate = hit_rate(window.hits, window.misses);
        if requests >= config.min_requests
            && window_hit_rate < config.low_hit_rate
            && avg_size > config.large_entry_bytes
            && settings
                .compression_threshold
                .map_or(true, |threshold| threshold > avg_size)
        {
            out.push((
                SuggestionKind::Compression,
                target.clone(),
                1.0 - CompressionAlgorithm::Lz4.typical_ratio(),
                format!(
                    "hit rate {:.0}% over the last {} requests with {} byte average entries",
                    window_hit_rate * 100.0,
                    requests,
                    avg_size
                ),
                ConfigChange::SetCompressionThreshold(config.large_entry_bytes),
            ));
        }

        let under_pressure = window.writes > 0
            && window.evictions as f64 >= config.eviction_pressure_factor * window.writes as f64;
        if under_pressure {
            let pressure = window.evictions as f64 / window.writes as f64;
            let ttl = match settings.ttl_default {
                Some(ttl) => (ttl / 2).max(Duration::from_millis(1)),
                None => config.fallback_ttl,
            };
            out.push((
                SuggestionKind::TtlTuning,
                target.clone(),
                (pressure / 2.0).min(1.0),
                format!(
                    "{} evictions for {} writes; shorter TTLs free space before eviction",
                    window.evictions, window.writes
                ),
                ConfigChange::SetTtlDefault(ttl),
            ));

            if stats.utilization >= config.high_utilization {
                out.push((
                    SuggestionKind::CapacityIncrease,
                    target.clone(),
                    pressure.min(1.0),
                    format!(
                        "{:.0}% utilized with {} evictions for {} writes",
                        stats.utilization * 100.0,
                        window.evictions,
                        window.writes
                    ),
                    ConfigChange::SetCapacity(settings.capacity_bytes.saturating_add(settings.capacity_bytes / 2)),
                ));
            }
        }

        let limit = (settings.capacity_bytes as f64 * config.oversized_entry_fraction) as u64;
        if view.has_slower
            && stats.entries > 0
            && limit > 0
            && avg_size > limit
            && settings.max_entry_bytes.map_or(true, |max| max > limit)
        {
            out.push((
                SuggestionKind::SizeReduction,
                target,
                (avg_size - limit) as f64 / avg_size as f64,
                format!(
                    "average entry of {} bytes exceeds {:.0}% of capacity",
                    avg_size,
                    config.oversized_entry_fraction * 100.0
                ),
                ConfigChange::SetMaxEntryBytes(limit),
            ));
        }
    }

    fn preload_rules(&self, out: &mut Vec<Candidate>) {
        let hints = self.preload_hints.read().clone();
        let total: u64 = self.miss_prefixes.iter().map(|e| *e.value()).sum();
        let mut hot: Vec<(String, u64)> = self
            .miss_prefixes
            .iter()
            .filter(|e| *e.value() >= self.config.preload_miss_threshold)
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        hot.sort();

        for (prefix, misses) in hot {
            let pattern = preload_pattern(&prefix);
            if hints.contains(&pattern) {
                continue;
            }
            out.push((
                SuggestionKind::Preloading,
                SuggestionTarget::KeyPattern(pattern.clone()),
                misses as f64 / total.max(1) as f64,
                format!("{misses} misses on keys under '{prefix}:'"),
                ConfigChange::AddPreloadHint(pattern),
            ));
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Pending suggestion by id
    pub fn pending(&self, id: Uuid) -> Option<Suggestion> {
        self.suggestions
            .read()
            .iter()
            .find(|s| s.id == id && s.status == SuggestionStatus::Pending)
            .cloned()
    }

    /// Move a pending suggestion to a final status; false if not pending
    pub fn resolve(&self, id: Uuid, status: SuggestionStatus) -> bool {
        let mut suggestions = self.suggestions.write();
        match suggestions
            .iter_mut()
            .find(|s| s.id == id && s.status == SuggestionStatus::Pending)
        {
            Some(suggestion) => {
                suggestion.status = status;
                if let ConfigChange::AddPreloadHint(pattern) = &suggestion.change {
                    // Misses counted so far are answered either way
                    self.miss_prefixes
                        .retain(|prefix, _| preload_pattern(prefix) != *pattern);
                    if status == SuggestionStatus::Applied {
                        let mut hints = self.preload_hints.write();
                        if !hints.contains(pattern) {
                            hints.push(pattern.clone());
                        }
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Every suggestion ever made, with its status
    pub fn history(&self) -> Vec<Suggestion> {
        self.suggestions.read().clone()
    }

    /// Key patterns from applied preloading suggestions
    pub fn preload_hints(&self) -> Vec<String> {
        self.preload_hints.read().clone()
    }

    /// Forget samples and miss counts (suggestion history is kept)
    pub fn reset(&self) {
        self.samples.lock().clear();
        self.miss_prefixes.clear();
    }
}

type Candidate = (SuggestionKind, SuggestionTarget, f64, String, ConfigChange);

fn preload_pattern(prefix: &str) -> String {
    format!("^{}:", regex::escape(prefix))
}

// =============================================================================
// Tests
// =============================================================================
