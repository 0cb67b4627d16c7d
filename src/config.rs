//! Cache Configuration
//!
//! Static configuration built once per cache instance. Documents are YAML;
//! durations are written as strings such as `"250ms"`, `"30s"` or `"1h30m"`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::advisor::AdvisorConfig;
use crate::cache::compression::CompressionConfig;
use crate::cache::policy::{EvictionPolicy, PlacementPolicy};
use crate::cache::sweep::SweepConfig;
use crate::error::{Error, Result};

/// Default capacity of the built-in hot tier (64MB)
pub const DEFAULT_HOT_CAPACITY: u64 = 64 * 1024 * 1024;

/// Default capacity of the built-in warm tier (512MB)
pub const DEFAULT_WARM_CAPACITY: u64 = 512 * 1024 * 1024;

// =============================================================================
// Tier Configuration
// =============================================================================

/// Storage kind backing a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// In-process map
    #[default]
    Memory,
    /// In-process index written through to an injected persistence backend
    Persistent,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierKind::Memory => write!(f, "memory"),
            TierKind::Persistent => write!(f, "persistent"),
        }
    }
}

/// Configuration of a single tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Unique tier identifier
    pub id: String,
    /// Storage kind
    #[serde(default)]
    pub kind: TierKind,
    /// Maximum total stored bytes
    pub capacity_bytes: u64,
    /// Maximum number of entries
    pub max_entries: usize,
    /// Eviction policy applied under pressure
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
    /// TTL applied to entries written without one (None = no expiry)
    #[serde(default, with = "option_duration_str")]
    pub ttl_default: Option<Duration>,
    /// Payloads strictly larger than this are compressed (None = never)
    #[serde(default)]
    pub compression_threshold: Option<u64>,
    /// Average access latency; orders tiers and feeds placement
    #[serde(default, with = "duration_str")]
    pub latency: Duration,
}

impl TierConfig {
    /// In-memory tier with LRU eviction and no default TTL
    pub fn memory(id: impl Into<String>, capacity_bytes: u64, max_entries: usize) -> Self {
        Self {
            id: id.into(),
            kind: TierKind::Memory,
            capacity_bytes,
            max_entries,
            eviction_policy: EvictionPolicy::Lru,
            ttl_default: None,
            compression_threshold: None,
            latency: Duration::ZERO,
        }
    }

    /// Persistent tier; a backend must be supplied when building the cache
    pub fn persistent(id: impl Into<String>, capacity_bytes: u64, max_entries: usize) -> Self {
        Self {
            kind: TierKind::Persistent,
            ..Self::memory(id, capacity_bytes, max_entries)
        }
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_ttl_default(mut self, ttl: Duration) -> Self {
        self.ttl_default = Some(ttl);
        self
    }

    pub fn with_compression_threshold(mut self, bytes: u64) -> Self {
        self.compression_threshold = Some(bytes);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Complete cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Tiers; reordered fastest first by `latency` at construction
    pub tiers: Vec<TierConfig>,
    /// Initial placement and promotion/demotion heuristics
    #[serde(default)]
    pub placement: PlacementPolicy,
    /// Payload compression
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Optimization advisor thresholds
    #[serde(default)]
    pub advisor: AdvisorConfig,
    /// Background sweep loop
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Bounded wait for a tier lock
    #[serde(default = "default_lock_timeout", with = "duration_str")]
    pub lock_timeout: Duration,
}

fn default_lock_timeout() -> Duration {
    Duration::from_millis(100)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierConfig::memory("hot", DEFAULT_HOT_CAPACITY, 100_000)
                    .with_latency(Duration::from_micros(1)),
                TierConfig::memory("warm", DEFAULT_WARM_CAPACITY, 1_000_000)
                    .with_policy(EvictionPolicy::Lfu)
                    .with_compression_threshold(16 * 1024)
                    .with_latency(Duration::from_micros(100)),
            ],
            placement: PlacementPolicy::default(),
            compression: CompressionConfig::default(),
            advisor: AdvisorConfig::default(),
            sweep: SweepConfig::default(),
            lock_timeout: default_lock_timeout(),
        }
    }
}

impl CacheConfig {
    /// Configuration with the given tiers and defaults elsewhere
    pub fn with_tiers(tiers: Vec<TierConfig>) -> Self {
        Self {
            tiers,
            ..Self::default()
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check structural constraints
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(Error::Config("at least one tier is required".into()));
        }

        let mut seen = HashSet::new();
        for tier in &self.tiers {
            if tier.id.trim().is_empty() {
                return Err(Error::Config("tier id must not be empty".into()));
            }
            if !seen.insert(tier.id.as_str()) {
                return Err(Error::Config(format!("duplicate tier id: {}", tier.id)));
            }
            if tier.capacity_bytes == 0 {
                return Err(Error::Config(format!(
                    "tier {} must have a non-zero capacity",
                    tier.id
                )));
            }
            if tier.max_entries == 0 {
                return Err(Error::Config(format!(
                    "tier {} must allow at least one entry",
                    tier.id
                )));
            }
        }

        self.placement.validate()?;
        self.advisor.validate()?;
        Ok(())
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a duration string (e.g., "250ms", "30s", "5m", "1h30m", "1d").
///
/// A trailing number without unit is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut num_buf = String::new();
        while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
            num_buf.push(c);
            chars.next();
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_alphabetic()) {
            unit.push(c.to_ascii_lowercase());
            chars.next();
        }

        if num_buf.is_empty() {
            return Err(Error::DurationParse(format!(
                "invalid number in duration: {}",
                s
            )));
        }
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;

        let overflow = || Error::DurationParse(format!("duration out of range: {}", s));
        let part = match unit.as_str() {
            "us" => Duration::from_micros(num),
            "ms" => Duration::from_millis(num),
            "" | "s" => Duration::from_secs(num),
            "m" => Duration::from_secs(num.checked_mul(60).ok_or_else(overflow)?),
            "h" => Duration::from_secs(num.checked_mul(3600).ok_or_else(overflow)?),
            "d" => Duration::from_secs(num.checked_mul(86400).ok_or_else(overflow)?),
            other => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    other
                )))
            }
        };
        total = total.checked_add(part).ok_or_else(overflow)?;
    }

    Ok(total)
}

/// Render a duration in the form accepted by [`parse_duration`]
pub fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else if d.as_micros() % 1000 == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}us", d.as_micros())
    }
}

pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod option_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&super::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// =============================================================================
// Tests
// =============================================================================
