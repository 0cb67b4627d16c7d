//! Error types for the tiered cache engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered cache engine
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Value could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entry does not fit in any tier, even after eviction
    #[error("Entry '{key}' of {size} bytes does not fit (largest capacity: {largest_capacity} bytes)")]
    Capacity {
        key: String,
        size: u64,
        largest_capacity: u64,
    },

    /// A tier lock could not be acquired within the bounded wait
    #[error("Timed out after {waited:?} waiting for the lock on tier {tier}")]
    LockTimeout { tier: String, waited: Duration },

    /// The persistence backend of a tier failed
    #[error("Persistence backend for tier {tier} failed: {reason}")]
    Persistence { tier: String, reason: String },

    /// Raw failure reported by a persistence backend implementation
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalidation pattern did not compile
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Tier id not present in this cache
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration document could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Payload cipher failed
    #[error("Cipher {cipher} failed: {reason}")]
    Cipher { cipher: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }

    pub(crate) fn persistence(tier: &str, source: impl std::fmt::Display) -> Self {
        Error::Persistence {
            tier: tier.to_string(),
            reason: source.to_string(),
        }
    }
}
