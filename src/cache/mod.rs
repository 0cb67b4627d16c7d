//! Multi-Tier Cache
//!
//! An ordered set of tiers, fastest first, each with its own capacity, entry
//! limit, eviction policy and default TTL. Values are placed by size, promoted
//! on reuse, demoted when a tier runs hot, and optionally compressed and
//! encrypted before they are stored.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           TierManager                                │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Serializer → PayloadCompressor → PayloadCipher      (write path)    │
//! │                                                                      │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐      │
//! │  │ Tier "hot"   │   │ Tier "warm"  │   │ Tier "durable"       │      │
//! │  │ memory, LRU  │ → │ memory, LFU  │ → │ persistent, backend  │      │
//! │  └──────────────┘   └──────────────┘   └──────────────────────┘      │
//! │         ↑ promotion                demotion ↓                        │
//! │                                                                      │
//! │  InvalidationEngine    OptimizationAdvisor    Sweeper (background)   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tiercache::cache::{SetOptions, TierManager};
//! use tiercache::config::CacheConfig;
//! use std::time::Duration;
//!
//! # async fn example() -> tiercache::Result<()> {
//! let cache = TierManager::new(CacheConfig::default())?;
//! cache
//!     .set("user:1", &"alice", SetOptions::new().ttl(Duration::from_secs(60)))
//!     .await?;
//! let name: Option<String> = cache.get("user:1").await?;
//! assert_eq!(name.as_deref(), Some("alice"));
//! # Ok(())
//! # }
//! ```

pub mod advisor;
pub mod clock;
pub mod compression;
pub mod entry;
pub mod invalidation;
pub mod manager;
pub mod metrics;
pub mod persistence;
pub mod policy;
pub mod serializer;
pub mod sweep;
pub mod tier;

#[cfg(test)]
mod proptest;

pub use advisor::{
    AdvisorConfig, ConfigChange, OptimizationAdvisor, Suggestion, SuggestionKind,
    SuggestionStatus, SuggestionTarget,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::{CompressionAlgorithm, CompressionConfig, PayloadCompressor};
pub use entry::{CacheEntry, EntrySnapshot, SetOptions};
pub use invalidation::{InvalidationRule, KeyMatcher, RuleAction, RuleMatcher};
pub use manager::{TierManager, TierManagerBuilder};
pub use metrics::{CacheStats, TierStats};
pub use persistence::{BackendStats, InMemoryBackend, PersistenceBackend};
pub use policy::{EvictionPolicy, PlacementPolicy};
pub use serializer::{Payload, PayloadCipher, Serializer};
pub use sweep::{spawn_sweeper, SweepConfig, SweepReport};
pub use tier::{PutOutcome, Tier, TierSettings};
