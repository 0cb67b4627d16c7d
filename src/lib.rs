//! tiercache - Multi-Tier Caching Engine
//!
//! Places entries across tiers of increasing capacity and latency, expires
//! them by time-to-live, evicts them under pressure with a configurable policy
//! and supports bulk invalidation by key pattern or tag.
//!
//! # Architecture
//!
//! ```text
//! caller → TierManager → Tier (hot) → Tier (warm) → Tier (persistent)
//!               │                                        │
//!               ├── InvalidationEngine                   └── PersistenceBackend
//!               ├── OptimizationAdvisor
//!               └── sweeper (background)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, placement, eviction, invalidation and the advisor
//! - [`config`] - Configuration types and duration parsing
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheStats, InMemoryBackend, PersistenceBackend, SetOptions, Suggestion, TierManager,
    TierStats,
};
pub use config::{CacheConfig, TierConfig, TierKind};
pub use error::{Error, Result};
