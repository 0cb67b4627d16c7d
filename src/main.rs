//! tiercache CLI
//!
//! Validates cache configurations and replays operation logs against a fresh
//! engine, reporting stats and optimization suggestions.
//!
//! # Operation Log
//!
//! One JSON object per line:
//!
//! ```text
//! {"op": "set", "key": "user:1", "value": {"name": "a"}, "ttl": "30s", "tags": ["users"]}
//! {"op": "get", "key": "user:1"}
//! {"op": "advance", "by": "1m"}
//! {"op": "invalidate", "pattern": "^user:"}
//! {"op": "invalidate_tags", "tags": ["users"]}
//! {"op": "delete", "key": "user:1"}
//! {"op": "sweep"}
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::{spawn_sweeper, Clock, InMemoryBackend, ManualClock, SetOptions, SystemClock};
use tiercache::config::{format_duration, parse_duration, CacheConfig, TierKind};
use tiercache::TierManager;

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiercache - multi-tier caching engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and validate a configuration file, then print the tier layout
    Validate {
        /// YAML configuration file
        #[arg(long, env = "TIERCACHE_CONFIG")]
        config: PathBuf,
    },

    /// Replay a JSON-lines operation log against a fresh cache
    Replay {
        /// YAML configuration file (built-in defaults when omitted)
        #[arg(long, env = "TIERCACHE_CONFIG")]
        config: Option<PathBuf>,

        /// Operation log, one JSON object per line
        #[arg(long)]
        ops: PathBuf,

        /// Also run the background sweeper while replaying
        #[arg(long)]
        background_sweep: bool,
    },
}

/// One replayed operation
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Op {
    Set {
        key: String,
        value: Value,
        #[serde(default)]
        ttl: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    Get {
        key: String,
    },
    Delete {
        key: String,
    },
    Invalidate {
        pattern: String,
    },
    InvalidateTags {
        tags: Vec<String>,
    },
    Sweep,
    /// Move the replay clock forward
    Advance {
        by: String,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    match args.command {
        Command::Validate { config } => validate(&config),
        Command::Replay {
            config,
            ops,
            background_sweep,
        } => replay(config.as_deref(), &ops, background_sweep).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    match path {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(CacheConfig::default()),
    }
}

fn validate(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;

    let mut tiers = config.tiers.clone();
    tiers.sort_by_key(|t| t.latency);

    println!(
        "{:<12} {:<11} {:>14} {:>11} {:<10} {:>10} {:>12} {:>10}",
        "TIER", "KIND", "CAPACITY", "MAX_ENTRIES", "POLICY", "TTL", "COMPRESS_>", "LATENCY"
    );
    for tier in &tiers {
        println!(
            "{:<12} {:<11} {:>14} {:>11} {:<10} {:>10} {:>12} {:>10}",
            tier.id,
            tier.kind.to_string(),
            tier.capacity_bytes,
            tier.max_entries,
            tier.eviction_policy.to_string(),
            tier.ttl_default.map(format_duration).unwrap_or_else(|| "-".into()),
            tier.compression_threshold
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".into()),
            format_duration(tier.latency),
        );
    }

    info!(tiers = tiers.len(), "Configuration is valid");
    Ok(())
}

async fn replay(config_path: Option<&Path>, ops_path: &Path, background_sweep: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let sweep = config.sweep.clone();
    let persistent: Vec<String> = config
        .tiers
        .iter()
        .filter(|t| t.kind == TierKind::Persistent)
        .map(|t| t.id.clone())
        .collect();

    let clock = Arc::new(ManualClock::new(SystemClock.now_millis()));
    let mut builder = TierManager::builder(config).clock(clock.clone());
    for id in persistent {
        builder = builder.backend(id, Arc::new(InMemoryBackend::new()));
    }
    let manager = Arc::new(builder.build().context("failed to build cache")?);

    let shutdown = CancellationToken::new();
    let sweeper = (background_sweep && sweep.enabled)
        .then(|| spawn_sweeper(manager.clone(), sweep.interval, shutdown.clone()));

    let text = std::fs::read_to_string(ops_path)
        .with_context(|| format!("failed to read {}", ops_path.display()))?;

    let mut results = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let op: Op = serde_json::from_str(line)
            .with_context(|| format!("invalid operation on line {}", number + 1))?;
        debug!(line = number + 1, ?op, "Replaying");

        let result = apply(&manager, &clock, op)
            .await
            .with_context(|| format!("operation on line {} failed", number + 1))?;
        results.push(result);
    }

    shutdown.cancel();
    if let Some(handle) = sweeper {
        handle.await.context("sweeper task panicked")?;
    }

    let report = json!({
        "results": results,
        "stats": manager.cache_stats(),
        "suggestions": manager.suggest_optimizations(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn apply(manager: &TierManager, clock: &ManualClock, op: Op) -> Result<Value> {
    let result = match op {
        Op::Set {
            key,
            value,
            ttl,
            tags,
        } => {
            let mut options = SetOptions::new().tags(tags);
            if let Some(ttl) = ttl {
                options = options.ttl(parse_duration(&ttl)?);
            }
            manager.set(&key, &value, options).await?;
            json!({ "op": "set", "key": key, "tier": manager.tier_of(&key)? })
        }
        Op::Get { key } => {
            let value: Option<Value> = manager.get(&key).await?;
            json!({ "op": "get", "key": key, "value": value })
        }
        Op::Delete { key } => {
            let removed = manager.delete(&key).await?;
            json!({ "op": "delete", "key": key, "removed": removed })
        }
        Op::Invalidate { pattern } => {
            let removed = manager.invalidate(&pattern).await?;
            json!({ "op": "invalidate", "pattern": pattern, "removed": removed })
        }
        Op::InvalidateTags { tags } => {
            let removed = manager.invalidate_by_tags(&tags).await?;
            json!({ "op": "invalidate_tags", "tags": tags, "removed": removed })
        }
        Op::Sweep => {
            let report = manager.sweep_once().await?;
            json!({ "op": "sweep", "report": report })
        }
        Op::Advance { by } => {
            clock.advance(parse_duration(&by)?);
            json!({ "op": "advance", "by": by })
        }
    };
    Ok(result)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Reports go to stdout, logs to stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
