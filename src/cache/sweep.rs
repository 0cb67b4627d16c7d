//! Background Sweep
//!
//! Periodic maintenance: purge expired entries, retry compression that timed
//! out on the write path, demote cold entries, and refresh the advisor's
//! samples. Each step removes or rewrites one entry per tier lock acquisition,
//! so foreground calls never wait behind a whole sweep.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::manager::TierManager;
use crate::config::duration_str;

/// Background sweep configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Whether the binary starts the sweep loop
    pub enabled: bool,
    /// Time between sweeps
    #[serde(with = "duration_str")]
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
        }
    }
}

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired entries purged
    pub expired: usize,
    /// Entries whose deferred compression completed
    pub compressed: usize,
    /// Cold entries moved to a slower tier
    pub demoted: usize,
    /// Pending suggestions after the advisor pass
    pub pending_suggestions: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.compressed == 0 && self.demoted == 0
    }
}

/// Run [`TierManager::sweep_once`] every `interval` until `shutdown` fires.
pub fn spawn_sweeper(
    manager: Arc<TierManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(manager, interval, shutdown))
}

#[instrument(skip(manager, shutdown))]
async fn run(manager: Arc<TierManager>, period: Duration, shutdown: CancellationToken) {
    info!("Starting cache sweeper");

    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    tick.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Cache sweeper shutting down");
                break;
            }
            _ = tick.tick() => {
                match manager.sweep_once().await {
                    Ok(report) if report.is_empty() => debug!("Sweep found nothing to do"),
                    Ok(report) => info!(
                        expired = report.expired,
                        compressed = report.compressed,
                        demoted = report.demoted,
                        "Sweep completed"
                    ),
                    Err(e) => error!("Sweep failed: {}", e),
                }
            }
        }
    }
}
