//! Periodic cleanup of the governance stores.
//!
//! # Responsibilities
//! - Drop expired rate buckets, cache entries, abuse records and stale
//!   performance records on their own schedules
//! - Let operators trigger a sweep on demand
//!
//! # Design Decisions
//! - Each kind is single-flight: a sweep already running is skipped, never queued
//! - Missed ticks are skipped rather than bursted
//! - Loops exit on the shared shutdown signal

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::SweepConfig;
use crate::governance::store::GovernanceStore;
use crate::lifecycle::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    RateBuckets,
    Cache,
    Abuse,
    Metrics,
}

impl SweepKind {
    pub const ALL: [SweepKind; 4] = [
        SweepKind::RateBuckets,
        SweepKind::Cache,
        SweepKind::Abuse,
        SweepKind::Metrics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SweepKind::RateBuckets => "rate_buckets",
            SweepKind::Cache => "cache",
            SweepKind::Abuse => "abuse",
            SweepKind::Metrics => "metrics",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn interval(self, config: &SweepConfig) -> Duration {
        let secs = match self {
            SweepKind::RateBuckets => config.rate_buckets_secs,
            SweepKind::Cache => config.cache_secs,
            SweepKind::Abuse => config.abuse_secs,
            SweepKind::Metrics => config.metrics_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown sweep kind '{0}'")]
pub struct UnknownSweepKind(pub String);

impl FromStr for SweepKind {
    type Err = UnknownSweepKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SweepKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownSweepKind(s.to_string()))
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub kind: SweepKind,
    pub removed: usize,
}

/// Clears the in-flight flag when a sweep finishes, even by panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct Sweeper {
    store: Arc<GovernanceStore>,
    config: SweepConfig,
    in_flight: [AtomicBool; 4],
}

impl Sweeper {
    pub fn new(store: Arc<GovernanceStore>, config: SweepConfig) -> Self {
        Self {
            store,
            config,
            in_flight: Default::default(),
        }
    }

    fn begin(&self, kind: SweepKind) -> Option<InFlight<'_>> {
        let flag = &self.in_flight[kind.index()];
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }

    /// Run one sweep now. `None` when the same kind is already running.
    pub fn run_once(&self, kind: SweepKind) -> Option<SweepReport> {
        let Some(_guard) = self.begin(kind) else {
            tracing::debug!(kind = %kind, "Sweep already in flight, skipping");
            return None;
        };

        let removed = match kind {
            SweepKind::RateBuckets => self.store.rate_limiter().sweep_expired(),
            SweepKind::Cache => self.store.cache().sweep_expired(),
            SweepKind::Abuse => self.store.abuse().sweep_expired(),
            SweepKind::Metrics => self.store.performance().sweep_expired(),
        };

        if removed > 0 {
            tracing::debug!(kind = %kind, removed, "Sweep completed");
        }
        Some(SweepReport { kind, removed })
    }

    /// Start one loop per sweep kind. Each exits when `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        SweepKind::ALL
            .into_iter()
            .map(|kind| {
                let sweeper = Arc::clone(self);
                let mut shutdown_rx = shutdown.subscribe();
                let period = kind.interval(&self.config);

                tokio::spawn(async move {
                    tracing::info!(kind = %kind, interval_secs = period.as_secs(), "Sweeper starting");
                    let mut ticker = time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    // The first tick completes immediately.
                    ticker.tick().await;

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                sweeper.run_once(kind);
                            }
                            _ = shutdown_rx.recv() => {
                                tracing::info!(kind = %kind, "Sweeper received shutdown signal, exiting loop");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
