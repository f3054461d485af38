//! Periodic health monitoring over the engine's read-only surface.
//!
//! The monitor is a collaborator, not part of the admission path: it polls
//! [`AdmissionEngine::metrics`] on an interval, compares the snapshot
//! against alert thresholds, and emits `tracing` warnings. Threshold
//! evaluation is a pure function so it can be tested without a running
//! task.

use std::time::Duration;

use crate::engine::AdmissionEngine;
use crate::metrics::MetricsSnapshot;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BLOCK_RATE: f64 = 50.0;
const DEFAULT_MAX_LOAD: f64 = 90.0;
const DEFAULT_MAX_BYPASS_ATTEMPTS: u64 = 100;

/// Alert thresholds and polling cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Alert when the blocked share of requests exceeds this percentage.
    pub max_block_rate: f64,
    /// Alert when sampled load exceeds this percentage.
    pub max_load: f64,
    /// Alert when observed bypass attempts exceed this count.
    pub max_bypass_attempts: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_block_rate: DEFAULT_MAX_BLOCK_RATE,
            max_load: DEFAULT_MAX_LOAD,
            max_bypass_attempts: DEFAULT_MAX_BYPASS_ATTEMPTS,
        }
    }
}

/// A threshold breach found in one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    HighBlockRate { rate: f64, threshold: f64 },
    HighLoad { load: f64, threshold: f64 },
    BypassVolume { count: u64, threshold: u64 },
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::HighBlockRate { rate, threshold } => {
                write!(f, "block rate {:.1}% exceeds {:.1}%", rate, threshold)
            }
            Alert::HighLoad { load, threshold } => {
                write!(f, "load {:.1}% exceeds {:.1}%", load, threshold)
            }
            Alert::BypassVolume { count, threshold } => {
                write!(f, "{} bypass attempts exceed {}", count, threshold)
            }
        }
    }
}

/// Compare one snapshot against the thresholds.
pub fn evaluate(snapshot: &MetricsSnapshot, config: &MonitorConfig) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let rate = snapshot.block_rate();
    if snapshot.total_requests > 0 && rate > config.max_block_rate {
        alerts.push(Alert::HighBlockRate { rate, threshold: config.max_block_rate });
    }
    if snapshot.current_load > config.max_load {
        alerts.push(Alert::HighLoad { load: snapshot.current_load, threshold: config.max_load });
    }
    if snapshot.bypass_attempts > config.max_bypass_attempts {
        alerts.push(Alert::BypassVolume {
            count: snapshot.bypass_attempts,
            threshold: config.max_bypass_attempts,
        });
    }
    alerts
}

/// Handle to a running monitor task. Dropping it stops the polling.
#[derive(Debug)]
pub struct Monitor {
    handle: tokio::task::JoinHandle<()>,
}

impl Monitor {
    /// Start polling `engine` on the configured interval.
    pub fn spawn(engine: AdmissionEngine, config: MonitorConfig) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let snapshot = engine.metrics().await;
                for alert in evaluate(&snapshot, &config) {
                    tracing::warn!(%alert, "admission monitor alert");
                }
            }
        });
        Self { handle }
    }

    /// Stop the monitor now instead of at drop.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
