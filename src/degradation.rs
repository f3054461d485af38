//! Load-based graceful degradation.
//!
//! Load is a proxy metric: the share of the global per-second ceiling
//! consumed in the last second, read from a store counter that normal
//! traffic populates. It is not CPU load; with no traffic flowing through
//! the engine the reading is zero.

use crate::policy::{pattern_matches, DegradationConfig};
use crate::store::{CounterStore, StoreError};
use std::time::Duration;

/// Store key of the rolling global request counter used for load sampling.
pub(crate) fn load_key(prefix: &str) -> String {
    format!("{}:metrics:requests_per_second", prefix)
}

/// Count one request toward the current second's global volume.
///
/// Fixed one-second window: the TTL is set when the key is created and not
/// refreshed, so the counter resets every second under steady traffic.
pub(crate) async fn note_request(
    store: &dyn CounterStore,
    prefix: &str,
) -> Result<i64, StoreError> {
    store.incr_window(&load_key(prefix), Duration::from_secs(1)).await
}

/// Current load percentage in `0.0..=100.0`.
///
/// `(requests in the last second / global per-second limit) x 100`, clamped.
/// A zero global limit reads as zero load.
pub(crate) async fn current_load(
    store: &dyn CounterStore,
    prefix: &str,
    global_per_second: u32,
) -> Result<f64, StoreError> {
    if global_per_second == 0 {
        return Ok(0.0);
    }
    let observed = store.get_i64(&load_key(prefix)).await?.unwrap_or(0).max(0);
    let load = (observed as f64 / f64::from(global_per_second)) * 100.0;
    Ok(load.min(100.0))
}

/// Limit-shrinking multiplier for the given load, in `(0, 1]`.
///
/// The highest threshold whose `load_percentage <= load` applies, regardless
/// of list order. An endpoint matching that threshold's priority patterns is
/// exempt and keeps a multiplier of 1.0.
pub(crate) fn multiplier(config: &DegradationConfig, load: f64, endpoint: Option<&str>) -> f64 {
    if !config.enabled {
        return 1.0;
    }
    let applicable = config
        .thresholds
        .iter()
        .filter(|t| t.load_percentage <= load)
        .max_by(|a, b| {
            a.load_percentage
                .partial_cmp(&b.load_percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    match applicable {
        None => 1.0,
        Some(threshold) => {
            if let Some(endpoint) = endpoint {
                let exempt = threshold
                    .priority_endpoints
                    .iter()
                    .any(|pattern| pattern_matches(pattern, endpoint));
                if exempt {
                    return 1.0;
                }
            }
            threshold.rate_multiplier
        }
    }
}
