//! Bypass-attempt detection: a rolling per-identifier violation counter with
//! auto-ban escalation.
//!
//! Every rejected request counts as a bypass attempt. The counter lives in
//! the shared store with a sliding 60-second TTL (refreshed on each
//! increment), so detection is consistent across processes. Crossing the
//! ban threshold issues an automatic time-bounded ban; crossing the (lower,
//! independent) alert threshold emits a high-severity log.

use std::time::Duration;

use crate::banlist;
use crate::error::AdmissionError;
use crate::policy::BypassDetectionConfig;
use crate::store::CounterStore;

const BYPASS_WINDOW: Duration = Duration::from_secs(60);
const AUTO_BAN_REASON: &str = "automatic ban: bypass attempt threshold exceeded";

pub(crate) fn bypass_key(prefix: &str, identifier: &str) -> String {
    format!("{}:bypass:{}", prefix, identifier)
}

/// What a recorded attempt triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct BypassOutcome {
    pub attempts: i64,
    pub auto_banned: bool,
    pub alerted: bool,
}

/// Record one violation for `identifier` and escalate if thresholds are
/// crossed. Ban and alert thresholds are independent: both, either, or
/// neither may fire on the same event.
pub(crate) async fn record(
    store: &dyn CounterStore,
    prefix: &str,
    config: &BypassDetectionConfig,
    identifier: &str,
    reason: &str,
) -> Result<BypassOutcome, AdmissionError> {
    if !config.enabled {
        return Ok(BypassOutcome::default());
    }

    let attempts = store.incr_expire(&bypass_key(prefix, identifier), BYPASS_WINDOW).await?;

    let alerted = attempts > i64::from(config.alert_threshold);
    if alerted {
        tracing::warn!(
            identifier,
            attempts,
            threshold = config.alert_threshold,
            reason,
            "bypass attempt volume exceeds alert threshold"
        );
    }

    let auto_banned = attempts > i64::from(config.max_failed_attempts_per_minute);
    if auto_banned {
        banlist::write_ban(store, prefix, identifier, Some(config.ban_duration), AUTO_BAN_REASON)
            .await?;
        tracing::warn!(
            identifier,
            attempts,
            ban_duration_secs = config.ban_duration.as_secs(),
            "identifier auto-banned for repeated bypass attempts"
        );
    }

    Ok(BypassOutcome { attempts, auto_banned, alerted })
}
