//! Policy model: limit rules, tiers, windows, and the hot-swappable config.
//!
//! Everything here is plain data. The [`crate::engine::AdmissionEngine`]
//! snapshots a [`PolicyConfig`] per request, so values are cheap to clone and
//! immutable once published.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// Default ceilings applied when no explicit configuration is given.
const DEFAULT_IP_PER_SECOND: u32 = 10;
const DEFAULT_IP_PER_MINUTE: u32 = 600;
const DEFAULT_IP_PER_HOUR: u32 = 10_000;
const DEFAULT_IP_PER_DAY: u32 = 100_000;
const DEFAULT_IP_BURST: u32 = 20;

const DEFAULT_USER_PER_SECOND: u32 = 30;
const DEFAULT_USER_PER_MINUTE: u32 = 1_800;
const DEFAULT_USER_PER_HOUR: u32 = 50_000;
const DEFAULT_USER_PER_DAY: u32 = 500_000;
const DEFAULT_USER_BURST: u32 = 50;

const DEFAULT_GLOBAL_PER_SECOND: u32 = 1_000;
const DEFAULT_GLOBAL_PER_MINUTE: u32 = 60_000;
const DEFAULT_GLOBAL_PER_HOUR: u32 = 1_000_000;
const DEFAULT_GLOBAL_PER_DAY: u32 = 10_000_000;
const DEFAULT_GLOBAL_BURST: u32 = 2_000;

const DEFAULT_MAX_BYPASS_PER_MINUTE: u32 = 10;
const DEFAULT_BYPASS_ALERT_THRESHOLD: u32 = 5;
const DEFAULT_AUTO_BAN_SECS: u64 = 3_600;

const DEFAULT_KEY_PREFIX: &str = "turnstile";

/// Which tier of limits a check runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    /// Per-source-IP ceilings.
    Ip,
    /// Per-authenticated-user ceilings.
    User,
    /// System-wide ceilings shared by all callers.
    Global,
}

impl LimitKind {
    /// Stable lowercase name used in store keys and metrics breakdowns.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Ip => "ip",
            LimitKind::User => "user",
            LimitKind::Global => "global",
        }
    }
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four evaluation windows, shortest first.
///
/// Evaluation order matters: the first window to deny stops the check, so a
/// per-second rejection never consumes hour/day tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Second,
    Minute,
    Hour,
    Day,
}

impl Window {
    /// All windows in evaluation order.
    pub const ALL: [Window; 4] = [Window::Second, Window::Minute, Window::Hour, Window::Day];

    /// Stable name used as the store key suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Second => "second",
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }

    /// Wall duration of the window; also the TTL of its bucket key.
    pub fn duration(&self) -> Duration {
        match self {
            Window::Second => Duration::from_secs(1),
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(3_600),
            Window::Day => Duration::from_secs(86_400),
        }
    }
}

/// Request ceilings for one tier or endpoint. A field of 0 means that window
/// is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRules {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
    /// Extra short-window headroom: a fresh bucket holds
    /// `max(window limit, burst_size)` tokens.
    pub burst_size: u32,
}

impl LimitRules {
    /// Rules that enforce nothing.
    pub const fn unlimited() -> Self {
        Self {
            requests_per_second: 0,
            requests_per_minute: 0,
            requests_per_hour: 0,
            requests_per_day: 0,
            burst_size: 0,
        }
    }

    /// The configured ceiling for one window.
    pub fn window_limit(&self, window: Window) -> u32 {
        match window {
            Window::Second => self.requests_per_second,
            Window::Minute => self.requests_per_minute,
            Window::Hour => self.requests_per_hour,
            Window::Day => self.requests_per_day,
        }
    }

    /// Scale every ceiling by `multiplier`, truncating toward zero.
    ///
    /// A multiplier of 1.0 returns the rules unchanged; degradation only ever
    /// shrinks ceilings.
    pub fn scaled(&self, multiplier: f64) -> Self {
        if multiplier >= 1.0 {
            return *self;
        }
        let scale = |v: u32| -> u32 { (f64::from(v) * multiplier) as u32 };
        Self {
            requests_per_second: scale(self.requests_per_second),
            requests_per_minute: scale(self.requests_per_minute),
            requests_per_hour: scale(self.requests_per_hour),
            requests_per_day: scale(self.requests_per_day),
            burst_size: scale(self.burst_size),
        }
    }

    /// True when no window is enforced.
    pub fn is_unlimited(&self) -> bool {
        self.requests_per_second == 0
            && self.requests_per_minute == 0
            && self.requests_per_hour == 0
            && self.requests_per_day == 0
    }
}

/// One rung of the degradation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadThreshold {
    /// Load percentage at which this rung activates.
    pub load_percentage: f64,
    /// Multiplier applied to every limit field while this rung is active.
    /// Must be in (0, 1].
    pub rate_multiplier: f64,
    /// Endpoint patterns exempt from shrinking at this rung.
    pub priority_endpoints: Vec<String>,
}

/// Load-based graceful degradation settings.
///
/// The highest threshold whose `load_percentage <= load` wins, regardless of
/// list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationConfig {
    pub enabled: bool,
    pub thresholds: Vec<LoadThreshold>,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: vec![
                LoadThreshold {
                    load_percentage: 70.0,
                    rate_multiplier: 0.8,
                    priority_endpoints: Vec::new(),
                },
                LoadThreshold {
                    load_percentage: 85.0,
                    rate_multiplier: 0.6,
                    priority_endpoints: Vec::new(),
                },
                LoadThreshold {
                    load_percentage: 95.0,
                    rate_multiplier: 0.3,
                    priority_endpoints: Vec::new(),
                },
            ],
        }
    }
}

/// Bypass-attempt (DDoS heuristic) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassDetectionConfig {
    pub enabled: bool,
    /// Rejections per identifier per minute before an automatic ban.
    pub max_failed_attempts_per_minute: u32,
    /// How long an automatic ban lasts.
    pub ban_duration: Duration,
    /// Rejections per minute before a high-severity alert is logged.
    /// Independent of the ban threshold.
    pub alert_threshold: u32,
}

impl Default for BypassDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failed_attempts_per_minute: DEFAULT_MAX_BYPASS_PER_MINUTE,
            ban_duration: Duration::from_secs(DEFAULT_AUTO_BAN_SECS),
            alert_threshold: DEFAULT_BYPASS_ALERT_THRESHOLD,
        }
    }
}

/// Complete admission policy. Replaced whole via
/// [`crate::engine::AdmissionEngine::update_config`]; there is no partial
/// update. In-flight requests may finish under the previous policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Master switch; when false every check is allowed with an empty result.
    pub enabled: bool,
    /// Namespace prefix for every store key.
    pub key_prefix: String,
    pub ip_limits: LimitRules,
    pub user_limits: LimitRules,
    pub global_limits: LimitRules,
    /// Endpoint overrides: exact match first, then the first pattern with a
    /// trailing `*` that prefixes the endpoint, in insertion order.
    pub endpoint_limits: Vec<(String, LimitRules)>,
    /// IP literals or CIDR blocks exempt from every check.
    pub ip_whitelist: Vec<String>,
    /// User identifiers exempt from every check (exact match only).
    pub user_whitelist: Vec<String>,
    pub bypass_detection: BypassDetectionConfig,
    pub degradation: DegradationConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ip_limits: LimitRules {
                requests_per_second: DEFAULT_IP_PER_SECOND,
                requests_per_minute: DEFAULT_IP_PER_MINUTE,
                requests_per_hour: DEFAULT_IP_PER_HOUR,
                requests_per_day: DEFAULT_IP_PER_DAY,
                burst_size: DEFAULT_IP_BURST,
            },
            user_limits: LimitRules {
                requests_per_second: DEFAULT_USER_PER_SECOND,
                requests_per_minute: DEFAULT_USER_PER_MINUTE,
                requests_per_hour: DEFAULT_USER_PER_HOUR,
                requests_per_day: DEFAULT_USER_PER_DAY,
                burst_size: DEFAULT_USER_BURST,
            },
            global_limits: LimitRules {
                requests_per_second: DEFAULT_GLOBAL_PER_SECOND,
                requests_per_minute: DEFAULT_GLOBAL_PER_MINUTE,
                requests_per_hour: DEFAULT_GLOBAL_PER_HOUR,
                requests_per_day: DEFAULT_GLOBAL_PER_DAY,
                burst_size: DEFAULT_GLOBAL_BURST,
            },
            endpoint_limits: Vec::new(),
            ip_whitelist: Vec::new(),
            user_whitelist: Vec::new(),
            bypass_detection: BypassDetectionConfig::default(),
            degradation: DegradationConfig::default(),
        }
    }
}

impl PolicyConfig {
    /// The tier rules for a limit kind.
    pub fn rules_for(&self, kind: LimitKind) -> LimitRules {
        match kind {
            LimitKind::Ip => self.ip_limits,
            LimitKind::User => self.user_limits,
            LimitKind::Global => self.global_limits,
        }
    }

    /// Resolve endpoint override rules: exact match wins, then the first
    /// matching wildcard pattern in insertion order.
    pub fn resolve_endpoint(&self, endpoint: &str) -> Option<LimitRules> {
        if let Some((_, rules)) = self.endpoint_limits.iter().find(|(p, _)| p == endpoint) {
            return Some(*rules);
        }
        self.endpoint_limits
            .iter()
            .find(|(p, _)| p.ends_with('*') && pattern_matches(p, endpoint))
            .map(|(_, rules)| *rules)
    }

    /// Validate invariants that would otherwise surface as confusing runtime
    /// behavior. Called by the engine before accepting a config.
    pub fn validate(&self) -> Result<(), String> {
        if self.key_prefix.is_empty() {
            return Err("key_prefix must not be empty".to_string());
        }
        for threshold in &self.degradation.thresholds {
            if !(0.0..=100.0).contains(&threshold.load_percentage) {
                return Err(format!(
                    "load_percentage must be within 0..=100 (got {})",
                    threshold.load_percentage
                ));
            }
            if !(threshold.rate_multiplier > 0.0 && threshold.rate_multiplier <= 1.0) {
                return Err(format!(
                    "rate_multiplier must be within (0, 1] (got {})",
                    threshold.rate_multiplier
                ));
            }
        }
        if self.bypass_detection.enabled {
            if self.bypass_detection.max_failed_attempts_per_minute == 0 {
                return Err("max_failed_attempts_per_minute must be > 0 when bypass detection is enabled".to_string());
            }
            if self.bypass_detection.ban_duration.is_zero() {
                return Err("ban_duration must be > 0 when bypass detection is enabled".to_string());
            }
        }
        Ok(())
    }
}

/// Endpoint pattern match: exact, or prefix when the pattern ends with `*`.
pub(crate) fn pattern_matches(pattern: &str, endpoint: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        endpoint.starts_with(prefix)
    } else {
        pattern == endpoint
    }
}
