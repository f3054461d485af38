//! The admission engine: whitelist → ban → degradation-adjusted multi-window
//! token buckets, with bypass escalation and metrics on the way out.
//!
//! The engine owns no authoritative state. Every counter and ban is a store
//! operation, so any number of process instances sharing a store make
//! consistent decisions. Clones share the same policy, store handle, and
//! metrics via `Arc`.

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

use crate::banlist::{self, BanRecord};
use crate::bypass;
use crate::clock::unix_now;
use crate::degradation;
use crate::error::AdmissionError;
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::policy::{LimitKind, LimitRules, PolicyConfig, Window};
use crate::store::CounterStore;

/// Outcome of one admission check. Response value only; never persisted.
///
/// Adapters derive `X-RateLimit-Limit`, `X-RateLimit-Remaining`,
/// `X-RateLimit-Reset`, and `Retry-After` from these fields and must not
/// recompute them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Configured ceiling of the window that produced this result (0 when no
    /// window was enforced).
    pub limit: u32,
    /// Tokens left in that window.
    pub remaining: u32,
    /// How long to wait before retrying; zero when allowed.
    pub retry_after: Duration,
    /// Unix seconds when the deciding window resets (0 when no window was
    /// enforced).
    pub reset_at: u64,
    pub kind: LimitKind,
    pub identifier: String,
}

impl RateLimitResult {
    fn unlimited(identifier: &str, kind: LimitKind) -> Self {
        Self {
            allowed: true,
            limit: 0,
            remaining: 0,
            retry_after: Duration::ZERO,
            reset_at: 0,
            kind,
            identifier: identifier.to_string(),
        }
    }

    fn denied(identifier: &str, kind: LimitKind, limit: u32, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after,
            reset_at: unix_now() + retry_after.as_secs(),
            kind,
            identifier: identifier.to_string(),
        }
    }
}

/// Which key namespace a window check runs against.
enum KeyScope<'a> {
    /// `{prefix}:{kind}:{identifier}:{window}`
    Tier,
    /// `{prefix}:{identifier}:endpoint:{endpoint}:{window}`
    Endpoint(&'a str),
}

impl KeyScope<'_> {
    fn key(&self, prefix: &str, kind: LimitKind, identifier: &str, window: Window) -> String {
        match self {
            KeyScope::Tier => {
                format!("{}:{}:{}:{}", prefix, kind.as_str(), identifier, window.as_str())
            }
            KeyScope::Endpoint(endpoint) => {
                format!("{}:{}:endpoint:{}:{}", prefix, identifier, endpoint, window.as_str())
            }
        }
    }
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Multi-tier admission engine.
#[derive(Clone)]
pub struct AdmissionEngine {
    store: Arc<dyn CounterStore>,
    policy: Arc<ArcSwap<PolicyConfig>>,
    metrics: Arc<MetricsAggregator>,
}

impl AdmissionEngine {
    /// Build an engine with the default policy.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            policy: Arc::new(ArcSwap::from_pointee(PolicyConfig::default())),
            metrics: Arc::new(MetricsAggregator::new()),
        }
    }

    /// Build an engine with an explicit, validated policy.
    pub fn with_config(
        store: Arc<dyn CounterStore>,
        config: PolicyConfig,
    ) -> Result<Self, AdmissionError> {
        config.validate().map_err(|reason| AdmissionError::InvalidConfig { reason })?;
        Ok(Self {
            store,
            policy: Arc::new(ArcSwap::from_pointee(config)),
            metrics: Arc::new(MetricsAggregator::new()),
        })
    }

    /// Replace the whole policy atomically. In-flight checks finish under
    /// the policy they started with; the next check sees the new one.
    pub fn update_config(&self, config: PolicyConfig) -> Result<(), AdmissionError> {
        config.validate().map_err(|reason| AdmissionError::InvalidConfig { reason })?;
        self.policy.store(Arc::new(config));
        tracing::info!("admission policy replaced");
        Ok(())
    }

    /// Snapshot the active policy.
    pub fn config(&self) -> Arc<PolicyConfig> {
        self.policy.load_full()
    }

    /// Whether the identifier is exempt from every check under the active
    /// policy. Pure config read; never touches the store.
    pub fn is_whitelisted(&self, identifier: &str, kind: LimitKind) -> bool {
        banlist::is_whitelisted(&self.policy.load_full(), identifier, kind)
    }

    /// Admission check for one identifier against its tier limits.
    ///
    /// Store errors during token-bucket evaluation propagate: once counter
    /// evaluation has begun, an ambiguous result must not silently allow.
    /// Ban-lookup and load-sampling failures fail open with a warning.
    pub async fn allow(
        &self,
        identifier: &str,
        kind: LimitKind,
    ) -> Result<RateLimitResult, AdmissionError> {
        let policy = self.policy.load_full();
        self.allow_under(&policy, identifier, kind).await
    }

    /// Admission check that also enforces endpoint-override limits.
    ///
    /// The general tier is evaluated first and its rejection returned
    /// unchanged. On general success with a matching override, the endpoint
    /// buckets are evaluated with the endpoint as degradation priority
    /// context. Callers receive the most specific rejection but the least
    /// specific success payload.
    pub async fn allow_endpoint(
        &self,
        endpoint: &str,
        identifier: &str,
        kind: LimitKind,
    ) -> Result<RateLimitResult, AdmissionError> {
        let policy = self.policy.load_full();
        let general = self.allow_under(&policy, identifier, kind).await?;
        if !general.allowed {
            return Ok(general);
        }
        // Disabled limiting and whitelisted identifiers bypass endpoint
        // overrides along with everything else.
        if !policy.enabled || banlist::is_whitelisted(&policy, identifier, kind) {
            return Ok(general);
        }
        let Some(override_rules) = policy.resolve_endpoint(endpoint) else {
            return Ok(general);
        };

        let multiplier = self.sampled_multiplier(&policy, Some(endpoint)).await;
        let rules = override_rules.scaled(multiplier);
        let result = self
            .check_windows(&policy, &rules, identifier, kind, KeyScope::Endpoint(endpoint))
            .await?;
        if result.allowed {
            Ok(general)
        } else {
            self.metrics.record_blocked(kind, identifier);
            self.forward_bypass(&policy, identifier, "endpoint limit exceeded").await;
            Ok(result)
        }
    }

    async fn allow_under(
        &self,
        policy: &PolicyConfig,
        identifier: &str,
        kind: LimitKind,
    ) -> Result<RateLimitResult, AdmissionError> {
        if !policy.enabled {
            return Ok(RateLimitResult::unlimited(identifier, kind));
        }
        if banlist::is_whitelisted(policy, identifier, kind) {
            return Ok(RateLimitResult::unlimited(identifier, kind));
        }

        match banlist::ban_status(self.store.as_ref(), &policy.key_prefix, identifier).await {
            Ok(Some(retry_after)) => {
                tracing::debug!(identifier, kind = %kind, "banned identifier rejected");
                self.metrics.record_blocked(kind, identifier);
                return Ok(RateLimitResult::denied(identifier, kind, 0, retry_after));
            }
            Ok(None) => {}
            Err(err) => {
                // Fail open: a degraded store must not take the API down.
                tracing::warn!(identifier, error = %err, "ban lookup failed, failing open");
            }
        }

        let multiplier = self.sampled_multiplier(policy, None).await;
        let rules = policy.rules_for(kind).scaled(multiplier);

        if let Err(err) = degradation::note_request(self.store.as_ref(), &policy.key_prefix).await
        {
            tracing::debug!(error = %err, "load counter increment failed");
        }

        let result =
            self.check_windows(policy, &rules, identifier, kind, KeyScope::Tier).await?;
        if result.allowed {
            self.metrics.record_allowed(kind);
        } else {
            self.metrics.record_blocked(kind, identifier);
            self.forward_bypass(policy, identifier, "rate limit exceeded").await;
        }
        Ok(result)
    }

    /// Evaluate the four windows in order, shortest first. A zero-limit
    /// window is skipped; the first denial stops evaluation, so longer
    /// windows keep their tokens. There is deliberately no rollback of
    /// shorter-window tokens when a longer window denies.
    async fn check_windows(
        &self,
        policy: &PolicyConfig,
        rules: &LimitRules,
        identifier: &str,
        kind: LimitKind,
        scope: KeyScope<'_>,
    ) -> Result<RateLimitResult, AdmissionError> {
        // (limit, remaining, reset_after) of the most constrained window so
        // far, for the success payload.
        let mut tightest: Option<(u32, i64, Duration)> = None;

        for window in Window::ALL {
            let limit = rules.window_limit(window);
            if limit == 0 {
                continue;
            }
            // Burst raises short-window headroom but never lowers a window
            // below its configured ceiling.
            let capacity = i64::from(limit.max(rules.burst_size));
            let key = scope.key(&policy.key_prefix, kind, identifier, window);
            let grant = self.store.take_token(&key, capacity, window.duration()).await?;

            if !grant.allowed {
                tracing::debug!(
                    identifier,
                    kind = %kind,
                    window = window.as_str(),
                    limit,
                    "request denied by window"
                );
                return Ok(RateLimitResult::denied(identifier, kind, limit, grant.reset_after));
            }
            let tighter = match tightest {
                None => true,
                Some((_, remaining, _)) => grant.remaining < remaining,
            };
            if tighter {
                tightest = Some((limit, grant.remaining, grant.reset_after));
            }
        }

        match tightest {
            None => Ok(RateLimitResult::unlimited(identifier, kind)),
            Some((limit, remaining, reset_after)) => Ok(RateLimitResult {
                allowed: true,
                limit,
                remaining: clamp_u32(remaining),
                retry_after: Duration::ZERO,
                reset_at: unix_now() + reset_after.as_secs(),
                kind,
                identifier: identifier.to_string(),
            }),
        }
    }

    /// Sample load and map it through the degradation table. Sampling
    /// failures degrade to 1.0: load shedding is an optimization, not a
    /// correctness gate.
    async fn sampled_multiplier(&self, policy: &PolicyConfig, endpoint: Option<&str>) -> f64 {
        if !policy.degradation.enabled {
            return 1.0;
        }
        match degradation::current_load(
            self.store.as_ref(),
            &policy.key_prefix,
            policy.global_limits.requests_per_second,
        )
        .await
        {
            Ok(load) => degradation::multiplier(&policy.degradation, load, endpoint),
            Err(err) => {
                tracing::warn!(error = %err, "load sampling failed, skipping degradation");
                1.0
            }
        }
    }

    /// Best-effort bypass escalation after a denial. Never propagates.
    async fn forward_bypass(&self, policy: &PolicyConfig, identifier: &str, reason: &str) {
        if !policy.bypass_detection.enabled {
            return;
        }
        match bypass::record(
            self.store.as_ref(),
            &policy.key_prefix,
            &policy.bypass_detection,
            identifier,
            reason,
        )
        .await
        {
            Ok(outcome) => {
                self.metrics.record_bypass_attempt();
                if outcome.auto_banned {
                    tracing::debug!(
                        identifier,
                        attempts = outcome.attempts,
                        "denial escalated to auto-ban"
                    );
                } else if outcome.alerted {
                    tracing::debug!(
                        identifier,
                        attempts = outcome.attempts,
                        "denial volume above alert threshold"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(identifier, error = %err, "bypass attempt recording failed");
            }
        }
    }

    /// Record a bypass attempt explicitly (e.g. from an auth failure path).
    /// Unlike the internal post-denial forwarding, errors propagate here so
    /// administrative callers can see them.
    pub async fn record_bypass_attempt(
        &self,
        identifier: &str,
        reason: &str,
    ) -> Result<(), AdmissionError> {
        let policy = self.policy.load_full();
        if !policy.bypass_detection.enabled {
            return Ok(());
        }
        bypass::record(
            self.store.as_ref(),
            &policy.key_prefix,
            &policy.bypass_detection,
            identifier,
            reason,
        )
        .await?;
        self.metrics.record_bypass_attempt();
        Ok(())
    }

    /// Ban an identifier. `duration: None` means permanent until
    /// [`unban`](Self::unban).
    pub async fn ban(
        &self,
        identifier: &str,
        duration: Option<Duration>,
        reason: &str,
    ) -> Result<(), AdmissionError> {
        let policy = self.policy.load_full();
        banlist::write_ban(self.store.as_ref(), &policy.key_prefix, identifier, duration, reason)
            .await?;
        tracing::info!(
            identifier,
            permanent = duration.is_none(),
            duration_secs = duration.map(|d| d.as_secs()).unwrap_or(0),
            reason,
            "identifier banned"
        );
        Ok(())
    }

    /// Lift a ban immediately. Returns whether one existed.
    pub async fn unban(&self, identifier: &str) -> Result<bool, AdmissionError> {
        let policy = self.policy.load_full();
        let existed =
            banlist::remove_ban(self.store.as_ref(), &policy.key_prefix, identifier).await?;
        if existed {
            tracing::info!(identifier, "ban lifted");
        }
        Ok(existed)
    }

    pub async fn is_banned(&self, identifier: &str) -> Result<bool, AdmissionError> {
        let policy = self.policy.load_full();
        Ok(banlist::is_banned(self.store.as_ref(), &policy.key_prefix, identifier).await?)
    }

    /// The stored record behind a ban, if any.
    pub async fn ban_record(&self, identifier: &str) -> Result<Option<BanRecord>, AdmissionError> {
        let policy = self.policy.load_full();
        banlist::ban_record(self.store.as_ref(), &policy.key_prefix, identifier).await
    }

    /// Current load percentage (0–100). Unlike internal sampling, errors
    /// propagate so monitoring callers can distinguish "zero load" from
    /// "store down".
    pub async fn current_load(&self) -> Result<f64, AdmissionError> {
        let policy = self.policy.load_full();
        Ok(degradation::current_load(
            self.store.as_ref(),
            &policy.key_prefix,
            policy.global_limits.requests_per_second,
        )
        .await?)
    }

    /// Snapshot process-local counters plus live store reads (banned count,
    /// current load). The store reads are best-effort: on failure they are
    /// reported as zero and a warning is logged.
    pub async fn metrics(&self) -> MetricsSnapshot {
        let policy = self.policy.load_full();
        let mut snapshot = self.metrics.snapshot();
        match banlist::banned_count(self.store.as_ref(), &policy.key_prefix).await {
            Ok(count) => snapshot.banned_count = count,
            Err(err) => tracing::warn!(error = %err, "banned-count scan failed"),
        }
        match degradation::current_load(
            self.store.as_ref(),
            &policy.key_prefix,
            policy.global_limits.requests_per_second,
        )
        .await
        {
            Ok(load) => snapshot.current_load = load,
            Err(err) => tracing::warn!(error = %err, "load probe failed"),
        }
        snapshot
    }
}
