//! In-process metrics aggregation.
//!
//! Counters are per-process and approximate: each instance reports only what
//! it personally observed, and everything resets on restart. The aggregator
//! has its own mutex, independent of the policy snapshot, so metric updates
//! never serialize behind config reads.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::policy::LimitKind;

/// How many identifiers the top-blocked lists keep.
const TOP_BLOCKED_LIMIT: usize = 10;

/// Allowed/blocked breakdown for one limit tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub total: u64,
    pub allowed: u64,
    pub blocked: u64,
}

/// Point-in-time view of engine activity.
///
/// `banned_count` and `current_load` are live store reads filled in by the
/// engine; everything else is this process's own tally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub bypass_attempts: u64,
    pub banned_count: u64,
    pub current_load: f64,
    pub ip: KindCounts,
    pub user: KindCounts,
    pub global: KindCounts,
    /// Blocked IP identifiers, highest block count first, top 10.
    pub top_blocked_ips: Vec<(String, u64)>,
    /// Blocked user identifiers, highest block count first, top 10.
    pub top_blocked_users: Vec<(String, u64)>,
}

impl MetricsSnapshot {
    /// Share of observed requests that were blocked, in `0.0..=100.0`.
    pub fn block_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.blocked_requests as f64 / self.total_requests as f64) * 100.0
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    allowed: u64,
    blocked: u64,
    bypass_attempts: u64,
    ip: KindCounts,
    user: KindCounts,
    global: KindCounts,
    blocked_ips: HashMap<String, u64>,
    blocked_users: HashMap<String, u64>,
}

impl Counters {
    fn kind_mut(&mut self, kind: LimitKind) -> &mut KindCounts {
        match kind {
            LimitKind::Ip => &mut self.ip,
            LimitKind::User => &mut self.user,
            LimitKind::Global => &mut self.global,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MetricsAggregator {
    inner: Mutex<Counters>,
}

impl MetricsAggregator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self, kind: LimitKind) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total += 1;
        inner.allowed += 1;
        let kind_counts = inner.kind_mut(kind);
        kind_counts.total += 1;
        kind_counts.allowed += 1;
    }

    pub(crate) fn record_blocked(&self, kind: LimitKind, identifier: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total += 1;
        inner.blocked += 1;
        let kind_counts = inner.kind_mut(kind);
        kind_counts.total += 1;
        kind_counts.blocked += 1;
        match kind {
            LimitKind::Ip => {
                *inner.blocked_ips.entry(identifier.to_string()).or_insert(0) += 1;
            }
            LimitKind::User => {
                *inner.blocked_users.entry(identifier.to_string()).or_insert(0) += 1;
            }
            LimitKind::Global => {}
        }
    }

    pub(crate) fn record_bypass_attempt(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.bypass_attempts += 1;
    }

    /// Snapshot the process-local counters. The engine overlays the live
    /// store reads (`banned_count`, `current_load`) afterwards.
    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        MetricsSnapshot {
            total_requests: inner.total,
            allowed_requests: inner.allowed,
            blocked_requests: inner.blocked,
            bypass_attempts: inner.bypass_attempts,
            banned_count: 0,
            current_load: 0.0,
            ip: inner.ip,
            user: inner.user,
            global: inner.global,
            top_blocked_ips: top_n(&inner.blocked_ips),
            top_blocked_users: top_n(&inner.blocked_users),
        }
    }
}

fn top_n(counts: &HashMap<String, u64>) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> =
        counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    // Ties broken by identifier so snapshots are deterministic.
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(TOP_BLOCKED_LIMIT);
    entries
}
