//! Whitelist matching and the ban subsystem.
//!
//! Whitelist checks are pure config reads and never touch the store or
//! fail: a malformed CIDR entry is a non-match, not an error, because this
//! runs on the hot request path. Bans live in the store as JSON records
//! keyed by identifier with a TTL equal to the ban duration; no TTL means
//! permanent.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::clock::unix_now;
use crate::error::AdmissionError;
use crate::policy::{LimitKind, PolicyConfig};
use crate::store::{CounterStore, StoreError};

/// Retry hint for permanent bans, where no TTL exists to report.
pub(crate) const PERMANENT_BAN_RETRY_AFTER: Duration = Duration::from_secs(3_600);

/// A ban as stored, JSON-serialized, under `{prefix}:ban:{identifier}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub identifier: String,
    /// Unix seconds when the ban was issued.
    pub banned_at: u64,
    /// Unix seconds when the ban lapses; `None` for permanent bans.
    pub expires_at: Option<u64>,
    pub reason: String,
    pub permanent: bool,
}

pub(crate) fn ban_key(prefix: &str, identifier: &str) -> String {
    format!("{}:ban:{}", prefix, identifier)
}

/// Whether the identifier is exempt from every limit check.
///
/// IP tier: exact entry match, or containment in an entry parsed as CIDR.
/// User tier: exact match only. The global tier has no whitelist.
pub(crate) fn is_whitelisted(config: &PolicyConfig, identifier: &str, kind: LimitKind) -> bool {
    match kind {
        LimitKind::Ip => {
            if config.ip_whitelist.iter().any(|entry| entry == identifier) {
                return true;
            }
            let Ok(ip) = identifier.parse::<IpAddr>() else {
                return false;
            };
            config.ip_whitelist.iter().any(|entry| {
                entry.parse::<ipnet::IpNet>().is_ok_and(|net| net.contains(&ip))
            })
        }
        LimitKind::User => config.user_whitelist.iter().any(|entry| entry == identifier),
        LimitKind::Global => false,
    }
}

/// Write a ban record. `duration: None` means permanent until explicitly
/// removed.
pub(crate) async fn write_ban(
    store: &dyn CounterStore,
    prefix: &str,
    identifier: &str,
    duration: Option<Duration>,
    reason: &str,
) -> Result<(), AdmissionError> {
    let now = unix_now();
    let record = BanRecord {
        identifier: identifier.to_string(),
        banned_at: now,
        expires_at: duration.map(|d| now + d.as_secs()),
        reason: reason.to_string(),
        permanent: duration.is_none(),
    };
    let payload = serde_json::to_string(&record)
        .map_err(|e| AdmissionError::Codec { detail: e.to_string() })?;
    store.put(&ban_key(prefix, identifier), payload, duration).await?;
    Ok(())
}

/// Ban state for the admission path: `None` when not banned, otherwise the
/// retry-after to report. Timed bans report their real remaining TTL;
/// permanent bans fall back to [`PERMANENT_BAN_RETRY_AFTER`].
pub(crate) async fn ban_status(
    store: &dyn CounterStore,
    prefix: &str,
    identifier: &str,
) -> Result<Option<Duration>, StoreError> {
    let key = ban_key(prefix, identifier);
    if !store.exists(&key).await? {
        return Ok(None);
    }
    let retry_after = store.ttl_of(&key).await?.unwrap_or(PERMANENT_BAN_RETRY_AFTER);
    Ok(Some(retry_after))
}

pub(crate) async fn is_banned(
    store: &dyn CounterStore,
    prefix: &str,
    identifier: &str,
) -> Result<bool, StoreError> {
    store.exists(&ban_key(prefix, identifier)).await
}

/// Remove a ban. Returns whether one existed.
pub(crate) async fn remove_ban(
    store: &dyn CounterStore,
    prefix: &str,
    identifier: &str,
) -> Result<bool, StoreError> {
    store.remove(&ban_key(prefix, identifier)).await
}

/// Read the full record behind a ban, if any.
pub(crate) async fn ban_record(
    store: &dyn CounterStore,
    prefix: &str,
    identifier: &str,
) -> Result<Option<BanRecord>, AdmissionError> {
    match store.fetch(&ban_key(prefix, identifier)).await? {
        None => Ok(None),
        Some(payload) => serde_json::from_str(&payload)
            .map(Some)
            .map_err(|e| AdmissionError::Codec { detail: e.to_string() }),
    }
}

/// Live count of banned identifiers, via key-prefix scan.
pub(crate) async fn banned_count(
    store: &dyn CounterStore,
    prefix: &str,
) -> Result<u64, StoreError> {
    store.count_prefix(&format!("{}:ban:", prefix)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn config_with_whitelists(ips: &[&str], users: &[&str]) -> PolicyConfig {
        PolicyConfig {
            ip_whitelist: ips.iter().map(|s| s.to_string()).collect(),
            user_whitelist: users.iter().map(|s| s.to_string()).collect(),
            ..PolicyConfig::default()
        }
    }

    #[test]
    fn exact_ip_whitelist_match() {
        let config = config_with_whitelists(&["10.1.2.3"], &[]);
        assert!(is_whitelisted(&config, "10.1.2.3", LimitKind::Ip));
        assert!(!is_whitelisted(&config, "10.1.2.4", LimitKind::Ip));
    }

    #[test]
    fn cidr_whitelist_contains_block_members() {
        let config = config_with_whitelists(&["192.168.1.0/24"], &[]);
        assert!(is_whitelisted(&config, "192.168.1.50", LimitKind::Ip));
        assert!(!is_whitelisted(&config, "192.168.2.1", LimitKind::Ip));
    }

    #[test]
    fn ipv6_cidr_whitelist() {
        let config = config_with_whitelists(&["2001:db8::/32"], &[]);
        assert!(is_whitelisted(&config, "2001:db8::1", LimitKind::Ip));
        assert!(!is_whitelisted(&config, "2001:db9::1", LimitKind::Ip));
    }

    #[test]
    fn malformed_entries_never_match_and_never_panic() {
        let config = config_with_whitelists(&["not-a-cidr/99", "300.1.1.1/24"], &[]);
        assert!(!is_whitelisted(&config, "192.168.1.50", LimitKind::Ip));
        // Non-IP identifier against CIDR entries is also a clean non-match.
        let config = config_with_whitelists(&["10.0.0.0/8"], &[]);
        assert!(!is_whitelisted(&config, "alice", LimitKind::Ip));
    }

    #[test]
    fn user_whitelist_is_exact_only() {
        let config = config_with_whitelists(&[], &["alice"]);
        assert!(is_whitelisted(&config, "alice", LimitKind::User));
        assert!(!is_whitelisted(&config, "alice2", LimitKind::User));
        assert!(!is_whitelisted(&config, "ali*", LimitKind::User));
    }

    #[test]
    fn global_tier_is_never_whitelisted() {
        let config = config_with_whitelists(&["10.0.0.0/8"], &["alice"]);
        assert!(!is_whitelisted(&config, "10.1.1.1", LimitKind::Global));
        assert!(!is_whitelisted(&config, "alice", LimitKind::Global));
    }

    #[tokio::test]
    async fn ban_round_trip() {
        let store = MemoryStore::new();
        write_ban(&store, "t", "1.2.3.4", Some(Duration::from_secs(600)), "abuse")
            .await
            .unwrap();

        assert!(is_banned(&store, "t", "1.2.3.4").await.unwrap());
        let retry = ban_status(&store, "t", "1.2.3.4").await.unwrap().unwrap();
        assert!(retry <= Duration::from_secs(600));
        assert!(retry > Duration::from_secs(590));

        let record = ban_record(&store, "t", "1.2.3.4").await.unwrap().unwrap();
        assert_eq!(record.identifier, "1.2.3.4");
        assert_eq!(record.reason, "abuse");
        assert!(!record.permanent);
        assert!(record.expires_at.is_some());

        assert!(remove_ban(&store, "t", "1.2.3.4").await.unwrap());
        assert!(!is_banned(&store, "t", "1.2.3.4").await.unwrap());
        assert!(!remove_ban(&store, "t", "1.2.3.4").await.unwrap());
    }

    #[tokio::test]
    async fn permanent_ban_reports_fallback_retry_after() {
        let store = MemoryStore::new();
        write_ban(&store, "t", "mallory", None, "manual").await.unwrap();

        let retry = ban_status(&store, "t", "mallory").await.unwrap().unwrap();
        assert_eq!(retry, PERMANENT_BAN_RETRY_AFTER);

        let record = ban_record(&store, "t", "mallory").await.unwrap().unwrap();
        assert!(record.permanent);
        assert_eq!(record.expires_at, None);
    }

    #[tokio::test]
    async fn banned_count_scans_prefix() {
        let store = MemoryStore::new();
        write_ban(&store, "t", "a", None, "x").await.unwrap();
        write_ban(&store, "t", "b", Some(Duration::from_secs(60)), "y").await.unwrap();
        write_ban(&store, "other", "c", None, "z").await.unwrap();
        assert_eq!(banned_count(&store, "t").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn corrupt_record_is_a_codec_error() {
        let store = MemoryStore::new();
        store.put(&ban_key("t", "weird"), "not-json".into(), None).await.unwrap();
        let err = ban_record(&store, "t", "weird").await.unwrap_err();
        assert!(matches!(err, AdmissionError::Codec { .. }));
        // Existence checks still work on the corrupt key.
        assert!(is_banned(&store, "t", "weird").await.unwrap());
    }
}
