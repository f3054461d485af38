mod common;

use common::test_helpers::{manual_engine, rules};
use std::time::Duration;
use turnstile::{LimitKind, PolicyConfig};

#[tokio::test]
async fn banned_identifier_is_denied_until_expiry() {
    let (engine, clock, _store) = manual_engine(PolicyConfig::default());
    let id = "203.0.113.20";

    engine.ban(id, Some(Duration::from_secs(60)), "manual block").await.unwrap();
    assert!(engine.is_banned(id).await.unwrap());

    let denied = engine.allow(id, LimitKind::Ip).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Duration::from_secs(60));

    clock.advance_secs(61);
    assert!(!engine.is_banned(id).await.unwrap());
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
}

#[tokio::test]
async fn ban_retry_after_reflects_remaining_ttl() {
    let (engine, clock, _store) = manual_engine(PolicyConfig::default());
    let id = "203.0.113.21";

    engine.ban(id, Some(Duration::from_secs(600)), "abuse").await.unwrap();
    clock.advance_secs(100);

    let denied = engine.allow(id, LimitKind::Ip).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Duration::from_secs(500));
}

#[tokio::test]
async fn permanent_bans_survive_time_and_need_explicit_unban() {
    let (engine, clock, _store) = manual_engine(PolicyConfig::default());
    let id = "203.0.113.22";

    engine.ban(id, None, "fraud").await.unwrap();
    clock.advance_secs(1_000_000);
    assert!(engine.is_banned(id).await.unwrap());

    let denied = engine.allow(id, LimitKind::Ip).await.unwrap();
    assert!(!denied.allowed);
    // No TTL to report, so the fixed fallback applies.
    assert_eq!(denied.retry_after, Duration::from_secs(3_600));

    assert!(engine.unban(id).await.unwrap());
    assert!(!engine.is_banned(id).await.unwrap());
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
    // A second unban finds nothing.
    assert!(!engine.unban(id).await.unwrap());
}

#[tokio::test]
async fn ban_records_carry_reason_and_expiry() {
    let (engine, _clock, _store) = manual_engine(PolicyConfig::default());
    let id = "203.0.113.23";

    engine.ban(id, Some(Duration::from_secs(300)), "credential stuffing").await.unwrap();
    let record = engine.ban_record(id).await.unwrap().unwrap();
    assert_eq!(record.identifier, id);
    assert_eq!(record.reason, "credential stuffing");
    assert!(!record.permanent);
    assert!(record.expires_at.is_some());

    assert_eq!(engine.ban_record("never-banned").await.unwrap(), None);
}

#[tokio::test]
async fn explicit_bypass_attempts_escalate_to_a_ban() {
    let mut config = PolicyConfig::default();
    config.bypass_detection.max_failed_attempts_per_minute = 3;
    config.bypass_detection.ban_duration = Duration::from_secs(120);
    let (engine, _clock, _store) = manual_engine(config);
    let id = "203.0.113.24";

    for _ in 0..3 {
        engine.record_bypass_attempt(id, "auth failure").await.unwrap();
        assert!(!engine.is_banned(id).await.unwrap());
    }
    engine.record_bypass_attempt(id, "auth failure").await.unwrap();
    assert!(engine.is_banned(id).await.unwrap());

    let record = engine.ban_record(id).await.unwrap().unwrap();
    assert!(record.reason.contains("bypass attempt threshold"));
}

#[tokio::test]
async fn repeated_denials_auto_ban_through_the_admission_path() {
    let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mut config = PolicyConfig::default();
    config.ip_limits = rules(1, 0, 1);
    config.bypass_detection.max_failed_attempts_per_minute = 3;
    config.bypass_detection.ban_duration = Duration::from_secs(900);
    let (engine, _clock, _store) = manual_engine(config);
    let id = "203.0.113.25";

    // One allowed, then a stream of denials that crosses the threshold.
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
    for _ in 0..4 {
        assert!(!engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
    }
    assert!(engine.is_banned(id).await.unwrap());

    // Once banned, the denial comes from the ban, not the buckets.
    let denied = engine.allow(id, LimitKind::Ip).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Duration::from_secs(900));

    let snapshot = engine.metrics().await;
    assert_eq!(snapshot.banned_count, 1);
}

#[tokio::test]
async fn bypass_counter_resets_after_an_idle_minute() {
    let mut config = PolicyConfig::default();
    config.bypass_detection.max_failed_attempts_per_minute = 3;
    let (engine, clock, _store) = manual_engine(config);
    let id = "203.0.113.26";

    for _ in 0..3 {
        engine.record_bypass_attempt(id, "probe").await.unwrap();
    }
    clock.advance_secs(61);
    // The window lapsed; one more attempt does not cross the threshold.
    engine.record_bypass_attempt(id, "probe").await.unwrap();
    assert!(!engine.is_banned(id).await.unwrap());
}
