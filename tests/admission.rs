mod common;

use common::test_helpers::{manual_engine, rules};
use std::time::Duration;
use turnstile::{CounterStore, LimitKind, LimitRules, PolicyConfig};

#[tokio::test]
async fn burst_is_honored_then_exhausted() {
    let mut config = PolicyConfig::default();
    config.ip_limits = rules(3, 0, 5);
    let (engine, _clock, _store) = manual_engine(config);

    for i in 0..5 {
        let result = engine.allow("198.51.100.1", LimitKind::Ip).await.unwrap();
        assert!(result.allowed, "call {} within burst should pass", i + 1);
    }
    let denied = engine.allow("198.51.100.1", LimitKind::Ip).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.limit, 3);
    assert_eq!(denied.remaining, 0);
    assert!(denied.retry_after > Duration::ZERO);
}

#[tokio::test]
async fn default_config_allows_twenty_then_denies() {
    let (engine, _clock, _store) = manual_engine(PolicyConfig::default());

    for _ in 0..20 {
        assert!(engine.allow("198.51.100.2", LimitKind::Ip).await.unwrap().allowed);
    }
    let denied = engine.allow("198.51.100.2", LimitKind::Ip).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.limit, 10);
    assert_eq!(denied.remaining, 0);
}

#[tokio::test]
async fn whitelisted_identifiers_are_never_limited() {
    let mut config = PolicyConfig::default();
    config.ip_limits = rules(1, 1, 1);
    config.ip_whitelist = vec!["192.168.1.0/24".to_string(), "203.0.113.9".to_string()];
    let (engine, _clock, _store) = manual_engine(config);

    for _ in 0..200 {
        assert!(engine.allow("192.168.1.50", LimitKind::Ip).await.unwrap().allowed);
        assert!(engine.allow("203.0.113.9", LimitKind::Ip).await.unwrap().allowed);
    }
    assert!(engine.is_whitelisted("192.168.1.50", LimitKind::Ip));
    assert!(!engine.is_whitelisted("192.168.2.1", LimitKind::Ip));
}

#[tokio::test]
async fn second_window_refills_while_minute_budget_drains() {
    let mut config = PolicyConfig::default();
    config.ip_limits = rules(2, 5, 2);
    let (engine, clock, store) = manual_engine(config);
    let id = "198.51.100.3";

    // Two pass, third is stopped by the second window.
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
    let denied = engine.allow(id, LimitKind::Ip).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.limit, 2);

    // The second-window denial must not have consumed minute tokens.
    let minute_left =
        store.get_i64(&format!("turnstile:ip:{}:minute", id)).await.unwrap().unwrap();
    assert_eq!(minute_left, 3);

    clock.advance_secs(1);
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);

    clock.advance_secs(1);
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
    // Minute budget (5) is gone even though the second window has room.
    let denied = engine.allow(id, LimitKind::Ip).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.limit, 5);
    assert!(denied.retry_after > Duration::from_secs(50));
}

#[tokio::test]
async fn tiers_are_limited_independently() {
    let mut config = PolicyConfig::default();
    config.ip_limits = rules(1, 0, 1);
    config.user_limits = rules(3, 0, 3);
    let (engine, _clock, _store) = manual_engine(config);

    assert!(engine.allow("alice", LimitKind::User).await.unwrap().allowed);
    assert!(engine.allow("10.0.0.1", LimitKind::Ip).await.unwrap().allowed);
    // The IP tier is exhausted; the user tier still has room.
    assert!(!engine.allow("10.0.0.1", LimitKind::Ip).await.unwrap().allowed);
    assert!(engine.allow("alice", LimitKind::User).await.unwrap().allowed);
}

#[tokio::test]
async fn config_hot_swap_applies_to_the_next_request() {
    let mut config = PolicyConfig::default();
    config.ip_limits = rules(100, 0, 100);
    let (engine, clock, _store) = manual_engine(config.clone());
    let id = "198.51.100.4";

    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);

    // Tighten the ceiling; once the old bucket expires the new capacity
    // applies to the next fill.
    config.ip_limits = rules(1, 0, 1);
    engine.update_config(config.clone()).unwrap();
    clock.advance_secs(1);
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
    assert!(!engine.allow(id, LimitKind::Ip).await.unwrap().allowed);

    // Disable limiting entirely.
    config.enabled = false;
    engine.update_config(config).unwrap();
    assert!(engine.allow(id, LimitKind::Ip).await.unwrap().allowed);
}

#[tokio::test]
async fn metrics_track_outcomes() {
    let mut config = PolicyConfig::default();
    config.ip_limits = rules(2, 0, 2);
    let (engine, _clock, _store) = manual_engine(config);
    let id = "198.51.100.5";

    for _ in 0..2 {
        engine.allow(id, LimitKind::Ip).await.unwrap();
    }
    for _ in 0..3 {
        engine.allow(id, LimitKind::Ip).await.unwrap();
    }

    let snapshot = engine.metrics().await;
    assert_eq!(snapshot.total_requests, 5);
    assert_eq!(snapshot.allowed_requests, 2);
    assert_eq!(snapshot.blocked_requests, 3);
    assert_eq!(snapshot.ip.blocked, 3);
    assert_eq!(snapshot.bypass_attempts, 3);
    assert_eq!(snapshot.top_blocked_ips, vec![(id.to_string(), 3)]);
    assert!(snapshot.block_rate() > 59.0);
}

#[tokio::test]
async fn concurrent_requests_share_one_budget() {
    let mut config = PolicyConfig::default();
    config.ip_limits = rules(10, 0, 10);
    config.bypass_detection.enabled = false;
    let (engine, _clock, _store) = manual_engine(config);

    let mut handles = Vec::new();
    for _ in 0..30 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.allow("198.51.100.6", LimitKind::Ip).await.unwrap().allowed
        }));
    }
    let results = futures::future::join_all(handles).await;
    let allowed = results.into_iter().filter(|r| matches!(r, Ok(true))).count();
    assert_eq!(allowed, 10);
}

#[tokio::test]
async fn unlimited_rules_skip_all_windows() {
    let mut config = PolicyConfig::default();
    config.user_limits = LimitRules::unlimited();
    let (engine, _clock, store) = manual_engine(config);

    for _ in 0..100 {
        let result = engine.allow("bob", LimitKind::User).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.limit, 0);
    }
    // No bucket keys were created for the unlimited tier.
    assert!(store.get_i64("turnstile:user:bob:second").await.unwrap().is_none());
}
