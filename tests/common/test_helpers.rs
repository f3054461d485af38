use std::sync::Arc;
use turnstile::{AdmissionEngine, LimitRules, ManualClock, MemoryStore, PolicyConfig};

/// Rules with only second/minute windows enforced, for deterministic tests.
pub fn rules(per_second: u32, per_minute: u32, burst: u32) -> LimitRules {
    LimitRules {
        requests_per_second: per_second,
        requests_per_minute: per_minute,
        requests_per_hour: 0,
        requests_per_day: 0,
        burst_size: burst,
    }
}

/// Engine over a memory store driven by a manual clock, so tests can step
/// windows and TTLs instead of sleeping.
pub fn manual_engine(config: PolicyConfig) -> (AdmissionEngine, ManualClock, Arc<MemoryStore>) {
    let clock = ManualClock::new();
    let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
    let engine =
        AdmissionEngine::with_config(store.clone(), config).expect("test config must validate");
    (engine, clock, store)
}
