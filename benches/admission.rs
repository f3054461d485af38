use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use turnstile::{AdmissionEngine, LimitKind, LimitRules, MemoryStore, PolicyConfig};

fn roomy_config() -> PolicyConfig {
    // Large ceilings keep the benchmark on the allow path instead of
    // measuring denial short-circuits.
    let mut config = PolicyConfig::default();
    config.ip_limits = LimitRules {
        requests_per_second: 0,
        requests_per_minute: 0,
        requests_per_hour: 0,
        requests_per_day: u32::MAX,
        burst_size: 0,
    };
    config.bypass_detection.enabled = false;
    config
}

fn bench_allow(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let engine =
        AdmissionEngine::with_config(Arc::new(MemoryStore::new()), roomy_config()).unwrap();
    c.bench_function("allow_ip_bucket_path", |b| {
        b.to_async(&rt).iter(|| {
            let engine = engine.clone();
            async move {
                black_box(engine.allow("10.0.0.1", LimitKind::Ip).await.unwrap());
            }
        })
    });

    let mut config = roomy_config();
    config.ip_whitelist = vec!["10.0.0.0/8".to_string()];
    let engine = AdmissionEngine::with_config(Arc::new(MemoryStore::new()), config).unwrap();
    c.bench_function("allow_ip_whitelist_short_circuit", |b| {
        b.to_async(&rt).iter(|| {
            let engine = engine.clone();
            async move {
                black_box(engine.allow("10.0.0.1", LimitKind::Ip).await.unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_allow);
criterion_main!(benches);
