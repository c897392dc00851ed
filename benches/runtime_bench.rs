//! 运行时性能基准测试
//!
//! 使用 Criterion 框架，覆盖：
//! - 事件发布（不同订阅者数量）
//! - 能力约束解析
//! - 加载顺序规划

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use forge_core::bus::{handler, EventBus};
use forge_core::module::{ActiveSet, CapabilityRegistry, LoadPlanner, Manifest};
use semver::Version;
use serde_json::json;

// ============================================================================
// 事件发布基准测试
// ============================================================================

fn event_emit_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("event_emit");

    for subscribers in [0usize, 1, 10, 100] {
        let bus = EventBus::new();
        rt.block_on(async {
            for i in 0..subscribers {
                bus.subscribe(format!("mod_{}", i), "bench.topic", handler(|_| Ok(())))
                    .await;
            }
        });

        group.throughput(Throughput::Elements(subscribers.max(1) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.to_async(&rt).iter(|| async {
                    black_box(bus.emit("bench.topic", json!({ "n": 1 })).await)
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// 能力解析基准测试
// ============================================================================

fn capability_resolve_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = CapabilityRegistry::new();
    rt.block_on(async {
        for major in 0..5u64 {
            for minor in 0..20u64 {
                registry
                    .register(
                        &format!("provider_{}_{}", major, minor),
                        "bench.service",
                        Version::new(major, minor, 0),
                    )
                    .await;
            }
        }
    });

    c.bench_function("capability_resolve_range", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                registry
                    .resolve_str("bench.service>=2.5.0,<4.0.0")
                    .await
                    .unwrap(),
            )
        });
    });

    c.bench_function("capability_resolve_caret", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(registry.resolve_str("bench.service@^3.1").await.unwrap()) });
    });
}

// ============================================================================
// 加载规划基准测试
// ============================================================================

/// 构造一条依赖链加若干独立模块
fn manifests(count: usize) -> Vec<Manifest> {
    (0..count)
        .map(|i| {
            let manifest = Manifest::new(format!("m{:04}", i), Version::new(1, 0, 0));
            if i % 3 == 0 || i == 0 {
                manifest
            } else {
                manifest.depends_on(format!("m{:04}", i - 1))
            }
        })
        .collect()
}

fn load_plan_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_plan");
    for count in [10usize, 100, 500] {
        let candidates = manifests(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &candidates, |b, candidates| {
            b.iter(|| black_box(LoadPlanner::plan(candidates, &ActiveSet::default())))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    event_emit_benchmark,
    capability_resolve_benchmark,
    load_plan_benchmark
);
criterion_main!(benches);
