//! Capability matching benchmark.
//!
//! Measures compiled-pattern matching and full RBAC authorization as the
//! number of patterns per role grows, using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use evidence_bridge::tools::capability::{first_match, CapabilityPattern};
use evidence_bridge::tools::ToolAccessPolicy;

fn patterns(n: usize) -> Vec<CapabilityPattern> {
    (0..n)
        .map(|i| CapabilityPattern::parse(&format!("svc{}.resource.*", i)).unwrap())
        .collect()
}

fn bench_first_match(c: &mut Criterion) {
    let sizes: &[usize] = &[1, 8, 64, 512];

    let mut group = c.benchmark_group("first_match");
    for &size in sizes {
        let compiled = patterns(size);
        // Worst case: only the last pattern matches.
        let capability = format!("svc{}.resource.list", size - 1);
        group.bench_with_input(BenchmarkId::from_parameter(size), &compiled, |b, p| {
            b.iter(|| first_match(black_box(p), black_box(&capability)));
        });
    }
    group.finish();
}

fn bench_authorize(c: &mut Criterion) {
    let sizes: &[usize] = &[1, 8, 64, 512];

    let mut group = c.benchmark_group("authorize");
    for &size in sizes {
        let mut policy = ToolAccessPolicy::new("aws");
        policy.grant_many("auditor", &patterns(size));
        let allowed = format!("svc{}.resource.list", size - 1);

        group.bench_with_input(BenchmarkId::new("allowed", size), &policy, |b, p| {
            b.iter(|| p.authorize(black_box("auditor"), black_box(&allowed)));
        });
        group.bench_with_input(BenchmarkId::new("denied", size), &policy, |b, p| {
            b.iter(|| p.authorize(black_box("auditor"), black_box("other.resource.list")));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_first_match, bench_authorize);
criterion_main!(benches);
