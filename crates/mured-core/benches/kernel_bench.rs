//! # Kernel Benchmarks
//!
//! Performance benchmarks for mured-core matching, classification and stepping.
//!
//! Run with: `cargo bench -p mured-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mured_core::{Limits, MuValue, Projection, ProjectionSet, match_pattern, normalize, run};
use std::hint::black_box;

/// `{"succ": {"succ": ... "zero"}}` nested `n` times.
fn peano_number(n: usize) -> MuValue {
    let mut value = MuValue::from("zero");
    for _ in 0..n {
        value = MuValue::map([("succ", value)]);
    }
    value
}

fn peano_set() -> ProjectionSet {
    ProjectionSet::new(vec![Projection::new(
        "succ",
        MuValue::map([("succ", MuValue::var("n"))]),
        MuValue::var("n"),
    )])
    .expect("set")
}

/// A flat list of `size` small maps.
fn wide_list(size: usize) -> MuValue {
    MuValue::list((0..size).map(|i| {
        MuValue::map([
            ("id", MuValue::Int(i as i64)),
            ("name", MuValue::string(format!("item-{i}"))),
        ])
    }))
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_peano_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("peano_run");
    let set = peano_set();

    for size in [10, 50, 90].iter() {
        let value = peano_number(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &value, |b, value| {
            b.iter(|| {
                let outcome = run(&set, value.clone(), 1_000).expect("run");
                black_box(outcome)
            });
        });
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    let limits = Limits {
        max_depth: 2_000,
        ..Limits::default()
    };

    for size in [10, 100, 1000].iter() {
        let value = wide_list(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &value, |b, value| {
            b.iter(|| black_box(normalize(value, &limits)));
        });
    }

    group.finish();
}

fn bench_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_linked");
    let limits = Limits {
        max_depth: 2_000,
        ..Limits::default()
    };

    for size in [10, 100, 1000].iter() {
        let value = wide_list(*size);
        let linked = normalize(&value, &limits).expect("normalize");
        group.bench_with_input(BenchmarkId::from_parameter(size), &linked, |b, linked| {
            b.iter(|| black_box(match_pattern(&value, linked)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_peano_run, bench_normalize, bench_match);
criterion_main!(benches);
