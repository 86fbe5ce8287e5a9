// Benchmarks for membership filter hashing
// Measures offset derivation and sizing cost

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use kvguard_filter::{bit_offsets, optimal_bit_array_size, optimal_hash_iterations};

fn bench_bit_offsets(c: &mut Criterion) {
    let mut group = c.benchmark_group("bit_offsets");
    for (expected, rate) in [(1_000u64, 0.03), (1_000_000, 0.01), (100_000_000, 0.001)] {
        let m = optimal_bit_array_size(expected, rate).unwrap();
        let k = optimal_hash_iterations(expected, m);
        group.bench_with_input(BenchmarkId::from_parameter(format!("k={}", k)), &(k, m), |b, &(k, m)| {
            b.iter(|| bit_offsets(black_box("user:1234567890"), k, m))
        });
    }
    group.finish();
}

fn bench_sizing(c: &mut Criterion) {
    c.bench_function("optimal_bit_array_size", |b| {
        b.iter(|| optimal_bit_array_size(black_box(1_000_000), black_box(0.03)))
    });
}

criterion_group!(benches, bench_bit_offsets, bench_sizing);
criterion_main!(benches);
