//! Port string benchmarks.

use criterion::{black_box, criterion_main, BenchmarkId, Criterion, Throughput};
use netguard_bench::random_port_string;
use netguard_core::{coalesce, find_overlap, parse_ports};

/// Benchmark parsing port strings.
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_ports");

    for tokens in [1, 16, 256].iter() {
        group.throughput(Throughput::Elements(*tokens as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tokens), tokens, |b, &tokens| {
            let input = random_port_string(tokens);
            b.iter(|| parse_ports(black_box(&input)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark overlap detection and coalescing.
fn bench_overlap_and_coalesce(c: &mut Criterion) {
    let mut group = c.benchmark_group("overlap_coalesce");

    for tokens in [16, 256, 4096].iter() {
        let ranges = parse_ports(&random_port_string(*tokens)).unwrap();
        group.throughput(Throughput::Elements(*tokens as u64));
        group.bench_with_input(BenchmarkId::new("find_overlap", tokens), &ranges, |b, ranges| {
            b.iter(|| find_overlap(black_box(ranges)));
        });
        group.bench_with_input(BenchmarkId::new("coalesce", tokens), &ranges, |b, ranges| {
            b.iter(|| coalesce(black_box(ranges.iter().copied())));
        });
    }
    group.finish();
}

mod groups {
    use super::{bench_parse, bench_overlap_and_coalesce};
    use criterion::criterion_group;

    criterion_group!(benches, bench_parse, bench_overlap_and_coalesce);
}

criterion_main!(groups::benches);
