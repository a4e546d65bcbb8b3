//! Orchestrator sync benchmarks.

use criterion::{black_box, criterion_main, BenchmarkId, Criterion, Throughput};
use netguard_bench::disjoint_port_string;
use netguard_core::{Operation, Protocol, Resource, Service};
use netguard_testkit::{scenarios, TestPlane};

/// Benchmark creating a fresh mesh topology in one batch.
fn bench_create_mesh(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_mesh");
    group.sample_size(20);

    for size in [1usize, 4, 8].iter() {
        group.throughput(Throughput::Elements(scenarios::mesh("bench", *size, *size).len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let plane = TestPlane::new();
                plane.create(black_box(scenarios::mesh("bench", size, size)));
            });
        });
    }
    group.finish();
}

/// Benchmark a port change on the local side of an ingress rule, which
/// recompiles every rule of the mesh.
fn bench_port_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("port_update");

    for ports in [1usize, 32, 256].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(ports), ports, |b, &ports| {
            let plane = TestPlane::new();
            plane.create(scenarios::mesh("bench", 4, 4));
            let mut toggle = false;

            b.iter(|| {
                toggle = !toggle;
                let spec = if toggle {
                    disjoint_port_string(ports)
                } else {
                    "80".to_string()
                };
                let update: Resource = Service::new("bench", "local")
                    .with_port(Protocol::Tcp, spec)
                    .into();
                plane
                    .sync(black_box(vec![update]), Operation::Upsert)
                    .unwrap();
            });
        });
    }
    group.finish();
}

mod groups {
    use super::{bench_create_mesh, bench_port_update};
    use criterion::criterion_group;

    criterion_group!(benches, bench_create_mesh, bench_port_update);
}

criterion_main!(groups::benches);
