use std::{sync::Arc, time::Duration};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use cloudgraph::{
    EngineConfig, GraphEngine, StoreLocation,
    bench_utils::{ResourceDataset, ResourceShape, bulky_attributes, generate_resources},
};

const LAYERED_SEED: u64 = 0xA17C;
const DAG_SEED: u64 = 0xB25F;
const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);

struct BenchCase {
    id: String,
    dataset: Arc<ResourceDataset>,
}

fn bench_scales() -> &'static [usize] {
    #[cfg(feature = "bench-ci")]
    {
        &[1_000, 5_000]
    }
    #[cfg(not(feature = "bench-ci"))]
    {
        &[10_000, 50_000]
    }
}

fn bench_cases() -> Vec<BenchCase> {
    let mut cases = Vec::new();
    for &nodes in bench_scales() {
        let layered = generate_resources(
            ResourceShape::Layered {
                vpcs: (nodes / 1_000).max(1),
                subnets_per_vpc: 10,
                instances_per_subnet: 99,
            },
            LAYERED_SEED + nodes as u64,
        );
        cases.push(BenchCase {
            id: format!("layered_{nodes}"),
            dataset: Arc::new(layered),
        });
        let dag = generate_resources(
            ResourceShape::RandomDag {
                nodes,
                edges: nodes.saturating_mul(3),
            },
            DAG_SEED + nodes as u64,
        );
        cases.push(BenchCase {
            id: format!("dag_{nodes}"),
            dataset: Arc::new(dag),
        });
    }
    cases
}

fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for case in bench_cases() {
        let dataset = case.dataset.clone();
        group.bench_function(BenchmarkId::from_parameter(case.id), |b| {
            b.iter(|| {
                let engine = GraphEngine::open_in_memory().expect("engine");
                engine.add_nodes(&dataset.nodes).expect("nodes");
                engine.add_edges(&dataset.edges).expect("edges");
            });
        });
    }
    group.finish();
}

fn bench_single_insert(c: &mut Criterion) {
    let dataset = generate_resources(ResourceShape::Chain { length: 2_000 }, 0);
    let mut group = c.benchmark_group("single_insert");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    group.bench_function("chain_2000", |b| {
        b.iter(|| {
            let engine = GraphEngine::open_in_memory().expect("engine");
            for node in &dataset.nodes {
                engine.add_node(node).expect("node");
            }
            for edge in &dataset.edges {
                engine.add_edge(edge).expect("edge");
            }
        });
    });
    group.finish();
}

fn bench_compression(c: &mut Criterion) {
    let mut dataset = generate_resources(ResourceShape::Star { leaves: 500 }, 0);
    for node in &mut dataset.nodes {
        node.attributes = bulky_attributes(5 * 1024);
    }
    let mut group = c.benchmark_group("payload_codec");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for compression in [true, false] {
        let label = if compression { "zstd" } else { "plain" };
        group.bench_function(label, |b| {
            b.iter(|| {
                let config = EngineConfig {
                    compression,
                    ..EngineConfig::default()
                };
                let engine = GraphEngine::open(StoreLocation::Memory, config).expect("engine");
                engine.add_nodes(&dataset.nodes).expect("nodes");
                engine.get_all_nodes().expect("read back")
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = insert_benches;
    config = Criterion::default();
    targets = bench_batch_insert, bench_single_insert, bench_compression
);
criterion_main!(insert_benches);
