//! Benchmark of the coordinator's lockstep hot loop.

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use xedgesim_common::SimTime;
use xedgesim_core::{Coordinator, CoordinatorConfig, InProcessNodeAdapter, ScriptedNode};
use xedgesim_net::{DirectModel, LatencyModel, LinkConfig, NetworkModel};

const DURATION_US: u64 = 1_000_000;
const QUANTUM_US: u64 = 1_000;
const SOURCES: usize = 4;

fn run_once(model: Box<dyn NetworkModel>) {
    let config = CoordinatorConfig::new(SimTime::from_micros(DURATION_US), 42)
        .with_quantum(SimTime::from_micros(QUANTUM_US));
    let mut coordinator = Coordinator::new(config, model);

    for s in 0..SOURCES {
        let mut node = ScriptedNode::new(format!("source{s}"));
        for step in 0..(DURATION_US / QUANTUM_US) {
            node = node.emit_at(
                SimTime::from_micros(step * QUANTUM_US),
                "sample",
                "sink",
                json!({ "s": s, "step": step }),
            );
        }
        coordinator.add_node(Box::new(InProcessNodeAdapter::new(Box::new(node))));
    }
    coordinator.add_node(Box::new(InProcessNodeAdapter::new(Box::new(
        ScriptedNode::new("sink"),
    ))));

    let summary = coordinator.run().expect("benchmark run failed");
    assert_eq!(summary.steps, DURATION_US / QUANTUM_US);
}

fn bench_lockstep(c: &mut Criterion) {
    c.bench_function("lockstep_direct_4_sources_1000_steps", |b| {
        b.iter(|| run_once(Box::new(DirectModel::new())));
    });

    c.bench_function("lockstep_latency_4_sources_1000_steps", |b| {
        b.iter(|| {
            run_once(Box::new(LatencyModel::new(
                42,
                LinkConfig {
                    latency: SimTime::from_micros(5_000),
                    loss_rate: 0.01,
                },
            )))
        });
    });
}

criterion_group!(benches, bench_lockstep);
criterion_main!(benches);
