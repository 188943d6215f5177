//! Benchmarks for pipeline processing
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use doberman::pipeline::{Collaborators, NodeRegistry, NodeSpec, Package, PipelineBuilder};
use doberman::pipeline::{build_order, PipelineCompiler};
use doberman::scripting::ExpressionEngine;
use doberman::store::{MemoryStore, PipelineDoc};
use doberman::telemetry::MemoryTelemetry;
use doberman::Pipeline;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Source -> low-pass filter chain of `depth` filters -> telemetry sink
fn filter_chain(depth: usize, length: usize) -> PipelineDoc {
    let mut nodes = vec![json!({"name": "src", "type": "SensorSourceNode", "input_var": "T"})];
    let mut upstream = "src".to_string();
    for i in 0..depth {
        let name = format!("lpf{}", i);
        nodes.push(json!({
            "name": name,
            "type": "LowPassFilterNode",
            "upstream": [upstream],
            "input_var": "T",
            "output_var": "T",
            "length": length
        }));
        upstream = name;
    }
    nodes.push(json!({
        "name": "sink",
        "type": "InfluxSinkNode",
        "upstream": [upstream],
        "input_var": "T",
        "topic": "temperature"
    }));

    let mut doc = PipelineDoc::new("convert_bench");
    doc.pipeline = serde_json::from_value(json!(nodes)).unwrap();
    doc
}

fn build(doc: PipelineDoc) -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    store.insert_pipeline(doc.clone()).unwrap();
    let collaborators = Collaborators {
        store: store.clone(),
        telemetry: Arc::new(MemoryTelemetry::new()),
        alarms: store,
    };
    let registry = NodeRegistry::with_builtins();
    PipelineBuilder::new(&registry, collaborators)
        .build(doc)
        .unwrap()
}

fn bench_process_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_cycle");
    group.throughput(Throughput::Elements(1));

    for depth in [1, 4, 16].iter() {
        let mut pipeline = build(filter_chain(*depth, 5));
        let mut t = 0.0;
        group.bench_with_input(BenchmarkId::new("filter_chain", depth), depth, |b, _| {
            b.iter(|| {
                t += 1.0;
                pipeline.deliver("T", Package::new(t).with("T", t.sin()));
                black_box(pipeline.process_cycle_at(t))
            });
        });
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for depth in [8, 64, 256].iter() {
        let doc = filter_chain(*depth, 5);
        group.throughput(Throughput::Elements(doc.pipeline.len() as u64));

        group.bench_with_input(BenchmarkId::new("build_order", depth), &doc, |b, doc| {
            b.iter(|| {
                let specs: &[NodeSpec] = &doc.pipeline;
                black_box(build_order(specs).map(|order| order.len()))
            });
        });

        let pipeline = build(doc.clone());
        group.bench_with_input(
            BenchmarkId::new("subpipelines", depth),
            &pipeline,
            |b, pipeline| {
                b.iter(|| black_box(PipelineCompiler::compile(pipeline.nodes())));
            },
        );
    }

    group.finish();
}

fn bench_expression(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression");
    let engine = ExpressionEngine::new();
    let mut inputs = BTreeMap::new();
    inputs.insert("P_in".to_string(), 2.5);
    inputs.insert("P_out".to_string(), 1.0);
    let mut constants = BTreeMap::new();
    constants.insert("conductance".to_string(), 0.8);

    for (label, source) in [
        ("arithmetic", "(v.P_in - v.P_out) * c.conductance"),
        ("functions", "max(abs(v.P_in - v.P_out), sqrt(v.P_in)) * c.conductance"),
        ("comparison", "v.P_in > v.P_out"),
    ] {
        let expr = engine.compile(source).unwrap();
        group.bench_function(label, |b| {
            b.iter(|| black_box(engine.evaluate(&expr, &inputs, &constants).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_process_cycle, bench_compile, bench_expression);

criterion_main!(benches);
