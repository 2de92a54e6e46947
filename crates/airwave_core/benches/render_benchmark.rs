//! Render graph benchmarks
//!
//! Measures one render quantum through mix -> equalizer -> analyser -> master.
//!
//! Run with: cargo bench -p airwave_core

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use airwave_core::{
    AnalyserConfig, AudioGraphManager, AutoplayPolicy, GraphConfig, OfflineBackend, SourceNode,
};

fn live_graph(sources: usize) -> (AudioGraphManager, airwave_core::OfflineRenderer, Vec<SourceNode>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let backend = Arc::new(OfflineBackend::new(AutoplayPolicy::Allowed));
    let renderer = backend.renderer();
    let graph = AudioGraphManager::new(backend, GraphConfig::default());
    runtime.block_on(graph.initialize()).expect("graph");
    graph.equalizer().apply_preset("Loudness").expect("preset");

    let nodes = (0..sources)
        .map(|_| {
            let node = graph.create_source().expect("source");
            node.handle.set_playing(true);
            node
        })
        .collect();
    (graph, renderer, nodes)
}

fn benchmark_render_quantum(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_graph");

    for frames in [128, 256, 512] {
        group.throughput(Throughput::Elements(frames as u64));

        group.bench_function(format!("one_source_{}_frames", frames), |b| {
            let (_graph, renderer, mut nodes) = live_graph(1);
            let input: Vec<f32> = (0..frames * 2).map(|i| (i as f32 * 0.01).sin()).collect();
            let mut out = vec![0.0_f32; frames * 2];

            b.iter(|| {
                nodes[0].writer.write(&input);
                renderer.render_into(black_box(&mut out));
            });
        });
    }

    group.finish();
}

fn benchmark_render_with_analyser(c: &mut Criterion) {
    c.bench_function("render_256_frames_with_analyser", |b| {
        let (graph, renderer, mut nodes) = live_graph(2);
        let _analyser = graph.create_analyser(AnalyserConfig::default()).expect("analyser");
        let input = vec![0.1_f32; 512];
        let mut out = vec![0.0_f32; 512];

        b.iter(|| {
            for node in nodes.iter_mut() {
                node.writer.write(&input);
            }
            renderer.render_into(black_box(&mut out));
        });
    });
}

criterion_group!(benches, benchmark_render_quantum, benchmark_render_with_analyser);
criterion_main!(benches);
