use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use swarm_edge_core::aggregation::clip_and_trim;
use swarm_edge_core::consensus::{ConsensusRound, NodeReport, RoundId};
use swarm_edge_core::traits::{MetricId, NodeId};

fn node(i: usize) -> NodeId {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&(i as u64).to_le_bytes());
    NodeId::new(bytes)
}

fn values(n: usize) -> Vec<f64> {
    // honest nodes near 100, every tenth node reports garbage
    (0..n)
        .map(|i| if i % 10 == 9 { 1.0e6 } else { 100.0 + (i % 7) as f64 * 0.3 })
        .collect()
}

fn bench_clip_and_trim(c: &mut Criterion) {
    let mut group = c.benchmark_group("clip_and_trim");
    for n in [4usize, 16, 64, 256] {
        let v = values(n);
        let f = (n - 1) / 3;
        group.bench_with_input(BenchmarkId::from_parameter(n), &v, |b, v| {
            b.iter(|| clip_and_trim(black_box(v), 10.0, f))
        });
    }
    group.finish();
}

fn bench_full_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus_round");
    for n in [4usize, 16, 64] {
        let f = (n - 1) / 3;
        let v = values(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &v, |b, v| {
            b.iter(|| {
                let mut round =
                    ConsensusRound::new(RoundId(1), MetricId(0), (0..n).map(node), f).unwrap();
                round.start_collecting().unwrap();
                for (i, value) in v.iter().enumerate() {
                    round
                        .submit(&NodeReport::new(RoundId(1), node(i), *value))
                        .unwrap();
                }
                round.aggregate(10.0).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_clip_and_trim, bench_full_round);
criterion_main!(benches);
