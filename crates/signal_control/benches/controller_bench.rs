//! Criterion benchmarks for the signal controllers.
//!
//! Benchmarks:
//!   - junction_step:  one adaptive + priority step at a busy junction
//!   - network_tick:   one FixedUpdate of a 4-junction network under random traffic
//!
//! Budget: a junction step well under 50 us with 100 queued vehicles.
//!
//! Run with: cargo bench -p signal_control --bench controller_bench --features bench

use bevy::math::DVec2;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use signal_control::test_harness::{named_layout, RandomTraffic, ScriptedSimulation, TestNetwork, DEFAULT_DT};
use signal_control::{Direction, JunctionControl, SignalControlConfig};

// ---------------------------------------------------------------------------
// Benchmark: single junction step
// ---------------------------------------------------------------------------

fn bench_junction_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("junction_step");
    group.sample_size(200);

    for queued in [0usize, 25, 100] {
        let mut sim = ScriptedSimulation::new().with_junction(named_layout("J1"), DVec2::ZERO);
        for d in Direction::ALL {
            sim.queue_cars("J1", d, queued / 4);
        }
        let config = SignalControlConfig::default();
        let mut junction = JunctionControl::new(named_layout("J1"), &config, true);
        junction.start(&mut sim).expect("bench junction starts");

        group.bench_with_input(BenchmarkId::from_parameter(queued), &queued, |b, _| {
            b.iter(|| {
                sim.advance(DEFAULT_DT);
                junction.step(&mut sim);
                black_box(junction.drain_events());
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: full network tick through the plugin
// ---------------------------------------------------------------------------

fn bench_network_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("network_tick");
    group.sample_size(100);

    let mut sim = ScriptedSimulation::new();
    for (i, name) in ["A", "B", "C", "D"].into_iter().enumerate() {
        sim = sim.with_junction(named_layout(name), DVec2::new(600.0 * i as f64, 0.0));
    }
    sim.autodrive = true;
    let mut net = TestNetwork::with_priority(sim);
    let mut traffic = RandomTraffic::new(1, 0.15).with_priority_share(0.01);

    // Warm up so queues and candidates are populated.
    for _ in 0..400 {
        traffic.spawn(&mut net.sim(), DEFAULT_DT);
        net.tick(1);
    }

    group.bench_function("four_junctions", |b| {
        b.iter(|| {
            traffic.spawn(&mut net.sim(), DEFAULT_DT);
            net.tick(1);
            black_box(net.summary().ticks);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_junction_step, bench_network_tick);
criterion_main!(benches);
