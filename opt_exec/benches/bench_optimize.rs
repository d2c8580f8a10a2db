//! # Optimization Step Benchmark

use criterion::{criterion_group, criterion_main, Criterion};

use nalgebra::Vector2;
use opt_lib::{
    ad::Tape,
    model::{HingeModel, Params},
    track::{build_chain, Waypoint},
};

fn optimize_benchmark(c: &mut Criterion) {
    // ---- Build a circular track ----

    let params = Params {
        band_separation: 5.0,
        max_acceleration: 1.0,
        max_centrifugal_force: 5.0,
        ..Params::default()
    };

    // 360 waypoints of 2 m each, closing a full turn
    let waypoints: Vec<Waypoint> = (0..360)
        .map(|_| Waypoint {
            forward: 2.0,
            angle: std::f64::consts::PI * 2.0 / 360.0,
            left: 4.0,
            right: 4.0,
        })
        .collect();

    let mut model = HingeModel::new(params);
    build_chain(&mut model, &waypoints, Vector2::new(300.0, 300.0));

    let mut tape = Tape::new();

    // Bench one full optimization step (declare, score, backward, apply)
    c.bench_function("HingeModel::optimize", |b| {
        b.iter(|| model.optimize(&mut tape))
    });

    c.bench_function("HingeModel::compute_score", |b| {
        b.iter(|| model.compute_score(&mut tape))
    });
}

criterion_group!(benches, optimize_benchmark);
criterion_main!(benches);
