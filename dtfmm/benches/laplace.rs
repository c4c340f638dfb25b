use std::time::Duration;

use criterion::{
    criterion_group, criterion_main,
    measurement::{Measurement, WallTime},
    Criterion,
};

use dtfmm::{
    fmm::{multi_node::simulate_ranks, types::UpDownPass},
    traits::general::Scalar,
    tree::helpers::{init_bodies, Distribution},
    FmmConfig, Laplace3d, SingleNodeBuilder,
};

fn benchmark_single_node<T: Scalar, M: Measurement>(
    group: &mut criterion::BenchmarkGroup<'_, M>,
    n_bodies: usize,
    theta: f64,
    dual: bool,
) {
    let bodies = init_bodies::<T>(n_bodies, Distribution::Cube, 0, 0, 1);
    let config = FmmConfig {
        theta: T::of(theta),
        dual,
        ..Default::default()
    };

    let mut fmm = SingleNodeBuilder::new()
        .bodies(bodies)
        .unwrap()
        .parameters(config, Laplace3d::<T>::new(config.expansion_order))
        .unwrap()
        .build()
        .unwrap();

    group.bench_function(
        format!("evaluate n_bodies={n_bodies} theta={theta} dual={dual}"),
        |b| b.iter(|| fmm.evaluate().unwrap()),
    );

    let kernel = fmm.kernel;
    group.bench_function(format!("upward n_bodies={n_bodies}"), |b| {
        b.iter(|| UpDownPass::new(&kernel, false).upward_pass(&mut fmm.target))
    });
}

fn benchmark_simulated_ranks<M: Measurement>(
    group: &mut criterion::BenchmarkGroup<'_, M>,
    n_bodies: usize,
    n_ranks: usize,
) {
    let bodies = init_bodies::<f64>(n_bodies, Distribution::Plummer, 0, 0, 1);
    let config = FmmConfig::<f64>::default();
    let kernel = Laplace3d::new(config.expansion_order);

    group.bench_function(
        format!("simulate n_bodies={n_bodies} n_ranks={n_ranks}"),
        |b| b.iter(|| simulate_ranks(bodies.clone(), n_ranks, config, kernel).unwrap()),
    );
}

fn laplace_potentials(c: &mut Criterion) {
    let mut group = c.benchmark_group("Laplace");

    group
        .sample_size(10)
        .measurement_time(Duration::from_secs(10));

    for n_bodies in [10_000, 100_000] {
        benchmark_single_node::<f64, WallTime>(&mut group, n_bodies, 0.4, false);
        benchmark_single_node::<f64, WallTime>(&mut group, n_bodies, 0.4, true);
    }
    benchmark_single_node::<f32, WallTime>(&mut group, 100_000, 0.5, false);

    for n_ranks in [2, 4] {
        benchmark_simulated_ranks::<WallTime>(&mut group, 20_000, n_ranks);
    }
}

criterion_group!(benches, laplace_potentials);
criterion_main!(benches);
