//! Run a parametrised single node FMM, verify it against direct summation and report timings
use clap::Parser;
use dtfmm::{
    fmm::{types::Equation, verify::Verify},
    traits::{kernel::Kernel, types::FmmOperatorType},
    tree::helpers::{init_bodies, init_target, sample_bodies, separate_sources, Distribution},
    BiotSavart3d, Fmm, FmmConfig, FmmError, FmmResult, Helmholtz3d, Laplace3d, SingleNodeBuilder,
};
use std::{collections::HashMap, time::Instant};
use tracing_subscriber::EnvFilter;

/// Struct for parsing command-line arguments
#[derive(Parser)]
struct Args {
    /// Number of bodies
    #[arg(long, short, default_value_t = 10000)]
    n_bodies: usize,

    /// Spatial distribution, one of cube, sphere, octant, plummer, lattice
    #[arg(long, default_value = "cube")]
    distribution: Distribution,

    /// Equation, one of laplace, biot-savart, helmholtz
    #[arg(long, default_value = "laplace")]
    equation: Equation,

    /// Wavenumber of the Helmholtz kernel
    #[arg(long, default_value_t = 1.0)]
    wavenumber: f64,

    /// Multipole acceptance parameter
    #[arg(long, default_value_t = 0.4)]
    theta: f64,

    /// Maximum number of bodies per leaf
    #[arg(long, default_value_t = 16)]
    ncrit: usize,

    /// Body count above which tree construction and traversal spawn tasks
    #[arg(long, default_value_t = 1000)]
    nspawn: usize,

    /// Number of periodic image shells
    #[arg(long, default_value_t = 0)]
    images: usize,

    /// Split both cells when both are internal
    #[arg(long, default_value_t = false)]
    dual: bool,

    /// Expansion order
    #[arg(long, short = 'P', default_value_t = 10)]
    expansion_order: usize,

    /// Number of evaluations
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Record operator times
    #[arg(long, default_value_t = false)]
    timed: bool,

    /// Evaluate the field of a separate set of sources
    #[arg(long, default_value_t = false)]
    ij: bool,

    /// Number of sampled targets for verification
    #[arg(long, default_value_t = 100)]
    n_samples: usize,

    /// Largest accepted relative error of potential and field, the run fails above it
    #[arg(long, default_value_t = 1e-3)]
    threshold: f64,
}

fn run<K: Kernel<T = f64>>(args: &Args, config: FmmConfig<f64>, kernel: K) -> FmmResult<()> {
    let mut bodies = init_bodies::<f64>(args.n_bodies, args.distribution, 0, 0, 1);
    let mut builder = SingleNodeBuilder::new();
    if args.ij {
        let mut sources = init_bodies::<f64>(args.n_bodies, args.distribution, 1, 0, 1);
        separate_sources(&mut bodies, &mut sources);
        builder = builder.sources(sources)?;
    }
    let mut fmm: Fmm<K> = builder.bodies(bodies)?.parameters(config, kernel)?.build()?;

    for iteration in 0..args.repeat {
        let start = Instant::now();
        fmm.evaluate()?;
        println!(
            "iteration {iteration}: evaluated in {} ms",
            start.elapsed().as_millis()
        );
    }

    let tree = fmm.target.stats();
    println!(
        "cells {}, leaves {}, depth {}, largest leaf {}",
        tree.n_cells, tree.n_leaves, tree.depth, tree.max_leaf_bodies
    );
    println!(
        "near pairs {}, far pairs {}, body interactions {}",
        fmm.stats.n_near, fmm.stats.n_far, fmm.stats.n_p2p_pairs
    );

    if args.timed {
        let mut times = HashMap::new();
        for time in fmm.times() {
            let name = match time.operator {
                FmmOperatorType::Build => "build",
                FmmOperatorType::P2M => "p2m",
                FmmOperatorType::M2M(_) => "m2m",
                FmmOperatorType::Traversal => "traversal",
                FmmOperatorType::L2L(_) => "l2l",
                FmmOperatorType::L2P => "l2p",
                FmmOperatorType::Let => "let",
            };
            *times.entry(name).or_insert(0) += time.time;
        }
        for name in ["build", "p2m", "m2m", "traversal", "l2l", "l2p"] {
            println!("{name:<10} {} ms", times.get(name).unwrap_or(&0));
        }
    }

    let approx = sample_bodies(fmm.bodies(), args.n_samples);
    let mut exact = approx.clone();
    init_target(&mut exact);
    let start = Instant::now();
    fmm.direct(&mut exact);
    println!("direct in {} ms", start.elapsed().as_millis());

    let (potential, field) = Verify::relative_errors(&approx, &exact);
    println!("relative error potential {potential:.6e}, field {field:.6e}");
    Verify::check(&approx, &exact, args.threshold)?;
    Ok(())
}

fn main() -> Result<(), FmmError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = FmmConfig {
        theta: args.theta,
        ncrit: args.ncrit,
        nspawn: args.nspawn,
        images: args.images,
        dual: args.dual,
        expansion_order: args.expansion_order,
        equation: args.equation,
        wavenumber: args.wavenumber,
        timed: args.timed,
        ..Default::default()
    };

    match args.equation {
        Equation::Laplace => run(&args, config, Laplace3d::new(config.expansion_order)),
        Equation::BiotSavart => run(&args, config, BiotSavart3d::new(config.expansion_order)),
        Equation::Helmholtz => run(
            &args,
            config,
            Helmholtz3d::new(config.expansion_order, config.wavenumber),
        ),
    }
}
