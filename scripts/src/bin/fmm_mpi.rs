//! Run a parametrised distributed FMM over MPI, report per rank statistics and timings, and verify
//! sampled targets against a distributed direct summation
use clap::Parser;
use dtfmm::{
    fmm::types::Equation,
    traits::{fmm::Evaluate, kernel::Kernel, types::FmmOperatorType},
    tree::helpers::{init_bodies, Distribution},
    BiotSavart3d, FmmConfig, FmmError, FmmResult, Helmholtz3d, Laplace3d, TreeMpi,
};
use mpi::{topology::SimpleCommunicator, traits::Communicator};
use std::{collections::HashMap, time::Instant};
use tracing_subscriber::EnvFilter;

/// Struct for parsing command-line arguments
#[derive(Parser)]
struct Args {
    /// Number of bodies per MPI process
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

    /// Number of periodic image shells
    #[arg(long, default_value_t = 0)]
    images: usize,

    /// Split both cells when both are internal
    #[arg(long, default_value_t = false)]
    dual: bool,

    /// Expansion order
    #[arg(long, short = 'P', default_value_t = 10)]
    expansion_order: usize,

    /// Number of sampled targets per rank for verification, zero skips it
    #[arg(long, default_value_t = 100)]
    n_samples: usize,

    /// Largest accepted relative error of potential and field, the run fails above it
    #[arg(long, default_value_t = 1e-3)]
    threshold: f64,
}

fn run<K: Kernel<T = f64>>(
    comm: &SimpleCommunicator,
    args: &Args,
    config: FmmConfig<f64>,
    kernel: K,
) -> FmmResult<()> {
    let rank = comm.rank() as usize;
    let size = comm.size() as usize;
    let bodies = init_bodies::<f64>(args.n_bodies, args.distribution, rank as u64, rank, size);

    let mut fmm = TreeMpi::new(comm, bodies, config, kernel)?;
    let start = Instant::now();
    fmm.evaluate()?;
    let runtime = start.elapsed().as_millis();

    let mut times = HashMap::new();
    for time in fmm.times() {
        let name = match time.operator {
            FmmOperatorType::Build => "build",
            FmmOperatorType::P2M | FmmOperatorType::M2M(_) => "upward",
            FmmOperatorType::Let => "let",
            FmmOperatorType::Traversal => "traversal",
            FmmOperatorType::L2L(_) | FmmOperatorType::L2P => "downward",
        };
        *times.entry(name).or_insert(0) += time.time;
    }

    let stats = fmm.fmm.stats;
    let remote_cells = fmm.fmm.lets.iter().map(|l| l.cells.len()).sum::<usize>()
        - fmm.fmm.lets.get(rank).map_or(0, |l| l.cells.len());
    println!(
        "rank {rank},{runtime},{},{},{},{},{},{},{},{},{}",
        fmm.bodies().len(),
        remote_cells,
        stats.n_near,
        stats.n_far,
        times.get("build").unwrap_or(&0),
        times.get("upward").unwrap_or(&0),
        times.get("let").unwrap_or(&0),
        times.get("traversal").unwrap_or(&0),
        times.get("downward").unwrap_or(&0),
    );

    if args.n_samples > 0 {
        let start = Instant::now();
        let result = fmm.verify(args.n_samples, args.threshold);
        if rank == 0 {
            match &result {
                Ok((potential, field)) => println!(
                    "relative error potential {potential:.6e}, field {field:.6e}, direct in {} ms",
                    start.elapsed().as_millis()
                ),
                Err(e) => println!("verification failed: {e}"),
            }
        }
        result?;
    }
    Ok(())
}

fn main() -> Result<(), FmmError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let universe = mpi::initialize()
        .ok_or_else(|| FmmError::Communication("MPI already initialised".to_string()))?;
    let comm = universe.world();

    let config = FmmConfig {
        theta: args.theta,
        ncrit: args.ncrit,
        images: args.images,
        dual: args.dual,
        expansion_order: args.expansion_order,
        equation: args.equation,
        wavenumber: args.wavenumber,
        timed: true,
        ..Default::default()
    };

    match args.equation {
        Equation::Laplace => run(&comm, &args, config, Laplace3d::new(config.expansion_order)),
        Equation::BiotSavart => run(
            &comm,
            &args,
            config,
            BiotSavart3d::new(config.expansion_order),
        ),
        Equation::Helmholtz => run(
            &comm,
            &args,
            config,
            Helmholtz3d::new(config.expansion_order, config.wavenumber),
        ),
    }
}
