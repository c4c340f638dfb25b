//! Check that sample sort partitioning leaves every rank with a contiguous, ordered range of Morton
//! keys and loses no bodies.
#[cfg(feature = "mpi")]
fn main() {
    use dtfmm::{
        fmm::multi_node::morton_keys,
        tree::helpers::{init_bodies, Distribution},
        FmmConfig, Laplace3d, TreeMpi,
    };
    use mpi::{collective::SystemOperation, traits::*};

    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let comm = world.duplicate();
    let rank = comm.rank() as usize;
    let size = comm.size() as usize;

    let n_bodies = 5000;
    let bodies = init_bodies::<f64>(n_bodies, Distribution::Plummer, rank as u64, rank, size);
    let config = FmmConfig::<f64>::default();
    let kernel = Laplace3d::new(config.expansion_order);

    let mut fmm = TreeMpi::new(&comm, bodies, config, kernel).unwrap();
    fmm.reduce_bounds().unwrap();
    fmm.partition().unwrap();

    let keys = morton_keys(&fmm.fmm.bodies, &fmm.fmm.bounds);
    let min = keys.iter().copied().min().unwrap_or(u64::MAX);
    let max = keys.iter().copied().max().unwrap_or(0);

    let mut mins = vec![0u64; size];
    let mut maxs = vec![0u64; size];
    comm.all_gather_into(&min, &mut mins[..]);
    comm.all_gather_into(&max, &mut maxs[..]);

    // Key ranges of non empty ranks do not overlap and follow rank order.
    let ranges = mins
        .iter()
        .zip(maxs.iter())
        .filter(|(min, max)| min <= max)
        .collect::<Vec<_>>();
    for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0);
    }

    let local = fmm.fmm.bodies.len() as u64;
    let mut total = 0u64;
    comm.all_reduce_into(&local, &mut total, SystemOperation::sum());
    assert_eq!(total as usize, n_bodies * size);

    if rank == 0 {
        println!("...test_partition passed");
    }
}

#[cfg(not(feature = "mpi"))]
fn main() {}
