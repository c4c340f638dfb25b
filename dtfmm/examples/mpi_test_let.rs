//! Check that the local essential trees exchanged over MPI are complete, and hold only cells of
//! the owner's tree.
#[cfg(feature = "mpi")]
fn main() {
    use dtfmm::{
        fmm::types::Stage,
        tree::helpers::{init_bodies, Distribution},
        FmmConfig, Laplace3d, TreeMpi,
    };
    use mpi::traits::*;

    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let comm = world.duplicate();
    let rank = comm.rank() as usize;
    let size = comm.size() as usize;

    let bodies = init_bodies::<f64>(5000, Distribution::Sphere, rank as u64, rank, size);
    let config = FmmConfig {
        ncrit: 32,
        ..FmmConfig::<f64>::default()
    };
    let kernel = Laplace3d::new(config.expansion_order);

    let mut fmm = TreeMpi::new(&comm, bodies, config, kernel).unwrap();
    fmm.reduce_bounds().unwrap();
    fmm.partition().unwrap();
    fmm.fmm.build_local_tree().unwrap();
    fmm.exchange_lets().unwrap();
    assert_eq!(fmm.fmm.stage, Stage::LetBuilt);

    // Every cell of every local essential tree is a copy of a cell of its owner, so gathered cell
    // counts never exceed the owner's.
    let n_cells = fmm.fmm.tree.cells.len() as u64;
    let mut owner_cells = vec![0u64; size];
    comm.all_gather_into(&n_cells, &mut owner_cells[..]);
    for (peer, tree) in fmm.fmm.lets.iter().enumerate() {
        if peer != rank {
            assert_eq!(tree.rank, peer);
            assert!(tree.cells.len() as u64 <= owner_cells[peer]);
            assert_eq!(tree.multipoles.len(), tree.cells.len() * tree.n_coefficients);
        }
    }

    if rank == 0 {
        println!("...test_let passed");
    }
}

#[cfg(not(feature = "mpi"))]
fn main() {}
