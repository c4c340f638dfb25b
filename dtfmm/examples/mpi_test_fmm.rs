//! Evaluate a distributed FMM over MPI and check potentials and fields against direct summation
//! over all bodies, gathered to every rank and rotated around the ring of ranks.
#[cfg(feature = "mpi")]
fn main() {
    use dtfmm::{
        fmm::{types::Traversal, verify::Verify},
        traits::fmm::Evaluate,
        tree::helpers::{init_bodies, init_target, sample_bodies, Distribution},
        Body, FmmConfig, Laplace3d, TreeMpi,
    };
    use mpi::{collective::SystemOperation, datatype::PartitionMut, traits::*};

    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let comm = world.duplicate();
    let rank = comm.rank() as usize;
    let size = comm.size() as usize;

    let bodies = init_bodies::<f64>(2000, Distribution::Cube, rank as u64, rank, size);
    let config = FmmConfig::<f64>::default();
    let kernel = Laplace3d::new(config.expansion_order);

    // Every rank keeps a copy of all bodies for the reference solution.
    let local = bodies.len() as i32;
    let mut counts = vec![0i32; size];
    comm.all_gather_into(&local, &mut counts[..]);
    let displs = counts
        .iter()
        .scan(0, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect::<Vec<_>>();
    let mut all = vec![Body::<f64>::default(); counts.iter().sum::<i32>() as usize];
    let mut partition = PartitionMut::new(&mut all[..], &counts[..], &displs[..]);
    comm.all_gather_varcount_into(&bodies[..], &mut partition);

    let mut fmm = TreeMpi::new(&comm, bodies, config, kernel).unwrap();
    fmm.evaluate().unwrap();

    let approx = sample_bodies(fmm.bodies(), 100);
    let mut exact = approx.clone();
    init_target(&mut exact);
    Traversal::from_config(&config).direct(&mut exact, &all, &kernel);

    let (potential, field) = Verify::check(&approx, &exact, 1e-3).unwrap();
    println!("rank {rank}: potential error {potential:.3e}, field error {field:.3e}");

    // Ring rotated direct summation agrees with the gathered reference.
    let (ring_potential, ring_field) = fmm.verify(100, 1e-3).unwrap();
    let mut sums = [0f64; 4];
    let local_sums = [
        Verify::potential_difference(&approx, &exact),
        Verify::potential_norm(&exact),
        Verify::field_difference(&approx, &exact),
        Verify::field_norm(&exact),
    ];
    comm.all_reduce_into(&local_sums[..], &mut sums[..], SystemOperation::sum());
    let (global_potential, global_field) = Verify::relative_from_sums(sums);
    assert!((ring_potential - global_potential).abs() <= 1e-10 * global_potential.max(1e-300));
    assert!((ring_field - global_field).abs() <= 1e-10 * global_field.max(1e-300));

    if rank == 0 {
        println!("...test_fmm passed");
    }
}

#[cfg(not(feature = "mpi"))]
fn main() {}
