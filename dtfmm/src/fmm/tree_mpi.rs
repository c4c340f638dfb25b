//! MPI transport of distributed evaluation
use std::{mem::offset_of, time::Instant};

use mpi::{
    collective::SystemOperation,
    datatype::{
        Partition, PartitionMut, UncommittedDatatypeRef, UncommittedUserDatatype, UserDatatype,
    },
    traits::{CommunicatorCollectives, Equivalence},
};
use num_complex::Complex;
use tracing::{debug, info_span};

use crate::{
    fmm::{
        multi_node::{global_bounds, select_splitters},
        types::{LetResponse, RankFmm},
        verify::Verify,
    },
    traits::{
        fmm::Evaluate,
        general::Scalar,
        kernel::Kernel,
        types::{FmmError, FmmOperatorTime, FmmOperatorType, FmmResult},
    },
    tree::{
        constants::MAX_LEVEL,
        helpers::{init_target, sample_bodies},
        types::{Body, Bounds, Cell},
    },
    FmmConfig,
};

unsafe impl<T: Scalar + Equivalence> Equivalence for Body<T> {
    type Out = UserDatatype;

    // Depending on the MPI implementation offsets are i64 or isize.
    #[allow(clippy::useless_conversion)]
    fn equivalent_datatype() -> Self::Out {
        UserDatatype::structured::<UncommittedDatatypeRef>(
            &[1, 1, 1, 1, 1, 1],
            &[
                (offset_of!(Body<T>, position) as i64).try_into().unwrap(),
                (offset_of!(Body<T>, source) as i64).try_into().unwrap(),
                (offset_of!(Body<T>, potential) as i64).try_into().unwrap(),
                (offset_of!(Body<T>, field) as i64).try_into().unwrap(),
                (offset_of!(Body<T>, index) as i64).try_into().unwrap(),
                (offset_of!(Body<T>, weight) as i64).try_into().unwrap(),
            ],
            &[
                UncommittedUserDatatype::contiguous(3, &T::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(3, &T::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &T::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(3, &T::equivalent_datatype()).as_ref(),
                usize::equivalent_datatype().into(),
                UncommittedUserDatatype::contiguous(1, &T::equivalent_datatype()).as_ref(),
            ],
        )
    }
}

unsafe impl<T: Scalar + Equivalence> Equivalence for Cell<T> {
    type Out = UserDatatype;

    #[allow(clippy::useless_conversion)]
    fn equivalent_datatype() -> Self::Out {
        UserDatatype::structured::<UncommittedDatatypeRef>(
            &[1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1],
            &[
                (offset_of!(Cell<T>, center) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, radius) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, level) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, parent) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, child_begin) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, n_children) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, body_begin) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, n_bodies) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, weight) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, n_near) as i64).try_into().unwrap(),
                (offset_of!(Cell<T>, n_far) as i64).try_into().unwrap(),
            ],
            &[
                UncommittedUserDatatype::contiguous(3, &T::equivalent_datatype()).as_ref(),
                UncommittedUserDatatype::contiguous(1, &T::equivalent_datatype()).as_ref(),
                u64::equivalent_datatype().into(),
                usize::equivalent_datatype().into(),
                usize::equivalent_datatype().into(),
                usize::equivalent_datatype().into(),
                usize::equivalent_datatype().into(),
                usize::equivalent_datatype().into(),
                UncommittedUserDatatype::contiguous(1, &T::equivalent_datatype()).as_ref(),
                usize::equivalent_datatype().into(),
                usize::equivalent_datatype().into(),
            ],
        )
    }
}

/// Displacements from counts.
fn displacements(counts: &[i32]) -> Vec<i32> {
    counts
        .iter()
        .scan(0, |acc, &x| {
            let tmp = *acc;
            *acc += x;
            Some(tmp)
        })
        .collect()
}

fn to_counts(counts: &[usize]) -> FmmResult<Vec<i32>> {
    counts
        .iter()
        .map(|&c| {
            i32::try_from(c).map_err(|_| {
                FmmError::Communication(format!("message of {c} items exceeds MPI counts"))
            })
        })
        .collect()
}

/// Gather arrays of every rank on every rank.
fn gather_to_all<T, C>(arr: &[T], comm: &C) -> FmmResult<Vec<T>>
where
    T: Equivalence + Default + Clone,
    C: CommunicatorCollectives,
{
    let size = comm.size() as usize;
    let local_len = to_counts(&[arr.len()])?[0];
    let mut sizes = vec![0i32; size];
    comm.all_gather_into(&local_len, &mut sizes[..]);

    let recv_len = sizes.iter().map(|&s| s as usize).sum();
    let mut buffer = vec![T::default(); recv_len];
    let displs = displacements(&sizes);
    let mut partition = PartitionMut::new(&mut buffer[..], &sizes[..], &displs[..]);
    comm.all_gather_varcount_into(arr, &mut partition);
    Ok(buffer)
}

/// Send a block of an array to every rank, returning the received blocks and their counts.
fn redistribute<T, C>(arr: &[T], counts: &[usize], comm: &C) -> FmmResult<(Vec<T>, Vec<usize>)>
where
    T: Equivalence + Default + Clone,
    C: CommunicatorCollectives,
{
    let counts = to_counts(counts)?;
    let mut recv_counts = vec![0i32; counts.len()];
    comm.all_to_all_into(&counts[..], &mut recv_counts[..]);

    let n = recv_counts.iter().map(|&c| c as usize).sum();
    let mut output = vec![T::default(); n];
    let send = Partition::new(arr, &counts[..], displacements(&counts));
    let mut recv = PartitionMut::new(&mut output[..], &recv_counts[..], displacements(&recv_counts));
    comm.all_to_all_varcount_into(&send, &mut recv);

    Ok((output, recv_counts.iter().map(|&c| c as usize).collect()))
}

/// Split a flat array into blocks of given sizes.
fn split_blocks<T: Clone>(flat: &[T], counts: &[usize]) -> Vec<Vec<T>> {
    let mut offset = 0;
    counts
        .iter()
        .map(|&c| {
            let block = flat[offset..offset + c].to_vec();
            offset += c;
            block
        })
        .collect()
}

fn flatten<T: Scalar>(coefficients: &[Complex<T>]) -> Vec<T> {
    coefficients.iter().flat_map(|c| [c.re, c.im]).collect()
}

fn unflatten<T: Scalar>(flat: &[T]) -> Vec<Complex<T>> {
    flat.chunks_exact(2).map(|c| Complex::new(c[0], c[1])).collect()
}

/// One rank of a distributed evaluation, communicating over MPI.
pub struct TreeMpi<'a, K: Kernel, C: CommunicatorCollectives> {
    /// Communicator
    pub comm: &'a C,

    /// State of this rank.
    pub fmm: RankFmm<K>,
}

impl<'a, K, C> TreeMpi<'a, K, C>
where
    K: Kernel,
    K::T: Equivalence,
    C: CommunicatorCollectives,
{
    /// Constructor
    ///
    /// # Arguments
    /// * `comm` - Communicator over which bodies are distributed.
    /// * `bodies` - Bodies initially held by this rank.
    /// * `config` - Run time parameters, identical on every rank.
    /// * `kernel` - Kernel, whose expansion order must match the parameters.
    pub fn new(
        comm: &'a C,
        bodies: Vec<Body<K::T>>,
        config: FmmConfig<K::T>,
        kernel: K,
    ) -> FmmResult<Self> {
        let fmm = RankFmm::new(
            comm.rank() as usize,
            comm.size() as usize,
            bodies,
            config,
            kernel,
        )?;
        Ok(Self { comm, fmm })
    }

    /// Reduce bounds over all ranks.
    pub fn reduce_bounds(&mut self) -> FmmResult<()> {
        let local = self.fmm.local_bounds()?;
        let mut bounds = Bounds::empty();
        self.comm
            .all_reduce_into(&local.min[..], &mut bounds.min[..], SystemOperation::min());
        self.comm
            .all_reduce_into(&local.max[..], &mut bounds.max[..], SystemOperation::max());
        self.fmm.set_global_bounds(global_bounds(&[bounds]))
    }

    /// Partition bodies along the Morton curve with sampled splitters and exchange them.
    pub fn partition(&mut self) -> FmmResult<()> {
        let keys = self.fmm.morton_keys()?;
        let sample = self.fmm.sample(&keys);
        let mut samples = gather_to_all(&sample, self.comm)?;
        samples.sort_unstable();
        let splitters = select_splitters(&samples, self.fmm.size);

        let (sorted, counts) = self.fmm.partition(&keys, &splitters)?;
        let (received, _) = redistribute(&sorted, &counts, self.comm)?;
        self.fmm.receive_bodies(received)
    }

    /// Exchange requests and responses until every local essential tree is complete.
    pub fn exchange_lets(&mut self) -> FmmResult<()> {
        let _span = info_span!("let_exchange", rank = self.fmm.rank).entered();
        let size = self.fmm.size;

        let (root, multipole) = self.fmm.root()?;
        let mut cells = vec![Cell::default(); size];
        self.comm.all_gather_into(&root, &mut cells[..]);
        let flat = flatten(&multipole);
        let mut all = vec![K::T::default(); size * flat.len()];
        self.comm.all_gather_into(&flat[..], &mut all[..]);

        let roots = cells
            .into_iter()
            .zip(all.chunks_exact(flat.len().max(1)))
            .map(|(cell, m)| (cell, unflatten(m)))
            .collect();
        self.fmm.init_lets(roots)?;

        let max_rounds = 2 * (MAX_LEVEL as usize + 2);
        for round in 0.. {
            let requests = self.fmm.collect_requests()?;
            let local = requests.iter().map(|r| r.len()).sum::<usize>() as u64;
            let mut total = 0u64;
            self.comm
                .all_reduce_into(&local, &mut total, SystemOperation::sum());
            debug!(round, local, total, "let requests");
            if total == 0 {
                break;
            }
            if round >= max_rounds {
                return Err(FmmError::Communication(format!(
                    "local essential trees incomplete after {max_rounds} rounds"
                )));
            }

            let counts = requests.iter().map(|r| r.len()).collect::<Vec<_>>();
            let (incoming, incoming_counts) = redistribute(&requests.concat(), &counts, self.comm)?;
            let incoming = split_blocks(&incoming, &incoming_counts);

            let responses = incoming
                .iter()
                .map(|r| self.fmm.serve(r))
                .collect::<FmmResult<Vec<_>>>()?;
            let responses = self.exchange_responses(responses)?;
            self.fmm.attach_responses(&responses)?;
        }
        Ok(())
    }

    fn exchange_responses(
        &self,
        responses: Vec<LetResponse<K::T>>,
    ) -> FmmResult<Vec<LetResponse<K::T>>> {
        let cell_counts = responses.iter().map(|r| r.cells.len()).collect::<Vec<_>>();
        let cells = responses
            .iter()
            .flat_map(|r| r.cells.iter().copied())
            .collect::<Vec<_>>();
        let (cells, cell_counts) = redistribute(&cells, &cell_counts, self.comm)?;

        let multipole_counts = responses
            .iter()
            .map(|r| 2 * r.multipoles.len())
            .collect::<Vec<_>>();
        let multipoles = responses
            .iter()
            .flat_map(|r| flatten(&r.multipoles))
            .collect::<Vec<_>>();
        let (multipoles, multipole_counts) =
            redistribute(&multipoles, &multipole_counts, self.comm)?;

        let body_counts = responses.iter().map(|r| r.bodies.len()).collect::<Vec<_>>();
        let bodies = responses
            .iter()
            .flat_map(|r| r.bodies.iter().copied())
            .collect::<Vec<_>>();
        let (bodies, body_counts) = redistribute(&bodies, &body_counts, self.comm)?;

        Ok(split_blocks(&cells, &cell_counts)
            .into_iter()
            .zip(split_blocks(&multipoles, &multipole_counts))
            .zip(split_blocks(&bodies, &body_counts))
            .map(|((cells, multipoles), bodies)| LetResponse {
                cells,
                multipoles: unflatten(&multipoles),
                bodies,
            })
            .collect())
    }

    /// Compare sampled local bodies against direct summation over the sources of every rank.
    ///
    /// Source partitions travel once around the ring of ranks, so each rank holds at most one
    /// remote partition at a time. Squared error sums are reduced over all ranks, every rank
    /// returns the same global relative errors and fails if either exceeds `threshold`.
    ///
    /// # Arguments
    /// * `n_samples` - Number of sampled targets on this rank.
    /// * `threshold` - Largest accepted relative error.
    pub fn verify(&self, n_samples: usize, threshold: f64) -> FmmResult<(f64, f64)> {
        let _span = info_span!("verify", rank = self.fmm.rank).entered();
        let size = self.fmm.size;
        let approx = sample_bodies(self.fmm.bodies(), n_samples);
        let mut exact = approx.clone();
        init_target(&mut exact);

        let mut sources = self.fmm.bodies.clone();
        for step in 0..size {
            self.fmm
                .traversal
                .direct(&mut exact, &sources, &self.fmm.kernel);
            if step + 1 < size {
                let mut counts = vec![0; size];
                counts[(self.fmm.rank + 1) % size] = sources.len();
                sources = redistribute(&sources, &counts, self.comm)?.0;
            }
        }

        let local = [
            Verify::potential_difference(&approx, &exact),
            Verify::potential_norm(&exact),
            Verify::field_difference(&approx, &exact),
            Verify::field_norm(&exact),
        ];
        let mut global = [0f64; 4];
        self.comm
            .all_reduce_into(&local[..], &mut global[..], SystemOperation::sum());
        let (potential, field) = Verify::relative_from_sums(global);
        debug!(potential, field, "distributed verification");
        Verify::accept(potential, field, threshold)
    }
}

impl<K, C> Evaluate for TreeMpi<'_, K, C>
where
    K: Kernel,
    K::T: Equivalence,
    C: CommunicatorCollectives,
{
    type Scalar = K::T;

    /// Run every stage of the distributed evaluation. A rank is evaluated once.
    fn evaluate(&mut self) -> FmmResult<()> {
        self.reduce_bounds()?;
        self.partition()?;
        self.fmm.build_local_tree()?;

        let start = Instant::now();
        self.exchange_lets()?;
        if self.fmm.config.timed {
            self.fmm
                .times
                .push(FmmOperatorTime::from_instant(FmmOperatorType::Let, start));
        }

        self.fmm.evaluate_rounds()?;
        self.fmm.downward()
    }

    fn bodies(&self) -> &[Body<K::T>] {
        self.fmm.bodies()
    }

    fn times(&self) -> &[FmmOperatorTime] {
        self.fmm.times()
    }
}
