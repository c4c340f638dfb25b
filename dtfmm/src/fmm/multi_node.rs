//! Distributed evaluation over ranks that exchange local essential trees.
//!
//! Each rank holds a [`RankFmm`], a state machine that is independent of how data moves between
//! ranks. Bodies are partitioned along a Morton curve through splitters chosen from a sample of
//! keys, every rank builds a tree over its own bodies, and then pulls in the parts of every other
//! rank's tree that its traversal needs, one level of requests at a time. Transports drive the same
//! sequence of stages, [`simulate_ranks`] in process and `tree_mpi` over MPI.
use std::time::Instant;

use num_complex::Complex;
use tracing::{debug, info, info_span};

use crate::{
    fmm::types::{
        FmmConfig, LetResponse, LocalEssentialTree, RankFmm, Stage, Traversal, TraversalStats,
        UpDownPass,
    },
    traits::{
        general::Scalar,
        kernel::Kernel,
        tree::SourceTree,
        types::{FmmError, FmmOperatorTime, FmmOperatorType, FmmResult},
    },
    tree::{
        builder::OctreeBuilder,
        constants::MAX_LEVEL,
        helpers::init_target,
        morton::encode_point,
        types::{Body, Bounds, Cell, Octree},
    },
};

/// Number of samples drawn per rank for every splitter.
pub const OVERSAMPLING: usize = 8;

/// Union of the bounds of every rank.
pub fn global_bounds<T: Scalar>(local: &[Bounds<T>]) -> Bounds<T> {
    local
        .iter()
        .fold(Bounds::empty(), |acc, bounds| acc.merge(bounds))
}

/// Morton keys of bodies with respect to the cube enclosing global bounds.
pub fn morton_keys<T: Scalar>(bodies: &[Body<T>], bounds: &Bounds<T>) -> Vec<u64> {
    let (center, radius) = bounds.cube();
    bodies
        .iter()
        .map(|b| encode_point(&b.position, &center, radius))
        .collect()
}

/// Evenly spaced entries of sorted keys.
///
/// # Arguments
/// * `sorted` - Keys in ascending order.
/// * `n_samples` - Number of samples, fewer are returned if there are fewer keys.
pub fn regular_sample(sorted: &[u64], n_samples: usize) -> Vec<u64> {
    let n_samples = n_samples.min(sorted.len());
    (0..n_samples)
        .map(|j| sorted[(j * sorted.len()) / n_samples])
        .collect()
}

/// Choose `size - 1` splitters from sorted keys, so that assigning every key to the number of
/// splitters strictly below it divides the keys evenly.
///
/// With every key of the problem this gives an exact partition, with a sample of keys a balanced one.
pub fn select_splitters(sorted: &[u64], size: usize) -> Vec<u64> {
    if sorted.is_empty() {
        return vec![u64::MAX; size.saturating_sub(1)];
    }
    (1..size)
        .map(|i| sorted[((i * sorted.len()) / size).saturating_sub(1)])
        .collect()
}

/// Destination rank of each key, the number of splitters strictly below it.
pub fn assign_ranks(keys: &[u64], splitters: &[u64]) -> Vec<usize> {
    keys.iter()
        .map(|key| splitters.partition_point(|s| s < key))
        .collect()
}

/// Order bodies by destination rank, keeping their relative order, and count them per rank.
pub fn bucket_by_rank<T: Scalar>(
    bodies: Vec<Body<T>>,
    ranks: &[usize],
    size: usize,
) -> FmmResult<(Vec<Body<T>>, Vec<usize>)> {
    if bodies.len() != ranks.len() {
        return Err(FmmError::Communication(format!(
            "{} ranks assigned to {} bodies",
            ranks.len(),
            bodies.len()
        )));
    }

    let mut counts = vec![0usize; size];
    for &r in ranks.iter() {
        if r >= size {
            return Err(FmmError::Communication(format!(
                "body assigned to rank {r} of {size}"
            )));
        }
        counts[r] += 1;
    }

    let mut order = (0..bodies.len()).collect::<Vec<_>>();
    order.sort_by_key(|&i| ranks[i]);
    let sorted = order.into_iter().map(|i| bodies[i]).collect();
    Ok((sorted, counts))
}

/// Peers in the order their local essential trees are traversed, starting with this rank.
pub fn ring_order(rank: usize, size: usize) -> Vec<usize> {
    (0..size).map(|i| (rank + i) % size).collect()
}

/// Children, with their multipoles, of each requested internal cell, and the bodies of each
/// requested leaf.
///
/// # Arguments
/// * `tree` - Local tree with multipoles formed.
/// * `requests` - Indices of cells in the local tree.
pub fn serve_requests<T: Scalar>(tree: &Octree<T>, requests: &[usize]) -> FmmResult<LetResponse<T>> {
    let mut response = LetResponse::default();
    for &r in requests.iter() {
        let cell = tree.cells.get(r).ok_or_else(|| {
            FmmError::Communication(format!(
                "request for cell {r} of a tree with {} cells",
                tree.cells.len()
            ))
        })?;
        if cell.is_leaf() {
            response.bodies.extend_from_slice(tree.bodies_of(r));
        } else {
            for c in cell.children() {
                response.cells.push(tree.cells[c]);
                response.multipoles.extend_from_slice(tree.multipole(c));
            }
        }
    }
    Ok(response)
}

impl<T: Scalar> LocalEssentialTree<T> {
    /// A tree holding only the root of another rank's tree.
    ///
    /// # Arguments
    /// * `rank` - Owning rank.
    /// * `root` - Root cell of the owner.
    /// * `multipole` - Multipole of the root.
    pub fn from_root(rank: usize, root: Cell<T>, multipole: Vec<Complex<T>>) -> Self {
        Self {
            rank,
            n_coefficients: multipole.len(),
            cells: vec![root],
            bodies: Vec::new(),
            multipoles: multipole,
            remote: vec![0],
            resolved: vec![false],
        }
    }

    /// Indices on the owning rank of a set of local cells.
    pub fn remote_indices(&self, requests: &[usize]) -> Vec<usize> {
        requests.iter().map(|&i| self.remote[i]).collect()
    }

    /// Attach the owner's response to a set of requests, resolving every requested cell.
    ///
    /// # Arguments
    /// * `requests` - Local indices of the requested cells, in the order they were sent.
    /// * `response` - Response of the owner.
    pub fn attach(&mut self, requests: &[usize], response: &LetResponse<T>) -> FmmResult<()> {
        let n = self.n_coefficients;
        let mut next_cell = 0;
        let mut next_body = 0;

        for &i in requests.iter() {
            if i >= self.cells.len() || self.resolved[i] {
                return Err(FmmError::Communication(format!(
                    "request for cell {i} of rank {} is invalid",
                    self.rank
                )));
            }
            let cell = self.cells[i];

            if cell.is_leaf() {
                let bodies = response
                    .bodies
                    .get(next_body..next_body + cell.n_bodies)
                    .ok_or_else(|| self.short_response("bodies"))?;
                self.cells[i].body_begin = self.bodies.len();
                self.bodies.extend_from_slice(bodies);
                next_body += cell.n_bodies;
            } else {
                let children = response
                    .cells
                    .get(next_cell..next_cell + cell.n_children)
                    .ok_or_else(|| self.short_response("cells"))?;
                let multipoles = response
                    .multipoles
                    .get(next_cell * n..(next_cell + cell.n_children) * n)
                    .ok_or_else(|| self.short_response("multipoles"))?;

                let begin = self.cells.len();
                for (k, child) in children.iter().enumerate() {
                    if child.parent != self.remote[i] {
                        return Err(FmmError::Communication(format!(
                            "rank {} returned a child of cell {} for cell {}",
                            self.rank, child.parent, self.remote[i]
                        )));
                    }
                    self.cells.push(Cell { parent: i, ..*child });
                    self.remote.push(cell.child_begin + k);
                    self.resolved.push(false);
                }
                self.multipoles.extend_from_slice(multipoles);
                self.cells[i].child_begin = begin;
                next_cell += cell.n_children;
            }
            self.resolved[i] = true;
        }

        if next_cell != response.cells.len()
            || next_body != response.bodies.len()
            || next_cell * n != response.multipoles.len()
        {
            return Err(FmmError::Communication(format!(
                "response of rank {} does not match its {} requests",
                self.rank,
                requests.len()
            )));
        }
        Ok(())
    }

    fn short_response(&self, what: &str) -> FmmError {
        FmmError::Communication(format!(
            "response of rank {} holds too few {what}",
            self.rank
        ))
    }
}

impl<T: Scalar> SourceTree for LocalEssentialTree<T> {
    type Scalar = T;

    fn cells(&self) -> &[Cell<T>] {
        &self.cells
    }

    fn bodies(&self) -> &[Body<T>] {
        &self.bodies
    }

    fn multipole(&self, cell: usize) -> &[Complex<T>] {
        &self.multipoles[cell * self.n_coefficients..(cell + 1) * self.n_coefficients]
    }

    fn resolved(&self, cell: usize) -> bool {
        self.resolved[cell]
    }
}

impl<K: Kernel> RankFmm<K> {
    /// Constructor
    ///
    /// # Arguments
    /// * `rank` - Rank of this process.
    /// * `size` - Number of ranks.
    /// * `bodies` - Bodies initially held by this rank, possibly none.
    /// * `config` - Run time parameters.
    /// * `kernel` - Kernel, whose expansion order must match the parameters.
    pub fn new(
        rank: usize,
        size: usize,
        bodies: Vec<Body<K::T>>,
        config: FmmConfig<K::T>,
        kernel: K,
    ) -> FmmResult<Self> {
        config.validate()?;
        if kernel.expansion_order() != config.expansion_order {
            return Err(FmmError::Config(format!(
                "Kernel expansion order {} does not match configured order {}",
                kernel.expansion_order(),
                config.expansion_order
            )));
        }
        if rank >= size {
            return Err(FmmError::Config(format!("rank {rank} of {size} ranks")));
        }

        Ok(Self {
            rank,
            size,
            traversal: Traversal::from_config(&config),
            config,
            kernel,
            bodies,
            bounds: Bounds::empty(),
            tree: Octree::default(),
            lets: Vec::new(),
            pending: vec![Vec::new(); size],
            stage: Stage::LocalBoundsReady,
            stats: TraversalStats::default(),
            times: Vec::new(),
        })
    }

    fn expect(&self, stage: Stage) -> FmmResult<()> {
        if self.stage == stage {
            Ok(())
        } else {
            Err(FmmError::InvariantViolation(format!(
                "rank {} expected stage {stage:?}, found {:?}",
                self.rank, self.stage
            )))
        }
    }

    /// Bounds of the bodies initially held by this rank.
    pub fn local_bounds(&self) -> FmmResult<Bounds<K::T>> {
        self.expect(Stage::LocalBoundsReady)?;
        Ok(Bounds::from_bodies(&self.bodies))
    }

    /// Set the bounds reduced over all ranks.
    pub fn set_global_bounds(&mut self, bounds: Bounds<K::T>) -> FmmResult<()> {
        self.expect(Stage::LocalBoundsReady)?;
        self.bounds = bounds;
        self.stage = Stage::GlobalBoundsReduced;
        Ok(())
    }

    /// Morton keys of the local bodies in the cube of the global bounds.
    pub fn morton_keys(&self) -> FmmResult<Vec<u64>> {
        self.expect(Stage::GlobalBoundsReduced)?;
        Ok(morton_keys(&self.bodies, &self.bounds))
    }

    /// Regular sample of local keys, contributed to the choice of splitters.
    pub fn sample(&self, keys: &[u64]) -> Vec<u64> {
        let mut sorted = keys.to_vec();
        sorted.sort_unstable();
        regular_sample(&sorted, OVERSAMPLING * self.size)
    }

    /// Assign local bodies to ranks, returning them ordered by destination with a count per rank.
    pub fn partition(
        &mut self,
        keys: &[u64],
        splitters: &[u64],
    ) -> FmmResult<(Vec<Body<K::T>>, Vec<usize>)> {
        self.expect(Stage::GlobalBoundsReduced)?;
        if splitters.len() + 1 != self.size {
            return Err(FmmError::Communication(format!(
                "{} splitters for {} ranks",
                splitters.len(),
                self.size
            )));
        }
        let ranks = assign_ranks(keys, splitters);
        let result = bucket_by_rank(std::mem::take(&mut self.bodies), &ranks, self.size)?;
        self.stage = Stage::Partitioned;
        Ok(result)
    }

    /// Take ownership of the bodies sent to this rank.
    pub fn receive_bodies(&mut self, mut bodies: Vec<Body<K::T>>) -> FmmResult<()> {
        self.expect(Stage::Partitioned)?;
        init_target(&mut bodies);
        self.bodies = bodies;
        self.stage = Stage::BodiesExchanged;
        Ok(())
    }

    /// Build the local tree in the cube of the global bounds, and form its multipoles.
    pub fn build_local_tree(&mut self) -> FmmResult<()> {
        self.expect(Stage::BodiesExchanged)?;

        let start = Instant::now();
        let mut bodies = std::mem::take(&mut self.bodies);
        let mut buffer = bodies.clone();
        self.tree = OctreeBuilder::new(self.config.ncrit, self.config.nspawn).build(
            &mut bodies,
            &mut buffer,
            &self.bounds,
        )?;
        if self.config.timed {
            self.times
                .push(FmmOperatorTime::from_instant(FmmOperatorType::Build, start));
        }

        let pass = UpDownPass::new(&self.kernel, self.config.timed);
        self.times.extend(pass.upward_pass(&mut self.tree));

        debug!(
            rank = self.rank,
            n_bodies = self.tree.bodies.len(),
            n_cells = self.tree.cells.len(),
            "built local tree"
        );
        Ok(())
    }

    /// Root cell of the local tree and its multipole, from which every peer starts its local
    /// essential tree of this rank.
    pub fn root(&self) -> FmmResult<(Cell<K::T>, Vec<Complex<K::T>>)> {
        match self.tree.cells.first() {
            Some(root) => Ok((*root, self.tree.multipole(0).to_vec())),
            None => Err(FmmError::InvariantViolation(format!(
                "rank {} has no local tree",
                self.rank
            ))),
        }
    }

    /// Start the local essential tree of every peer from its root.
    pub fn init_lets(&mut self, roots: Vec<(Cell<K::T>, Vec<Complex<K::T>>)>) -> FmmResult<()> {
        self.expect(Stage::BodiesExchanged)?;
        if self.tree.cells.is_empty() {
            return Err(FmmError::InvariantViolation(format!(
                "rank {} has no local tree",
                self.rank
            )));
        }
        if roots.len() != self.size {
            return Err(FmmError::Communication(format!(
                "received {} roots from {} ranks",
                roots.len(),
                self.size
            )));
        }
        self.lets = roots
            .into_iter()
            .enumerate()
            .map(|(r, (root, multipole))| LocalEssentialTree::from_root(r, root, multipole))
            .collect();
        Ok(())
    }

    /// Walk the local tree against every peer's local essential tree, returning the cells to request
    /// from each peer as indices on that peer. Once no requests remain the trees are complete.
    pub fn collect_requests(&mut self) -> FmmResult<Vec<Vec<usize>>> {
        if self.stage != Stage::LetBuilt {
            self.expect(Stage::BodiesExchanged)?;
        }

        let mut requests = vec![Vec::new(); self.size];
        for peer in ring_order(self.rank, self.size).into_iter().skip(1) {
            let (_, pending) = self
                .traversal
                .interaction_list_partial(&self.tree, &self.lets[peer]);
            requests[peer] = self.lets[peer].remote_indices(&pending);
            self.pending[peer] = pending;
        }

        if requests.iter().all(|r| r.is_empty()) {
            self.stage = Stage::LetBuilt;
        }
        Ok(requests)
    }

    /// Answer the requests of a peer.
    pub fn serve(&self, requests: &[usize]) -> FmmResult<LetResponse<K::T>> {
        serve_requests(&self.tree, requests)
    }

    /// Attach the responses of every peer to the requests made in the last call to `collect_requests`.
    pub fn attach_responses(&mut self, responses: &[LetResponse<K::T>]) -> FmmResult<()> {
        if responses.len() != self.size {
            return Err(FmmError::Communication(format!(
                "received {} responses from {} ranks",
                responses.len(),
                self.size
            )));
        }
        for peer in ring_order(self.rank, self.size).into_iter().skip(1) {
            let pending = std::mem::take(&mut self.pending[peer]);
            self.lets[peer].attach(&pending, &responses[peer])?;
        }
        Ok(())
    }

    /// Traverse the local tree against itself, then against the local essential tree of every peer
    /// in ring order.
    pub fn evaluate_rounds(&mut self) -> FmmResult<()> {
        self.expect(Stage::LetBuilt)?;

        let start = Instant::now();
        self.stats = self.traversal.traverse_self(&mut self.tree, &self.kernel)?;
        self.stage = Stage::TraversalRound(0);

        for (round, peer) in ring_order(self.rank, self.size)
            .into_iter()
            .enumerate()
            .skip(1)
        {
            let source = &self.lets[peer];
            let (list, requests) = self.traversal.interaction_list_partial(&self.tree, source);
            if !requests.is_empty() {
                return Err(FmmError::InvariantViolation(format!(
                    "local essential tree of rank {peer} is missing {} cells on rank {}",
                    requests.len(),
                    self.rank
                )));
            }
            let contributions = self
                .traversal
                .evaluate(&self.tree, source, &list, &self.kernel);
            let stats = contributions.apply(&mut self.tree)?;
            self.stats.merge(&stats);
            self.stage = Stage::TraversalRound(round);
        }

        if self.config.timed {
            self.times
                .push(FmmOperatorTime::from_instant(FmmOperatorType::Traversal, start));
        }
        Ok(())
    }

    /// Downward pass over the local tree.
    pub fn downward(&mut self) -> FmmResult<()> {
        self.expect(Stage::TraversalRound(self.size - 1))?;
        let pass = UpDownPass::new(&self.kernel, self.config.timed);
        self.times.extend(pass.downward_pass(&mut self.tree));
        self.stage = Stage::Done;

        debug!(
            rank = self.rank,
            n_near = self.stats.n_near,
            n_far = self.stats.n_far,
            "rank evaluated"
        );
        Ok(())
    }

    /// Bodies held by this rank, in tree order once the local tree is built.
    pub fn bodies(&self) -> &[Body<K::T>] {
        if self.tree.cells.is_empty() {
            &self.bodies
        } else {
            &self.tree.bodies
        }
    }

    /// Operator times.
    pub fn times(&self) -> &[FmmOperatorTime] {
        &self.times
    }
}

/// Run the distributed protocol over a number of ranks in a single process, with in memory message
/// passing and exact splitters.
///
/// # Arguments
/// * `bodies` - All bodies, dealt to ranks in contiguous blocks before partitioning.
/// * `n_ranks` - Number of ranks to simulate.
/// * `config` - Run time parameters.
/// * `kernel` - Kernel, cloned onto every rank.
pub fn simulate_ranks<K: Kernel + Clone>(
    bodies: Vec<Body<K::T>>,
    n_ranks: usize,
    config: FmmConfig<K::T>,
    kernel: K,
) -> FmmResult<Vec<RankFmm<K>>> {
    if n_ranks == 0 {
        return Err(FmmError::Config("at least one rank is required".to_string()));
    }

    let block = bodies.len().div_ceil(n_ranks).max(1);
    let mut blocks = bodies.chunks(block).map(|c| c.to_vec()).collect::<Vec<_>>();
    blocks.resize(n_ranks, Vec::new());

    let mut ranks = blocks
        .into_iter()
        .enumerate()
        .map(|(rank, bodies)| RankFmm::new(rank, n_ranks, bodies, config, kernel.clone()))
        .collect::<FmmResult<Vec<_>>>()?;

    let local = ranks
        .iter()
        .map(|r| r.local_bounds())
        .collect::<FmmResult<Vec<_>>>()?;
    let bounds = global_bounds(&local);
    for rank in ranks.iter_mut() {
        rank.set_global_bounds(bounds)?;
    }

    let keys = ranks
        .iter()
        .map(|r| r.morton_keys())
        .collect::<FmmResult<Vec<_>>>()?;
    let mut all_keys = keys.concat();
    all_keys.sort_unstable();
    let splitters = select_splitters(&all_keys, n_ranks);

    let mut received = vec![Vec::new(); n_ranks];
    for (rank, keys) in ranks.iter_mut().zip(keys.iter()) {
        let (sorted, counts) = rank.partition(keys, &splitters)?;
        let mut offset = 0;
        for (destination, count) in counts.into_iter().enumerate() {
            received[destination].extend_from_slice(&sorted[offset..offset + count]);
            offset += count;
        }
    }

    for (rank, bodies) in ranks.iter_mut().zip(received) {
        rank.receive_bodies(bodies)?;
        rank.build_local_tree()?;
    }

    exchange_lets(&mut ranks)?;

    for rank in ranks.iter_mut() {
        rank.evaluate_rounds()?;
        rank.downward()?;
    }

    Ok(ranks)
}

fn exchange_lets<K: Kernel>(ranks: &mut [RankFmm<K>]) -> FmmResult<()> {
    let _span = info_span!("let_exchange", n_ranks = ranks.len()).entered();
    let start = Instant::now();
    let n_ranks = ranks.len();

    let roots = ranks
        .iter()
        .map(|r| r.root())
        .collect::<FmmResult<Vec<_>>>()?;
    for rank in ranks.iter_mut() {
        rank.init_lets(roots.clone())?;
    }

    // Each round resolves one more level of every remote tree.
    let max_rounds = 2 * (MAX_LEVEL as usize + 2);
    let mut round = 0;
    loop {
        let requests = ranks
            .iter_mut()
            .map(|r| r.collect_requests())
            .collect::<FmmResult<Vec<_>>>()?;
        let n_requests: usize = requests.iter().flatten().map(|r| r.len()).sum();
        debug!(round, n_requests, "let requests");
        if n_requests == 0 {
            break;
        }
        round += 1;
        if round > max_rounds {
            return Err(FmmError::Communication(format!(
                "local essential trees incomplete after {max_rounds} rounds"
            )));
        }

        for r in 0..n_ranks {
            let responses = (0..n_ranks)
                .map(|peer| {
                    if peer == r {
                        Ok(LetResponse::default())
                    } else {
                        ranks[peer].serve(&requests[r][peer])
                    }
                })
                .collect::<FmmResult<Vec<_>>>()?;
            ranks[r].attach_responses(&responses)?;
        }
    }

    for rank in ranks.iter_mut() {
        if rank.config.timed {
            rank.times
                .push(FmmOperatorTime::from_instant(FmmOperatorType::Let, start));
        }
    }
    info!(rounds = round, "local essential trees complete");
    Ok(())
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use crate::{
        fmm::{
            types::{Equation, SingleNodeBuilder},
            verify::Verify,
        },
        kernel::{BiotSavart3d, Laplace3d},
        tree::helpers::{init_bodies, sample_bodies, Distribution},
    };

    use super::*;

    fn gather<K: Kernel>(ranks: &[RankFmm<K>]) -> Vec<Body<K::T>> {
        let mut bodies = ranks
            .iter()
            .flat_map(|r| r.bodies().iter().copied())
            .collect::<Vec<_>>();
        bodies.sort_by_key(|b| b.index);
        bodies
    }

    fn reference<K: Kernel<T = f64>>(
        bodies: &[Body<f64>],
        config: &FmmConfig<f64>,
        kernel: &K,
        n_targets: usize,
    ) -> (Vec<Body<f64>>, Vec<Body<f64>>) {
        let approx = sample_bodies(bodies, n_targets);
        let mut exact = approx.clone();
        init_target(&mut exact);
        Traversal::from_config(config).direct(&mut exact, bodies, kernel);
        (approx, exact)
    }

    #[test]
    fn test_splitters() {
        let sorted = (0..100u64).collect::<Vec<_>>();
        let splitters = select_splitters(&sorted, 4);
        assert_eq!(splitters, vec![24, 49, 74]);

        let ranks = assign_ranks(&sorted, &splitters);
        for r in 0..4 {
            assert_eq!(ranks.iter().filter(|&&x| x == r).count(), 25);
        }
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(select_splitters(&[], 3), vec![u64::MAX; 2]);
        assert_eq!(regular_sample(&sorted, 4), vec![0, 25, 50, 75]);
        assert_eq!(regular_sample(&sorted[..2], 4), vec![0, 1]);
    }

    #[test]
    fn test_ring_order() {
        assert_eq!(ring_order(2, 4), vec![2, 3, 0, 1]);
        assert_eq!(ring_order(0, 1), vec![0]);
    }

    #[test]
    fn test_bucket_by_rank() {
        let bodies = init_bodies::<f64>(6, Distribution::Cube, 0, 0, 1);
        let (sorted, counts) = bucket_by_rank(bodies.clone(), &[1, 0, 1, 2, 0, 1], 3).unwrap();
        assert_eq!(counts, vec![2, 3, 1]);
        let indices = sorted.iter().map(|b| b.index).collect::<Vec<_>>();
        assert_eq!(indices, vec![1, 4, 0, 2, 5, 3]);

        assert!(bucket_by_rank(bodies.clone(), &[0, 1], 3).is_err());
        assert!(bucket_by_rank(bodies, &[0, 1, 2, 3, 0, 0], 3).is_err());
    }

    #[test]
    fn test_partition_covers_bodies() {
        let bodies = init_bodies::<f64>(1000, Distribution::Cube, 0, 0, 1);
        let config = FmmConfig::<f64>::default();
        let kernel = Laplace3d::new(config.expansion_order);
        let ranks = simulate_ranks(bodies, 3, config, kernel).unwrap();

        let mut indices = ranks
            .iter()
            .flat_map(|r| r.bodies().iter().map(|b| b.index))
            .collect::<Vec<_>>();
        indices.sort_unstable();
        assert_eq!(indices, (0..1000).collect::<Vec<_>>());

        // Ranks own consecutive stretches of the Morton curve.
        let bounds = ranks[0].bounds;
        let extents = ranks
            .iter()
            .map(|r| {
                let keys = morton_keys(r.bodies(), &bounds);
                (
                    keys.iter().copied().min().unwrap_or(u64::MAX),
                    keys.iter().copied().max().unwrap_or(0),
                )
            })
            .collect::<Vec<_>>();
        for w in extents.windows(2) {
            assert!(w[0].1 <= w[1].0);
        }
        for rank in ranks.iter() {
            assert!(rank.bodies().len() > 250);
            assert_eq!(rank.stage, Stage::Done);
        }
    }

    #[test]
    fn test_direct_summation_is_rank_invariant() {
        let bodies = init_bodies::<f64>(300, Distribution::Cube, 1, 0, 1);
        let config = FmmConfig {
            theta: 0.0,
            ncrit: 8,
            expansion_order: 4,
            ..Default::default()
        };
        let kernel = Laplace3d::new(config.expansion_order);

        let reference = gather(&simulate_ranks(bodies.clone(), 1, config, kernel).unwrap());
        for n_ranks in [2, 3, 5] {
            let result = gather(&simulate_ranks(bodies.clone(), n_ranks, config, kernel).unwrap());
            assert_eq!(result.len(), reference.len());
            for (a, b) in result.iter().zip(reference.iter()) {
                assert_eq!(a.index, b.index);
                assert_relative_eq!(a.potential, b.potential, max_relative = 1e-10);
                for d in 0..3 {
                    assert_relative_eq!(a.field[d], b.field[d], max_relative = 1e-10, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_accuracy_for_any_rank_count() {
        let bodies = init_bodies::<f64>(1000, Distribution::Cube, 2, 0, 1);
        let config = FmmConfig::<f64>::default();
        let kernel = Laplace3d::new(config.expansion_order);

        for n_ranks in [1, 2, 4] {
            let ranks = simulate_ranks(bodies.clone(), n_ranks, config, kernel).unwrap();
            let result = gather(&ranks);
            let (approx, exact) = reference(&result, &config, &kernel, 100);
            assert!(Verify::check(&approx, &exact, 1e-3).is_ok());

            let n_far: usize = ranks.iter().map(|r| r.stats.n_far).sum();
            assert!(n_far > 0);
        }
    }

    #[test]
    fn test_single_rank_matches_single_node() {
        let bodies = init_bodies::<f64>(800, Distribution::Sphere, 3, 0, 1);
        let config = FmmConfig::<f64>::default();
        let kernel = Laplace3d::new(config.expansion_order);

        let ranks = simulate_ranks(bodies.clone(), 1, config, kernel).unwrap();
        let mut fmm = SingleNodeBuilder::new()
            .bodies(bodies)
            .unwrap()
            .parameters(config, kernel)
            .unwrap()
            .build()
            .unwrap();
        fmm.evaluate().unwrap();

        let mut single = fmm.bodies().to_vec();
        single.sort_by_key(|b| b.index);
        for (a, b) in gather(&ranks).iter().zip(single.iter()) {
            assert_relative_eq!(a.potential, b.potential, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_let_is_subset_of_remote_tree() {
        let bodies = init_bodies::<f64>(1500, Distribution::Cube, 4, 0, 1);
        let config = FmmConfig::<f64>::default();
        let kernel = Laplace3d::new(config.expansion_order);
        let ranks = simulate_ranks(bodies, 2, config, kernel).unwrap();

        for rank in ranks.iter() {
            let peer = 1 - rank.rank;
            let fragment = &rank.lets[peer];
            let owner = &ranks[peer].tree;
            assert!(fragment.cells.len() <= owner.cells.len());
            assert!(fragment.cells.len() > 1);

            for (i, cell) in fragment.cells.iter().enumerate() {
                let remote = &owner.cells[fragment.remote[i]];
                assert_eq!(cell.center, remote.center);
                assert_eq!(cell.radius, remote.radius);
                assert_eq!(cell.n_bodies, remote.n_bodies);
                for (a, b) in fragment
                    .multipole(i)
                    .iter()
                    .zip(owner.multipole(fragment.remote[i]))
                {
                    assert_eq!(a, b);
                }

                // Copies are taken before evaluation, so only the inputs of bodies are compared.
                if cell.is_leaf() && fragment.resolved[i] {
                    let bodies = fragment.cell_bodies(i);
                    let owned = owner.bodies_of(fragment.remote[i]);
                    assert_eq!(bodies.len(), owned.len());
                    for (a, b) in bodies.iter().zip(owned.iter()) {
                        assert_eq!(a.position, b.position);
                        assert_eq!(a.source, b.source);
                        assert_eq!(a.index, b.index);
                    }
                }
            }

            // Every leaf whose bodies a near interaction needs carries them.
            let list = rank.traversal.interaction_list(&rank.tree, fragment);
            for interaction in list.near.iter() {
                assert!(fragment.resolved[interaction.source]);
                assert_eq!(
                    fragment.cell_bodies(interaction.source).len(),
                    fragment.cells[interaction.source].n_bodies
                );
            }
        }
    }

    #[test]
    fn test_empty_ranks() {
        let bodies = init_bodies::<f64>(3, Distribution::Cube, 5, 0, 1);
        let config = FmmConfig::<f64>::default();
        let kernel = Laplace3d::new(config.expansion_order);
        let ranks = simulate_ranks(bodies.clone(), 5, config, kernel).unwrap();

        assert_eq!(ranks.iter().filter(|r| r.bodies().is_empty()).count(), 2);
        let result = gather(&ranks);
        let (approx, exact) = reference(&result, &config, &kernel, 3);
        for (a, e) in approx.iter().zip(exact.iter()) {
            assert_relative_eq!(a.potential, e.potential, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_biot_savart() {
        let bodies = init_bodies::<f64>(800, Distribution::Octant, 6, 0, 1);
        let config = FmmConfig {
            equation: Equation::BiotSavart,
            ..Default::default()
        };
        let kernel = BiotSavart3d::new(config.expansion_order);
        let ranks = simulate_ranks(bodies, 3, config, kernel).unwrap();
        let result = gather(&ranks);
        let (approx, exact) = reference(&result, &config, &kernel, 100);
        assert!(Verify::check(&approx, &exact, 1e-3).is_ok());
    }

    #[test]
    fn test_stage_order_enforced() {
        let bodies = init_bodies::<f64>(10, Distribution::Cube, 7, 0, 1);
        let config = FmmConfig::<f64>::default();
        let mut rank = RankFmm::new(0, 2, bodies, config, Laplace3d::new(config.expansion_order)).unwrap();

        assert!(matches!(
            rank.evaluate_rounds(),
            Err(FmmError::InvariantViolation(_))
        ));
        assert!(rank.morton_keys().is_err());
        assert!(rank.root().is_err());

        let bounds = rank.local_bounds().unwrap();
        rank.set_global_bounds(bounds).unwrap();
        let keys = rank.morton_keys().unwrap();
        assert!(matches!(
            rank.partition(&keys, &[]),
            Err(FmmError::Communication(_))
        ));
        assert!(RankFmm::new(2, 2, Vec::new(), config, Laplace3d::new(config.expansion_order)).is_err());
    }

    #[test]
    fn test_attach_rejects_mismatched_responses() {
        let bodies = init_bodies::<f64>(500, Distribution::Cube, 8, 0, 1);
        let config = FmmConfig::<f64>::default();
        let kernel = Laplace3d::new(config.expansion_order);
        let mut bodies = bodies;
        let mut buffer = bodies.clone();
        let bounds = Bounds::from_bodies(&bodies);
        let mut tree = OctreeBuilder::new(16, 1000)
            .build(&mut bodies, &mut buffer, &bounds)
            .unwrap();
        UpDownPass::new(&kernel, false).upward_pass(&mut tree);

        let fragment = LocalEssentialTree::from_root(1, tree.cells[0], tree.multipole(0).to_vec());

        let response = serve_requests(&tree, &[0]).unwrap();
        assert_eq!(response.cells.len(), tree.cells[0].n_children);

        let mut short = response.clone();
        short.cells.pop();
        assert!(matches!(
            fragment.clone().attach(&[0], &short),
            Err(FmmError::Communication(_))
        ));

        let mut long = response.clone();
        long.bodies.push(Body::default());
        assert!(fragment.clone().attach(&[0], &long).is_err());

        let mut resolved = fragment.clone();
        resolved.attach(&[0], &response).unwrap();
        assert!(resolved.resolved[0]);
        assert_eq!(resolved.cells.len(), 1 + tree.cells[0].n_children);
        assert!(resolved.attach(&[0], &response).is_err());

        assert!(serve_requests(&tree, &[tree.cells.len()]).is_err());
    }
}
