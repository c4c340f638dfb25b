//! Dual tree traversal, interaction list evaluation, and direct summation
use num_complex::Complex;
use rayon::prelude::*;
use tracing::{debug, info_span};

use crate::{
    fmm::{
        helpers::periodic_offsets,
        types::{Contributions, FmmConfig, Interaction, InteractionList, Traversal, TraversalStats},
    },
    traits::{
        general::Scalar,
        kernel::Kernel,
        tree::SourceTree,
        types::{FmmError, FmmResult},
    },
    tree::types::{Body, Cell, Octree},
};

/// Result of walking one subtree of cell pairs.
#[derive(Default)]
struct Walk {
    list: InteractionList,
    requests: Vec<usize>,
}

impl Walk {
    fn merge(mut self, other: Walk) -> Walk {
        self.list = self.list.merge(other.list);
        self.requests.extend(other.requests);
        self
    }
}

impl<T: Scalar> Traversal<T> {
    /// Constructor
    ///
    /// # Arguments
    /// * `theta` - Opening angle, values outside `(0, 1]` evaluate every pair directly.
    /// * `nspawn` - Threshold number of bodies above which pairs are visited in parallel.
    /// * `images` - Number of periodic image shells.
    /// * `cycle` - Period of the domain.
    /// * `dual` - Split both cells of an inadmissible pair of internal cells.
    pub fn new(theta: T, nspawn: usize, images: usize, cycle: T, dual: bool) -> Self {
        Self {
            theta,
            nspawn,
            images,
            cycle,
            dual,
            offsets: periodic_offsets(images, cycle),
        }
    }

    /// Constructor from run time parameters.
    pub fn from_config(config: &FmmConfig<T>) -> Self {
        Self::new(
            config.theta,
            config.nspawn,
            config.images,
            config.cycle,
            config.dual,
        )
    }

    /// Offsets of the periodic images visited.
    pub fn offsets(&self) -> &[[T; 3]] {
        &self.offsets
    }

    /// Multipole acceptance criterion, comparing the sum of the radii of the spheres enclosing both
    /// cubes with `theta` times the distance of their centers.
    pub fn admissible(&self, target: &Cell<T>, source: &Cell<T>, offset: &[T; 3]) -> bool {
        if !(self.theta > T::zero() && self.theta <= T::one()) {
            return false;
        }
        let mut r2 = T::zero();
        for d in 0..3 {
            let dx = target.center[d] - (source.center[d] + offset[d]);
            r2 += dx * dx;
        }
        (target.radius + source.radius) * T::of(3.0).sqrt() < self.theta * r2.sqrt()
    }

    fn walk<S: SourceTree<Scalar = T>>(
        &self,
        target: &[Cell<T>],
        source: &S,
        seed: (usize, usize),
        image: usize,
    ) -> Walk {
        let offset = &self.offsets[image];
        let source_cells = source.cells();
        let mut result = Walk::default();
        let mut stack = vec![seed];

        while let Some((a, b)) = stack.pop() {
            let ca = &target[a];
            let cb = &source_cells[b];
            if ca.n_bodies == 0 || cb.n_bodies == 0 {
                continue;
            }

            let interaction = Interaction {
                target: a,
                source: b,
                image,
            };

            if self.admissible(ca, cb, offset) {
                result.list.far.push(interaction);
                continue;
            }

            if ca.is_leaf() && cb.is_leaf() {
                if source.resolved(b) {
                    result.list.near.push(interaction);
                } else {
                    result.requests.push(b);
                }
                continue;
            }

            let split_both = self.dual && !ca.is_leaf() && !cb.is_leaf();
            let split_target =
                split_both || (!ca.is_leaf() && (cb.is_leaf() || ca.radius >= cb.radius));
            let split_source = split_both || !split_target;

            if split_source && !source.resolved(b) {
                result.requests.push(b);
                continue;
            }

            let targets = if split_target { ca.children() } else { a..a + 1 };
            let sources = if split_source { cb.children() } else { b..b + 1 };
            let pairs = targets
                .flat_map(|i| sources.clone().map(move |j| (i, j)))
                .collect::<Vec<_>>();

            if ca.n_bodies > self.nspawn && cb.n_bodies > self.nspawn {
                let sub = pairs
                    .into_par_iter()
                    .map(|pair| self.walk(target, source, pair, image))
                    .reduce(Walk::default, Walk::merge);
                result = result.merge(sub);
            } else {
                stack.extend(pairs.into_iter().rev());
            }
        }

        result
    }

    fn walk_images<S: SourceTree<Scalar = T>>(&self, target: &Octree<T>, source: &S) -> Walk {
        if target.cells.is_empty() || source.cells().is_empty() {
            return Walk::default();
        }
        (0..self.offsets.len())
            .into_par_iter()
            .map(|image| self.walk(&target.cells, source, (0, 0), image))
            .reduce(Walk::default, Walk::merge)
    }

    /// Near and far field interactions between a target and a source tree, over all periodic images.
    pub fn interaction_list<S: SourceTree<Scalar = T>>(
        &self,
        target: &Octree<T>,
        source: &S,
    ) -> InteractionList {
        self.walk_images(target, source).list
    }

    /// Interactions with a source tree that may be incomplete, together with the sorted indices of
    /// source cells that the walk needed to open but could not.
    ///
    /// The list is only complete once no requests remain.
    pub fn interaction_list_partial<S: SourceTree<Scalar = T>>(
        &self,
        target: &Octree<T>,
        source: &S,
    ) -> (InteractionList, Vec<usize>) {
        let Walk { list, mut requests } = self.walk_images(target, source);
        requests.sort_unstable();
        requests.dedup();
        (list, requests)
    }

    /// Evaluate an interaction list into per target buffers, without touching the target tree.
    ///
    /// The target tree's local expansions are only read for their size, so it may also be the source.
    pub fn evaluate<K, S>(
        &self,
        target: &Octree<T>,
        source: &S,
        list: &InteractionList,
        kernel: &K,
    ) -> Contributions<T>
    where
        K: Kernel<T = T>,
        S: SourceTree<Scalar = T>,
    {
        let n = kernel.n_coefficients();
        let source_cells = source.cells();

        let mut far = list.far.clone();
        far.sort_by_key(|i| i.target);
        let far_groups = far.chunk_by(|x, y| x.target == y.target).collect::<Vec<_>>();

        let locals = far_groups
            .par_iter()
            .map(|group| {
                let t = group[0].target;
                let mut local = vec![Complex::<T>::default(); n];
                for interaction in group.iter() {
                    let cell = &source_cells[interaction.source];
                    let offset = &self.offsets[interaction.image];
                    let center = [
                        cell.center[0] + offset[0],
                        cell.center[1] + offset[1],
                        cell.center[2] + offset[2],
                    ];
                    kernel.m2l(
                        &center,
                        source.multipole(interaction.source),
                        &target.cells[t].center,
                        &mut local,
                    );
                }
                (t, local)
            })
            .collect::<Vec<_>>();

        let mut near = list.near.clone();
        near.sort_by_key(|i| i.target);
        let near_groups = near.chunk_by(|x, y| x.target == y.target).collect::<Vec<_>>();

        let near_results = near_groups
            .par_iter()
            .map(|group| {
                let t = group[0].target;
                let targets = target.bodies_of(t);
                let mut potential = vec![T::zero(); targets.len()];
                let mut field = vec![[T::zero(); 3]; targets.len()];
                let mut pairs = 0;
                for interaction in group.iter() {
                    let sources = source.cell_bodies(interaction.source);
                    kernel.p2p(
                        targets,
                        sources,
                        &self.offsets[interaction.image],
                        &mut potential,
                        &mut field,
                    );
                    pairs += targets.len() * sources.len();
                }
                ((t, potential, field), pairs)
            })
            .collect::<Vec<_>>();

        let mut counts = far_groups
            .iter()
            .map(|group| (group[0].target, 0, group.len()))
            .collect::<Vec<_>>();
        counts.extend(near_groups.iter().map(|group| (group[0].target, group.len(), 0)));

        let mut stats = TraversalStats {
            n_near: near.len(),
            n_far: far.len(),
            n_p2p_pairs: 0,
        };
        let mut near = Vec::with_capacity(near_results.len());
        for (result, pairs) in near_results {
            stats.n_p2p_pairs += pairs;
            near.push(result);
        }

        Contributions {
            locals,
            near,
            counts,
            stats,
        }
    }

    /// Traverse a target tree against a source tree, accumulating local expansions, near field
    /// potentials and interaction counters into the target, whose expansions must already be sized
    /// for the kernel.
    pub fn traverse<K, S>(
        &self,
        target: &mut Octree<T>,
        source: &S,
        kernel: &K,
    ) -> FmmResult<TraversalStats>
    where
        K: Kernel<T = T>,
        S: SourceTree<Scalar = T>,
    {
        let _span = info_span!("traverse", n_images = self.offsets.len()).entered();
        let list = self.interaction_list(target, source);
        let contributions = self.evaluate(target, source, &list, kernel);
        let stats = contributions.apply(target)?;
        debug!(
            n_near = stats.n_near,
            n_far = stats.n_far,
            n_p2p_pairs = stats.n_p2p_pairs,
            "traversal complete"
        );
        Ok(stats)
    }

    /// Traverse a tree against itself.
    pub fn traverse_self<K: Kernel<T = T>>(
        &self,
        tree: &mut Octree<T>,
        kernel: &K,
    ) -> FmmResult<TraversalStats> {
        let _span = info_span!("traverse", n_images = self.offsets.len()).entered();
        let contributions = {
            let tree = &*tree;
            let list = self.interaction_list(tree, tree);
            self.evaluate(tree, tree, &list, kernel)
        };
        let stats = contributions.apply(tree)?;
        debug!(
            n_near = stats.n_near,
            n_far = stats.n_far,
            n_p2p_pairs = stats.n_p2p_pairs,
            "traversal complete"
        );
        Ok(stats)
    }

    /// All pairs summation over the same periodic images as the traversal, accumulated into the targets.
    pub fn direct<K: Kernel<T = T>>(&self, targets: &mut [Body<T>], sources: &[Body<T>], kernel: &K) {
        let chunk = (targets.len() / rayon::current_num_threads()).max(1);
        targets.par_chunks_mut(chunk).for_each(|chunk| {
            let mut potential = vec![T::zero(); chunk.len()];
            let mut field = vec![[T::zero(); 3]; chunk.len()];
            for offset in self.offsets.iter() {
                kernel.p2p(chunk, sources, offset, &mut potential, &mut field);
            }
            for ((body, p), f) in chunk.iter_mut().zip(potential).zip(field) {
                body.potential += p;
                for d in 0..3 {
                    body.field[d] += f[d];
                }
            }
        });
    }
}

impl<T: Scalar> Contributions<T> {
    /// Merge the buffers sequentially into the target tree, returning the traversal counters.
    ///
    /// Local expansions of the target must be sized for the contributed coefficients, merging into
    /// a tree prepared for another kernel is an invariant violation.
    pub fn apply(self, target: &mut Octree<T>) -> FmmResult<TraversalStats> {
        let n = self.locals.first().map(|(_, l)| l.len()).unwrap_or(0);
        if n > 0 && target.locals.len() != target.cells.len() * n {
            return Err(FmmError::InvariantViolation(format!(
                "target holds {} local coefficients for {} cells, contributions carry {n} per cell",
                target.locals.len(),
                target.cells.len()
            )));
        }

        for (t, local) in self.locals {
            for (acc, value) in target.locals[t * n..(t + 1) * n].iter_mut().zip(local) {
                *acc += value;
            }
        }

        for (t, potential, field) in self.near {
            let range = target.cells[t].body_range();
            for ((body, p), f) in target.bodies[range].iter_mut().zip(potential).zip(field) {
                body.potential += p;
                for d in 0..3 {
                    body.field[d] += f[d];
                }
            }
        }

        for (t, n_near, n_far) in self.counts {
            target.cells[t].n_near += n_near;
            target.cells[t].n_far += n_far;
        }

        Ok(self.stats)
    }
}
