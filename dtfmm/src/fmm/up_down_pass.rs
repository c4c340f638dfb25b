//! Upward and downward passes, each level of which is a parallel loop followed by a barrier
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, info_span};

use crate::{
    fmm::{helpers::optionally_time, types::UpDownPass},
    traits::{
        general::Scalar,
        kernel::Kernel,
        types::{FmmOperatorTime, FmmOperatorType},
    },
    tree::types::Octree,
};

impl<'a, K: Kernel> UpDownPass<'a, K> {
    /// Constructor
    pub fn new(kernel: &'a K, timed: bool) -> Self {
        Self { kernel, timed }
    }

    /// Zero all expansions, then form multipoles from the deepest level up to the root.
    ///
    /// Leaves are formed with P2M, internal cells with M2M from their children, which live at the
    /// next level and so are complete once that level has finished.
    pub fn upward_pass(&self, tree: &mut Octree<K::T>) -> Vec<FmmOperatorTime> {
        let _span = info_span!("upward_pass", n_cells = tree.cells.len()).entered();

        let n = self.kernel.n_coefficients();
        tree.reset_expansions(n);

        let kernel = self.kernel;
        let Octree {
            cells,
            bodies,
            levels,
            multipoles,
            ..
        } = tree;
        let (cells, bodies) = (&*cells, &*bodies);

        let mut times = Vec::new();
        let mut p2m_time = Duration::ZERO;

        for (level, range) in levels.iter().enumerate().rev() {
            let (head, children) = multipoles.split_at_mut(range.end * n);
            let current = &mut head[range.start * n..];
            let level_cells = &cells[range.clone()];

            let (_, duration) = optionally_time(self.timed, || {
                current
                    .par_chunks_mut(n)
                    .zip(level_cells.par_iter())
                    .filter(|(_, cell)| cell.is_leaf())
                    .for_each(|(multipole, cell)| {
                        kernel.p2m(&cell.center, &bodies[cell.body_range()], multipole)
                    });
            });
            if let Some(d) = duration {
                p2m_time += d;
            }

            let children = &*children;
            let first_child = range.end;
            let (_, duration) = optionally_time(self.timed, || {
                current
                    .par_chunks_mut(n)
                    .zip(level_cells.par_iter())
                    .filter(|(_, cell)| !cell.is_leaf())
                    .for_each(|(multipole, cell)| {
                        for c in cell.children() {
                            let offset = (c - first_child) * n;
                            kernel.m2m(
                                &cells[c].center,
                                &children[offset..offset + n],
                                &cell.center,
                                multipole,
                            );
                        }
                    });
            });
            if let Some(d) = duration {
                times.push(FmmOperatorTime::from_duration(
                    FmmOperatorType::M2M(level as u64),
                    d,
                ));
            }
        }

        if self.timed {
            times.push(FmmOperatorTime::from_duration(FmmOperatorType::P2M, p2m_time));
        }

        debug!(levels = levels.len(), "upward pass complete");
        times
    }

    /// Translate local expansions from the root down to the leaves, evaluate them at the bodies, and
    /// record cost weights from the interaction counters of the last traversal.
    pub fn downward_pass(&self, tree: &mut Octree<K::T>) -> Vec<FmmOperatorTime> {
        let _span = info_span!("downward_pass", n_cells = tree.cells.len()).entered();

        let n = self.kernel.n_coefficients();
        let kernel = self.kernel;
        let mut times = Vec::new();

        {
            let Octree {
                cells,
                levels,
                locals,
                ..
            } = &mut *tree;
            let cells = &*cells;

            for (level, range) in levels.iter().enumerate().skip(1) {
                let (parents, tail) = locals.split_at_mut(range.start * n);
                let current = &mut tail[..range.len() * n];
                let parents = &*parents;
                let level_cells = &cells[range.clone()];

                let (_, duration) = optionally_time(self.timed, || {
                    current
                        .par_chunks_mut(n)
                        .zip(level_cells.par_iter())
                        .for_each(|(local, cell)| {
                            let parent = &cells[cell.parent];
                            kernel.l2l(
                                &parent.center,
                                &parents[cell.parent * n..(cell.parent + 1) * n],
                                &cell.center,
                                local,
                            )
                        });
                });
                if let Some(d) = duration {
                    times.push(FmmOperatorTime::from_duration(
                        FmmOperatorType::L2L(level as u64),
                        d,
                    ));
                }
            }
        }

        let (_, duration) = optionally_time(self.timed, || evaluate_leaves(kernel, tree));
        if let Some(d) = duration {
            times.push(FmmOperatorTime::from_duration(FmmOperatorType::L2P, d));
        }

        set_weights(tree);

        debug!("downward pass complete");
        times
    }
}

/// L2P into per leaf buffers, merged sequentially into the bodies.
fn evaluate_leaves<T: Scalar, K: Kernel<T = T>>(kernel: &K, tree: &mut Octree<T>) {
    let leaves = tree.leaves().filter(|&l| tree.cells[l].n_bodies > 0).collect::<Vec<_>>();

    let tree_ref = &*tree;
    let results = leaves
        .par_iter()
        .map(|&leaf| {
            let cell = &tree_ref.cells[leaf];
            let targets = tree_ref.bodies_of(leaf);
            let mut potential = vec![T::zero(); targets.len()];
            let mut field = vec![[T::zero(); 3]; targets.len()];
            kernel.l2p(
                &cell.center,
                tree_ref.local(leaf),
                targets,
                &mut potential,
                &mut field,
            );
            (leaf, potential, field)
        })
        .collect::<Vec<_>>();

    for (leaf, potential, field) in results {
        let range = tree.cells[leaf].body_range();
        for ((body, p), f) in tree.bodies[range].iter_mut().zip(potential).zip(field) {
            body.potential += p;
            for d in 0..3 {
                body.field[d] += f[d];
            }
        }
    }
}

/// Cell weights count the interactions of the last traversal, bodies take the weight of their leaf.
fn set_weights<T: Scalar>(tree: &mut Octree<T>) {
    for cell in tree.cells.iter_mut() {
        cell.weight = T::of((cell.n_near + cell.n_far) as f64);
    }
    let Octree { cells, bodies, .. } = tree;
    for cell in cells.iter().filter(|c| c.is_leaf()) {
        for body in bodies[cell.body_range()].iter_mut() {
            body.weight = cell.weight;
        }
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use num_complex::Complex;

    use crate::{
        kernel::Laplace3d,
        tree::{
            builder::OctreeBuilder,
            helpers::{init_bodies, Distribution},
            types::Bounds,
        },
        traits::tree::SourceTree,
    };

    use super::*;

    fn monopole(multipole: &[Complex<f64>]) -> f64 {
        multipole[0].re
    }

    fn fixture(n: usize) -> Octree<f64> {
        let mut bodies = init_bodies::<f64>(n, Distribution::Plummer, 0, 0, 1);
        let mut buffer = bodies.clone();
        let bounds = Bounds::from_bodies(&bodies);
        OctreeBuilder::new(16, 1000)
            .build(&mut bodies, &mut buffer, &bounds)
            .unwrap()
    }

    #[test]
    fn test_upward_pass_conserves_charge() {
        let mut tree = fixture(800);
        let kernel = Laplace3d::<f64>::new(6);
        let times = UpDownPass::new(&kernel, true).upward_pass(&mut tree);

        let total: f64 = tree.bodies.iter().map(|b| b.source[0]).sum();
        assert_relative_eq!(monopole(tree.multipole(0)), total, epsilon = 1e-12);

        for (i, cell) in tree.cells.iter().enumerate() {
            let charge: f64 = tree.bodies_of(i).iter().map(|b| b.source[0]).sum();
            assert_relative_eq!(monopole(tree.multipole(i)), charge, epsilon = 1e-12);
            if !cell.is_leaf() {
                let children: f64 = cell.children().map(|c| monopole(tree.multipole(c))).sum();
                assert_relative_eq!(monopole(tree.multipole(i)), children, epsilon = 1e-12);
            }
        }

        assert!(times.iter().any(|t| t.operator == FmmOperatorType::P2M));
        assert_eq!(times.len(), tree.depth() + 1);
    }

    #[test]
    fn test_downward_pass_evaluates_root_local() {
        // A constant local expansion at the root reaches every body unchanged.
        let mut tree = fixture(300);
        let kernel = Laplace3d::<f64>::new(4);
        let pass = UpDownPass::new(&kernel, false);
        pass.upward_pass(&mut tree);
        tree.locals[0] = Complex::new(2.5, 0.0);
        tree.cells[0].n_far = 3;

        let times = pass.downward_pass(&mut tree);
        assert!(times.is_empty());
        for body in tree.bodies.iter() {
            assert_relative_eq!(body.potential, 2.5, epsilon = 1e-12);
            for d in 0..3 {
                assert!(body.field[d].abs() < 1e-12);
            }
        }
        assert_eq!(tree.cells[0].weight, 3.0);
    }
}
