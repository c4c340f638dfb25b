//! Implementation of octree accessors and structural checks
use num_complex::Complex;

use crate::{
    traits::{
        general::Scalar,
        tree::SourceTree,
        types::{FmmError, FmmResult},
    },
    tree::{
        constants::GEOMETRY_ULPS,
        types::{Body, Cell, Octree, TreeStats},
    },
};

impl<T: Scalar> Cell<T> {
    /// Whether this cell has no children.
    pub fn is_leaf(&self) -> bool {
        self.n_children == 0
    }

    /// Whether a cube of given center and half side lies inside this cell, up to the rounding of
    /// the coordinates involved.
    pub fn encloses(&self, center: &[T; 3], radius: T) -> bool {
        let extent = self
            .center
            .iter()
            .chain(center.iter())
            .fold(self.radius, |m, c| m.max(c.abs() + self.radius));
        let bound = self.radius + T::epsilon() * T::of(GEOMETRY_ULPS) * extent;
        (0..3).all(|d| (center[d] - self.center[d]).abs() + radius <= bound)
    }

    /// Range of child indices in the cell arena.
    pub fn children(&self) -> std::ops::Range<usize> {
        self.child_begin..self.child_begin + self.n_children
    }

    /// Range of body indices owned by this cell.
    pub fn body_range(&self) -> std::ops::Range<usize> {
        self.body_begin..self.body_begin + self.n_bodies
    }
}

impl<T: Scalar> Octree<T> {
    /// Indices of all leaf cells.
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_leaf())
            .map(|(i, _)| i)
    }

    /// Depth of the tree, the number of levels including the root.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Allocate zeroed multipole and local expansions.
    ///
    /// # Arguments
    /// * `n_coefficients` - Number of coefficients per cell.
    pub fn reset_expansions(&mut self, n_coefficients: usize) {
        let n = self.cells.len() * n_coefficients;
        self.n_coefficients = n_coefficients;
        self.multipoles.clear();
        self.multipoles.resize(n, Complex::default());
        self.locals.clear();
        self.locals.resize(n, Complex::default());
    }

    /// Zero the interaction counters of every cell.
    pub fn reset_counters(&mut self) {
        for cell in self.cells.iter_mut() {
            cell.n_near = 0;
            cell.n_far = 0;
        }
    }

    /// Local coefficients of a cell.
    pub fn local(&self, cell: usize) -> &[Complex<T>] {
        &self.locals[cell * self.n_coefficients..(cell + 1) * self.n_coefficients]
    }

    /// Bodies owned by a cell.
    pub fn bodies_of(&self, cell: usize) -> &[Body<T>] {
        &self.bodies[self.cells[cell].body_range()]
    }

    /// Summary statistics.
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            n_cells: self.cells.len(),
            depth: self.depth(),
            n_bodies: self.bodies.len(),
            ..Default::default()
        };
        for cell in self.cells.iter().filter(|c| c.is_leaf()) {
            stats.n_leaves += 1;
            stats.max_leaf_bodies = stats.max_leaf_bodies.max(cell.n_bodies);
        }
        stats
    }

    /// Check the structural invariants of the tree.
    ///
    /// Every body must belong to exactly one leaf, children must be contiguous, one level deeper,
    /// and geometrically nested inside their parent, and internal cells must own the union of their
    /// children's bodies.
    pub fn check_invariants(&self) -> FmmResult<()> {
        let fail = |msg: String| Err(FmmError::InvariantViolation(msg));

        if self.cells.is_empty() {
            return fail("tree has no root cell".to_string());
        }
        if self.levels.first().map(|r| r.start) != Some(0)
            || self.levels.last().map(|r| r.end) != Some(self.cells.len())
        {
            return fail("level ranges do not cover the cell arena".to_string());
        }

        let mut leaf_ranges = Vec::new();

        for (i, cell) in self.cells.iter().enumerate() {
            if !(cell.radius >= T::zero()) {
                return fail(format!("cell {i} has negative radius"));
            }
            if cell.body_begin + cell.n_bodies > self.bodies.len() {
                return fail(format!("cell {i} body range exceeds body count"));
            }

            if cell.is_leaf() {
                leaf_ranges.push(cell.body_range());
                continue;
            }

            if cell.child_begin <= i || cell.child_begin + cell.n_children > self.cells.len() {
                return fail(format!("cell {i} has children outside the arena"));
            }

            let mut next = cell.body_begin;
            for c in cell.children() {
                let child = &self.cells[c];
                if child.parent != i || child.level != cell.level + 1 {
                    return fail(format!("cell {c} is not a direct child of {i}"));
                }
                if child.body_begin != next {
                    return fail(format!("children of cell {i} own non contiguous bodies"));
                }
                next += child.n_bodies;

                if !cell.encloses(&child.center, child.radius) {
                    return fail(format!("cell {c} extends outside its parent {i}"));
                }
            }
            if next != cell.body_begin + cell.n_bodies {
                return fail(format!("children of cell {i} do not own all its bodies"));
            }
        }

        leaf_ranges.sort_by_key(|r| r.start);
        let mut next = 0;
        for range in leaf_ranges.iter().filter(|r| !r.is_empty()) {
            if range.start != next {
                return fail("leaf body ranges overlap or leave gaps".to_string());
            }
            next = range.end;
        }
        if next != self.bodies.len() {
            return fail(format!(
                "leaves own {next} bodies, tree holds {}",
                self.bodies.len()
            ));
        }

        Ok(())
    }
}

impl<T: Scalar> SourceTree for Octree<T> {
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
}

#[cfg(test)]
mod test {
    use crate::tree::{
        builder::OctreeBuilder,
        helpers::{init_bodies, Distribution},
        types::Bounds,
    };

    use super::*;

    fn fixture() -> Octree<f64> {
        let mut bodies = init_bodies::<f64>(500, Distribution::Cube, 0, 0, 1);
        let mut buffer = bodies.clone();
        let bounds = Bounds::from_bodies(&bodies);
        OctreeBuilder::new(8, 1000)
            .build(&mut bodies, &mut buffer, &bounds)
            .unwrap()
    }

    #[test]
    fn test_stats() {
        let tree = fixture();
        let stats = tree.stats();
        assert_eq!(stats.n_cells, tree.cells.len());
        assert_eq!(stats.n_leaves, tree.leaves().count());
        assert_eq!(stats.n_bodies, 500);
        assert!(stats.max_leaf_bodies <= 8);
        assert!(stats.depth > 2);
    }

    #[test]
    fn test_detects_broken_trees() {
        let mut tree = fixture();
        tree.cells[1].radius = -1.0;
        assert!(matches!(
            tree.check_invariants(),
            Err(FmmError::InvariantViolation(_))
        ));

        let mut tree = fixture();
        let last = tree.cells.len() - 1;
        tree.cells[last].n_bodies += 1;
        assert!(tree.check_invariants().is_err());

        let mut tree = fixture();
        tree.cells[1].center[0] += 10.0;
        assert!(tree.check_invariants().is_err());

        let mut tree = fixture();
        tree.bodies.pop();
        assert!(tree.check_invariants().is_err());
    }

    #[test]
    fn test_deep_single_precision_tree() {
        // Plummer bodies refine far past the depth where a fixed relative tolerance holds in f32.
        let mut bodies = init_bodies::<f32>(4000, Distribution::Plummer, 3, 0, 1);
        let mut buffer = bodies.clone();
        let bounds = Bounds::from_bodies(&bodies);
        let tree = OctreeBuilder::new(2, 1000)
            .build(&mut bodies, &mut buffer, &bounds)
            .unwrap();
        assert!(tree.stats().depth > 6);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_encloses() {
        let cell = Cell::<f32> {
            center: [1000.0, 0.0, 0.0],
            radius: 1e-3,
            ..Default::default()
        };
        // Coordinate spacing near 1000 in f32 is a sizeable fraction of the half side.
        assert!(cell.encloses(&[1000.0 + 5e-4, 0.0, 0.0], 5e-4));
        assert!(!cell.encloses(&[1000.0 + 0.25, 0.0, 0.0], 5e-4));
        assert!(cell.encloses(&[1000.0, 1e-3, -1e-3], 0.0));
    }

    #[test]
    fn test_reset_expansions() {
        let mut tree = fixture();
        tree.reset_expansions(55);
        assert_eq!(tree.multipoles.len(), tree.cells.len() * 55);
        assert_eq!(tree.locals.len(), tree.cells.len() * 55);
        assert_eq!(tree.multipole(3).len(), 55);
        assert!(tree.local(3).iter().all(|c| *c == Complex::default()));
    }
}
