//! Data structures for bodies, cells and octrees
use std::ops::Range;

use num_complex::Complex;

use crate::traits::general::Scalar;

/// A body, holding its position, source strength and the potential and field accumulated at it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Body<T: Scalar> {
    /// Physical position.
    pub position: [T; 3],

    /// Source strength. Scalar kernels read the first component as a charge, vector kernels
    /// use all three.
    pub source: [T; 3],

    /// Accumulated potential.
    pub potential: T,

    /// Accumulated field, the gradient of the potential for the Laplace kernel and the velocity
    /// for the Biot-Savart kernel.
    pub field: [T; 3],

    /// Global identifier, preserved across reordering and redistribution.
    pub index: usize,

    /// Cost weight used when partitioning bodies between ranks.
    pub weight: T,
}

/// A cell of an octree, stored in an index arena.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cell<T: Scalar> {
    /// Center of the cube.
    pub center: [T; 3],

    /// Half side length of the cube.
    pub radius: T,

    /// Level in the tree, the root being at level 0.
    pub level: u64,

    /// Index of the parent cell, the root is its own parent.
    pub parent: usize,

    /// Index of the first child, children are contiguous.
    pub child_begin: usize,

    /// Number of children, zero for leaves.
    pub n_children: usize,

    /// Index of the first body contained in this cell.
    pub body_begin: usize,

    /// Number of bodies contained in this cell, including those of all descendants.
    pub n_bodies: usize,

    /// Cost weight, the number of interactions recorded for this cell by the last traversal.
    pub weight: T,

    /// Number of near field (P2P) interactions with this cell as target.
    pub n_near: usize,

    /// Number of far field (M2L) interactions with this cell as target.
    pub n_far: usize,
}

/// Axis aligned bounding box.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds<T: Scalar> {
    /// Component wise minimum.
    pub min: [T; 3],

    /// Component wise maximum.
    pub max: [T; 3],
}

/// An adaptive octree, its reordered bodies, and the expansions associated with its cells.
#[derive(Clone, Debug, Default)]
pub struct Octree<T: Scalar> {
    /// Cells in breadth first order, root at index 0.
    pub cells: Vec<Cell<T>>,

    /// Bodies, sorted so that each cell owns a contiguous range.
    pub bodies: Vec<Body<T>>,

    /// Range of cell indices at each level.
    pub levels: Vec<Range<usize>>,

    /// Multipole coefficients, `n_coefficients` per cell.
    pub multipoles: Vec<Complex<T>>,

    /// Local coefficients, `n_coefficients` per cell.
    pub locals: Vec<Complex<T>>,

    /// Number of coefficients stored per cell.
    pub n_coefficients: usize,
}

/// Summary statistics of an octree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Total number of cells.
    pub n_cells: usize,

    /// Number of leaves.
    pub n_leaves: usize,

    /// Number of levels, including the root level.
    pub depth: usize,

    /// Number of bodies.
    pub n_bodies: usize,

    /// Largest number of bodies held by a single leaf.
    pub max_leaf_bodies: usize,
}
