//! Tree Traits
use num_complex::Complex;

use crate::{
    traits::general::Scalar,
    tree::types::{Body, Cell},
};

/// Read only view of a tree that can act as the source side of a traversal.
///
/// Implemented by local octrees and by local essential trees received from other ranks.
pub trait SourceTree: Sync {
    /// Scalar type
    type Scalar: Scalar;

    /// Cell arena, root at index 0.
    fn cells(&self) -> &[Cell<Self::Scalar>];

    /// Bodies, indexed by the body ranges of the cells.
    fn bodies(&self) -> &[Body<Self::Scalar>];

    /// Multipole coefficients of a cell.
    ///
    /// # Arguments
    /// * `cell` - Index of the cell in the arena.
    fn multipole(&self, cell: usize) -> &[Complex<Self::Scalar>];

    /// Whether the data needed to descend into a cell is available. For an internal cell this is
    /// its children, for a leaf its bodies.
    ///
    /// # Arguments
    /// * `cell` - Index of the cell in the arena.
    fn resolved(&self, _cell: usize) -> bool {
        true
    }

    /// Bodies contained in a cell.
    fn cell_bodies(&self, cell: usize) -> &[Body<Self::Scalar>] {
        let c = &self.cells()[cell];
        &self.bodies()[c.body_begin..c.body_begin + c.n_bodies]
    }
}
