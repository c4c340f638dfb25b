//! Crate wide constants

/// Deepest level an octree is refined to, bodies which remain coincident past this level share a leaf.
pub const MAX_LEVEL: u64 = 21;

/// Number of bits used to encode each axis of a Morton key.
pub const MORTON_BITS: u32 = 16;

/// Units in the last place of the largest coordinate tolerated when checking that a cube or body
/// lies inside a cell, so the check holds at every level in both precisions.
pub const GEOMETRY_ULPS: f64 = 64.0;

/// Relative padding applied to the radius of the root cube.
pub const ROOT_PADDING: f64 = 1e-5;

/// Number of children of an octree cell.
pub const NCHILDREN: usize = 8;
