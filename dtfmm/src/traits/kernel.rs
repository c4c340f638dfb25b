//! Kernel capability
use num_complex::Complex;

use crate::{traits::general::Scalar, tree::types::Body};

/// Interface for the field translations of an expansion based kernel.
///
/// Expansion order and kernel constants are fixed at construction, every translation works on
/// flat coefficient slices of length `n_coefficients`. Source centers passed to `m2l` and offsets
/// passed to `p2p` already account for the periodic image being evaluated.
pub trait Kernel: Send + Sync {
    /// Floating point type of bodies and expansions.
    type T: Scalar;

    /// Expansion order of multipole and local expansions.
    fn expansion_order(&self) -> usize;

    /// Number of complex coefficients stored per cell, for each of multipole and local expansions.
    fn n_coefficients(&self) -> usize;

    /// Particle to multipole translation.
    ///
    /// # Arguments
    /// * `center` - Center of the expansion.
    /// * `bodies` - Source bodies contained in the cell.
    /// * `multipole` - Multipole coefficients, accumulated into.
    fn p2m(&self, center: &[Self::T; 3], bodies: &[Body<Self::T>], multipole: &mut [Complex<Self::T>]);

    /// Multipole to multipole translation, from a child into its parent.
    ///
    /// # Arguments
    /// * `child_center` - Center of the child expansion.
    /// * `child` - Child multipole coefficients.
    /// * `parent_center` - Center of the parent expansion.
    /// * `parent` - Parent multipole coefficients, accumulated into.
    fn m2m(
        &self,
        child_center: &[Self::T; 3],
        child: &[Complex<Self::T>],
        parent_center: &[Self::T; 3],
        parent: &mut [Complex<Self::T>],
    );

    /// Multipole to local translation.
    ///
    /// # Arguments
    /// * `source_center` - Center of the source multipole, shifted by its periodic image offset.
    /// * `multipole` - Source multipole coefficients.
    /// * `target_center` - Center of the target local expansion.
    /// * `local` - Target local coefficients, accumulated into.
    fn m2l(
        &self,
        source_center: &[Self::T; 3],
        multipole: &[Complex<Self::T>],
        target_center: &[Self::T; 3],
        local: &mut [Complex<Self::T>],
    );

    /// Local to local translation, from a parent into one of its children.
    fn l2l(
        &self,
        parent_center: &[Self::T; 3],
        parent: &[Complex<Self::T>],
        child_center: &[Self::T; 3],
        child: &mut [Complex<Self::T>],
    );

    /// Local to particle translation.
    ///
    /// # Arguments
    /// * `center` - Center of the local expansion.
    /// * `local` - Local coefficients.
    /// * `targets` - Target bodies contained in the cell.
    /// * `potential` - One potential per target, accumulated into.
    /// * `field` - One field vector per target, accumulated into.
    fn l2p(
        &self,
        center: &[Self::T; 3],
        local: &[Complex<Self::T>],
        targets: &[Body<Self::T>],
        potential: &mut [Self::T],
        field: &mut [[Self::T; 3]],
    );

    /// Direct particle to particle interaction.
    ///
    /// # Arguments
    /// * `targets` - Target bodies.
    /// * `sources` - Source bodies.
    /// * `offset` - Periodic image offset added to every source position.
    /// * `potential` - One potential per target, accumulated into.
    /// * `field` - One field vector per target, accumulated into.
    fn p2p(
        &self,
        targets: &[Body<Self::T>],
        sources: &[Body<Self::T>],
        offset: &[Self::T; 3],
        potential: &mut [Self::T],
        field: &mut [[Self::T; 3]],
    );
}
