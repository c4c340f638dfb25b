//! Biot-Savart kernel
use num_complex::Complex;

use crate::{
    kernel::harmonics::{self, Workspace},
    traits::{general::Scalar, kernel::Kernel},
    tree::types::Body,
};

/// Biot-Savart kernel, the velocity induced by vortex particles `u = sum alpha x (x - y) / |x - y|^3`.
///
/// The velocity is the curl of a vector potential whose three components each satisfy the Laplace
/// equation, so expansions hold three Laplace expansions back to back. Potentials are left untouched.
#[derive(Clone, Copy, Debug)]
pub struct BiotSavart3d<T: Scalar> {
    expansion_order: usize,
    eps2: T,
}

impl<T: Scalar> BiotSavart3d<T> {
    /// Constructor
    ///
    /// # Arguments
    /// * `expansion_order` - Order of each of the three Laplace expansions.
    pub fn new(expansion_order: usize) -> Self {
        Self {
            expansion_order,
            eps2: T::zero(),
        }
    }

    /// Add a softening length squared to every direct interaction.
    pub fn with_softening(mut self, eps2: T) -> Self {
        self.eps2 = eps2;
        self
    }

    fn n_scalar(&self) -> usize {
        harmonics::n_coefficients(self.expansion_order)
    }
}

impl<T: Scalar> Kernel for BiotSavart3d<T> {
    type T = T;

    fn expansion_order(&self) -> usize {
        self.expansion_order
    }

    fn n_coefficients(&self) -> usize {
        3 * self.n_scalar()
    }

    fn p2m(&self, center: &[T; 3], bodies: &[Body<T>], multipole: &mut [Complex<T>]) {
        for (d, component) in multipole.chunks_exact_mut(self.n_scalar()).enumerate() {
            harmonics::p2m(
                self.expansion_order,
                center,
                bodies.iter().map(|b| (b.position, b.source[d])),
                component,
            );
        }
    }

    fn m2m(
        &self,
        child_center: &[T; 3],
        child: &[Complex<T>],
        parent_center: &[T; 3],
        parent: &mut [Complex<T>],
    ) {
        let n = self.n_scalar();
        for (c, p) in child.chunks_exact(n).zip(parent.chunks_exact_mut(n)) {
            harmonics::m2m(self.expansion_order, child_center, c, parent_center, p);
        }
    }

    fn m2l(
        &self,
        source_center: &[T; 3],
        multipole: &[Complex<T>],
        target_center: &[T; 3],
        local: &mut [Complex<T>],
    ) {
        let n = self.n_scalar();
        for (m, l) in multipole.chunks_exact(n).zip(local.chunks_exact_mut(n)) {
            harmonics::m2l(self.expansion_order, source_center, m, target_center, l);
        }
    }

    fn l2l(
        &self,
        parent_center: &[T; 3],
        parent: &[Complex<T>],
        child_center: &[T; 3],
        child: &mut [Complex<T>],
    ) {
        let n = self.n_scalar();
        for (p, c) in parent.chunks_exact(n).zip(child.chunks_exact_mut(n)) {
            harmonics::l2l(self.expansion_order, parent_center, p, child_center, c);
        }
    }

    fn l2p(
        &self,
        center: &[T; 3],
        local: &[Complex<T>],
        targets: &[Body<T>],
        _potential: &mut [T],
        field: &mut [[T; 3]],
    ) {
        let n = self.n_scalar();
        let mut ws = Workspace::new(self.expansion_order);
        for (target, f) in targets.iter().zip(field.iter_mut()) {
            let mut gradients = [[T::zero(); 3]; 3];
            for (g, l) in gradients.iter_mut().zip(local.chunks_exact(n)) {
                *g = harmonics::l2p(self.expansion_order, &mut ws, center, l, &target.position).1;
            }
            f[0] += gradients[2][1] - gradients[1][2];
            f[1] += gradients[0][2] - gradients[2][0];
            f[2] += gradients[1][0] - gradients[0][1];
        }
    }

    fn p2p(
        &self,
        targets: &[Body<T>],
        sources: &[Body<T>],
        offset: &[T; 3],
        _potential: &mut [T],
        field: &mut [[T; 3]],
    ) {
        for (target, f) in targets.iter().zip(field.iter_mut()) {
            let mut u = [T::zero(); 3];
            for source in sources.iter() {
                let dx = [
                    target.position[0] - source.position[0] - offset[0],
                    target.position[1] - source.position[1] - offset[1],
                    target.position[2] - source.position[2] - offset[2],
                ];
                let r2 = dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2] + self.eps2;
                if r2 != T::zero() {
                    let inv_r2 = T::one() / r2;
                    let inv_r3 = inv_r2 * inv_r2.sqrt();
                    let a = &source.source;
                    u[0] += (a[1] * dx[2] - a[2] * dx[1]) * inv_r3;
                    u[1] += (a[2] * dx[0] - a[0] * dx[2]) * inv_r3;
                    u[2] += (a[0] * dx[1] - a[1] * dx[0]) * inv_r3;
                }
            }
            for d in 0..3 {
                f[d] += u[d];
            }
        }
    }
}
