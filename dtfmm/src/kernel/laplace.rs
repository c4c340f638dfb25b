//! Laplace kernel
use num_complex::Complex;

use crate::{
    kernel::harmonics::{self, Workspace},
    traits::{general::Scalar, kernel::Kernel},
    tree::types::Body,
};

/// Laplace kernel `q / |x - y|`, with the field given by the gradient of the potential.
///
/// The first component of each body's source is its charge.
#[derive(Clone, Copy, Debug)]
pub struct Laplace3d<T: Scalar> {
    expansion_order: usize,
    eps2: T,
}

impl<T: Scalar> Laplace3d<T> {
    /// Constructor
    ///
    /// # Arguments
    /// * `expansion_order` - Order of multipole and local expansions.
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
}

impl<T: Scalar> Kernel for Laplace3d<T> {
    type T = T;

    fn expansion_order(&self) -> usize {
        self.expansion_order
    }

    fn n_coefficients(&self) -> usize {
        harmonics::n_coefficients(self.expansion_order)
    }

    fn p2m(&self, center: &[T; 3], bodies: &[Body<T>], multipole: &mut [Complex<T>]) {
        harmonics::p2m(
            self.expansion_order,
            center,
            bodies.iter().map(|b| (b.position, b.source[0])),
            multipole,
        )
    }

    fn m2m(
        &self,
        child_center: &[T; 3],
        child: &[Complex<T>],
        parent_center: &[T; 3],
        parent: &mut [Complex<T>],
    ) {
        harmonics::m2m(self.expansion_order, child_center, child, parent_center, parent)
    }

    fn m2l(
        &self,
        source_center: &[T; 3],
        multipole: &[Complex<T>],
        target_center: &[T; 3],
        local: &mut [Complex<T>],
    ) {
        harmonics::m2l(self.expansion_order, source_center, multipole, target_center, local)
    }

    fn l2l(
        &self,
        parent_center: &[T; 3],
        parent: &[Complex<T>],
        child_center: &[T; 3],
        child: &mut [Complex<T>],
    ) {
        harmonics::l2l(self.expansion_order, parent_center, parent, child_center, child)
    }

    fn l2p(
        &self,
        center: &[T; 3],
        local: &[Complex<T>],
        targets: &[Body<T>],
        potential: &mut [T],
        field: &mut [[T; 3]],
    ) {
        let mut ws = Workspace::new(self.expansion_order);
        for (target, (pot, f)) in targets
            .iter()
            .zip(potential.iter_mut().zip(field.iter_mut()))
        {
            let (p, g) = harmonics::l2p(self.expansion_order, &mut ws, center, local, &target.position);
            *pot += p;
            for d in 0..3 {
                f[d] += g[d];
            }
        }
    }

    fn p2p(
        &self,
        targets: &[Body<T>],
        sources: &[Body<T>],
        offset: &[T; 3],
        potential: &mut [T],
        field: &mut [[T; 3]],
    ) {
        for (target, (pot, f)) in targets
            .iter()
            .zip(potential.iter_mut().zip(field.iter_mut()))
        {
            let mut p = T::zero();
            let mut g = [T::zero(); 3];
            for source in sources.iter() {
                let dx = [
                    target.position[0] - source.position[0] - offset[0],
                    target.position[1] - source.position[1] - offset[1],
                    target.position[2] - source.position[2] - offset[2],
                ];
                let r2 = dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2] + self.eps2;
                if r2 != T::zero() {
                    let inv_r2 = T::one() / r2;
                    let inv_r = source.source[0] * inv_r2.sqrt();
                    let inv_r3 = inv_r * inv_r2;
                    p += inv_r;
                    for d in 0..3 {
                        g[d] -= dx[d] * inv_r3;
                    }
                }
            }
            *pot += p;
            for d in 0..3 {
                f[d] += g[d];
            }
        }
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use crate::tree::helpers::{init_bodies, Distribution};

    use super::*;

    #[test]
    fn test_p2p_pair() {
        let kernel = Laplace3d::<f64>::new(4);
        let target = Body {
            position: [1.0, 2.0, 2.0],
            ..Default::default()
        };
        let source = Body {
            source: [2.0, 0.0, 0.0],
            ..Default::default()
        };

        let mut potential = [0.0];
        let mut field = [[0.0; 3]];
        kernel.p2p(&[target], &[source], &[0.0; 3], &mut potential, &mut field);

        assert_relative_eq!(potential[0], 2.0 / 3.0);
        assert_relative_eq!(field[0][0], -2.0 / 27.0);
        assert_relative_eq!(field[0][1], -4.0 / 27.0);
        assert_relative_eq!(field[0][2], -4.0 / 27.0);
    }

    #[test]
    fn test_p2p_skips_self_and_shifts_images() {
        let kernel = Laplace3d::<f64>::new(4);
        let body = Body {
            source: [1.0, 0.0, 0.0],
            ..Default::default()
        };

        let mut potential = [0.0];
        let mut field = [[0.0; 3]];
        kernel.p2p(&[body], &[body], &[0.0; 3], &mut potential, &mut field);
        assert_eq!(potential[0], 0.0);

        kernel.p2p(&[body], &[body], &[2.0, 0.0, 0.0], &mut potential, &mut field);
        assert_relative_eq!(potential[0], 0.5);
        assert_relative_eq!(field[0][0], 0.25);

        let softened = kernel.with_softening(1.0);
        let mut potential = [0.0];
        softened.p2p(&[body], &[body], &[0.0; 3], &mut potential, &mut field);
        assert_relative_eq!(potential[0], 1.0);
    }

    #[test]
    fn test_expansion_matches_direct() {
        let p = 10;
        let kernel = Laplace3d::<f64>::new(p);
        let n = kernel.n_coefficients();
        assert_eq!(n, 55);

        let mut sources = init_bodies::<f64>(50, Distribution::Cube, 0, 0, 1);
        for body in sources.iter_mut() {
            for x in body.position.iter_mut() {
                *x *= 0.05;
            }
        }
        let mut targets = init_bodies::<f64>(20, Distribution::Cube, 1, 0, 1);
        for body in targets.iter_mut() {
            body.position[0] = body.position[0] * 0.05 + 5.0;
            body.position[1] *= 0.05;
            body.position[2] *= 0.05;
        }

        let source_center = [0.0; 3];
        let target_center = [5.0, 0.0, 0.0];
        let mut multipole = vec![Complex::default(); n];
        let mut local = vec![Complex::default(); n];
        kernel.p2m(&source_center, &sources, &mut multipole);
        kernel.m2l(&source_center, &multipole, &target_center, &mut local);

        let mut fmm_potential = vec![0.0; 20];
        let mut fmm_field = vec![[0.0; 3]; 20];
        kernel.l2p(&target_center, &local, &targets, &mut fmm_potential, &mut fmm_field);

        let mut direct_potential = vec![0.0; 20];
        let mut direct_field = vec![[0.0; 3]; 20];
        kernel.p2p(&targets, &sources, &[0.0; 3], &mut direct_potential, &mut direct_field);

        for i in 0..20 {
            assert_relative_eq!(fmm_potential[i], direct_potential[i], epsilon = 1e-8);
            for d in 0..3 {
                assert_relative_eq!(fmm_field[i][d], direct_field[i][d], epsilon = 1e-8);
            }
        }
    }
}
