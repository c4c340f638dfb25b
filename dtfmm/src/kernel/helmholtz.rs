//! Helmholtz kernel
//!
//! Expansions are in spherical Hankel functions (multipole) and spherical Bessel functions (local)
//! times orthonormal spherical harmonics, `p^2` coefficients indexed by `n^2 + n + m`. Translations
//! re-expand a field sampled on a sphere, Gauss-Legendre in the polar angle and trapezoidal in
//! the azimuth, which is exact for every degree below the expansion order.
//!
//! Multipoles are re-expanded on a sphere of six times the shift, locals on a sphere of `0.4`
//! times the separation for M2L and of the shift for L2L. Local re-expansion spheres must enclose
//! the target cell, which holds for every pair admitted with `theta <= 0.4`.
//!
//! Special functions are evaluated in double precision whatever the body precision.
use std::f64::consts::PI;

use num_complex::Complex;

use crate::{
    kernel::harmonics::{cart2sph, sph2cart},
    traits::{general::Scalar, kernel::Kernel},
    tree::types::Body,
};

/// Helmholtz kernel `q cos(k |x - y|) / |x - y|`, with the field given by the gradient of the
/// potential.
///
/// The potential is the real part of the outgoing Green's function `exp(i k r) / r` for real
/// charges. The first component of each body's source is its charge.
///
/// Translation radii are capped at `2 / k`, accuracy degrades once cell radii grow much beyond
/// that, so the wavenumber should keep leaf and interacting cells below a few wavelengths.
#[derive(Clone, Copy, Debug)]
pub struct Helmholtz3d<T: Scalar> {
    expansion_order: usize,
    wavenumber: T,
    eps2: T,
}

impl<T: Scalar> Helmholtz3d<T> {
    /// Constructor
    ///
    /// # Arguments
    /// * `expansion_order` - Order of multipole and local expansions.
    /// * `wavenumber` - Real, positive wavenumber `k`.
    pub fn new(expansion_order: usize, wavenumber: T) -> Self {
        Self {
            expansion_order,
            wavenumber,
            eps2: T::zero(),
        }
    }

    /// Add a softening length squared to every direct interaction.
    pub fn with_softening(mut self, eps2: T) -> Self {
        self.eps2 = eps2;
        self
    }

    /// Wavenumber of the kernel.
    pub fn wavenumber(&self) -> T {
        self.wavenumber
    }

    fn k(&self) -> f64 {
        self.wavenumber.as_f64()
    }

    fn radius_cap(&self) -> f64 {
        2.0 / self.k()
    }
}

fn to_f64<T: Scalar>(x: &[T; 3]) -> [f64; 3] {
    [x[0].as_f64(), x[1].as_f64(), x[2].as_f64()]
}

fn widen<T: Scalar>(c: &Complex<T>) -> Complex<f64> {
    Complex::new(c.re.as_f64(), c.im.as_f64())
}

fn narrow<T: Scalar>(c: Complex<f64>) -> Complex<T> {
    Complex::new(T::of(c.re), T::of(c.im))
}

/// Spherical Bessel functions of the first kind `j_n(x)` for `n < out.len()`, `x >= 0`.
///
/// Miller's downward recurrence, normalized against whichever of `j_0` and `j_1` is larger.
fn bessel_j(x: f64, out: &mut [f64]) {
    let p = out.len();
    out.fill(0.0);
    if p == 0 {
        return;
    }
    if x == 0.0 {
        out[0] = 1.0;
        return;
    }

    let start = p + 20 + x as usize;
    let mut f_next = 0.0;
    let mut f = 1e-30;
    let mut f1 = 0.0;
    for n in (1..=start).rev() {
        let f_prev = (2 * n + 1) as f64 / x * f - f_next;
        f_next = f;
        f = f_prev;
        if n == 2 {
            f1 = f;
        }
        if n - 1 < p {
            out[n - 1] = f;
        }
        if f.abs() > 1e250 {
            f /= 1e250;
            f_next /= 1e250;
            f1 /= 1e250;
            out.iter_mut().for_each(|v| *v /= 1e250);
        }
    }

    let (s, c) = x.sin_cos();
    let j0 = s / x;
    let j1 = s / (x * x) - c / x;
    let scale = if j0.abs() >= j1.abs() { j0 / f } else { j1 / f1 };
    out.iter_mut().for_each(|v| *v *= scale);
}

/// Spherical Bessel functions of the second kind `y_n(x)` for `n < out.len()`, `x > 0`.
fn bessel_y(x: f64, out: &mut [f64]) {
    let p = out.len();
    if p == 0 {
        return;
    }
    let (s, c) = x.sin_cos();
    out[0] = -c / x;
    if p > 1 {
        out[1] = -c / (x * x) - s / x;
    }
    for n in 1..p.saturating_sub(1) {
        out[n + 1] = (2 * n + 1) as f64 / x * out[n] - out[n - 1];
    }
}

/// Spherical Hankel functions of the first kind `h_n(x) = j_n(x) + i y_n(x)`, `x > 0`.
fn hankel(x: f64, out: &mut [Complex<f64>]) {
    let p = out.len();
    let mut j = vec![0.0; p];
    let mut y = vec![0.0; p];
    bessel_j(x, &mut j);
    bessel_y(x, &mut y);
    for n in 0..p {
        out[n] = Complex::new(j[n], y[n]);
    }
}

/// Orthonormal spherical harmonics `Y_n^m(theta, phi)` for `n < p`, indexed `n^2 + n + m`, and
/// their theta derivatives. `Y_n^{-m}` is the conjugate of `Y_n^m`.
fn spherical_harmonics(
    p: usize,
    theta: f64,
    phi: f64,
    ynm: &mut [Complex<f64>],
    ynm_theta: &mut [Complex<f64>],
) {
    let (s, x) = theta.sin_cos();
    let idx = |n: usize, m: usize| n * (n + 1) / 2 + m;

    // Normalized associated Legendre functions including the Condon-Shortley phase.
    let mut pnm = vec![0.0; p * (p + 1) / 2];
    let mut pmm = (0.25 / PI).sqrt();
    for m in 0..p {
        if m > 0 {
            pmm *= -((2 * m + 1) as f64 / (2 * m) as f64).sqrt() * s;
        }
        pnm[idx(m, m)] = pmm;
        if m + 1 < p {
            pnm[idx(m + 1, m)] = ((2 * m + 3) as f64).sqrt() * x * pmm;
        }
        for n in m + 2..p {
            let (nf, mf) = (n as f64, m as f64);
            let a = ((4.0 * nf * nf - 1.0) / (nf * nf - mf * mf)).sqrt();
            let b = (((nf - 1.0) * (nf - 1.0) - mf * mf) / (4.0 * (nf - 1.0) * (nf - 1.0) - 1.0))
                .sqrt();
            pnm[idx(n, m)] = a * (x * pnm[idx(n - 1, m)] - b * pnm[idx(n - 2, m)]);
        }
    }

    for n in 0..p {
        let nf = n as f64;
        for m in 0..=n {
            let mf = m as f64;
            let above = if m < n { pnm[idx(n, m + 1)] } else { 0.0 };
            let dp = if m == 0 {
                (nf * (nf + 1.0)).sqrt() * above
            } else {
                0.5 * (((nf - mf) * (nf + mf + 1.0)).sqrt() * above
                    - ((nf + mf) * (nf - mf + 1.0)).sqrt() * pnm[idx(n, m - 1)])
            };
            let eim = Complex::from_polar(1.0, mf * phi);
            let y = eim * pnm[idx(n, m)];
            let dy = eim * dp;
            ynm[n * n + n + m] = y;
            ynm[n * n + n - m] = y.conj();
            ynm_theta[n * n + n + m] = dy;
            ynm_theta[n * n + n - m] = dy.conj();
        }
    }
}

/// Gauss-Legendre nodes and weights on `[-1, 1]`.
fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    for i in 0..n {
        let mut z = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp = 1.0;
        for _ in 0..100 {
            let mut p0 = 1.0;
            let mut p1 = 0.0;
            for j in 0..n {
                let p2 = p1;
                p1 = p0;
                p0 = ((2 * j + 1) as f64 * z * p1 - j as f64 * p2) / (j + 1) as f64;
            }
            dp = n as f64 * (z * p0 - p1) / (z * z - 1.0);
            let dz = p0 / dp;
            z -= dz;
            if dz.abs() < 1e-15 {
                break;
            }
        }
        nodes[i] = z;
        weights[i] = 2.0 / ((1.0 - z * z) * dp * dp);
    }
    (nodes, weights)
}

/// Quadrature on the unit sphere with the harmonics of every node tabulated.
struct SphereRule {
    directions: Vec<[f64; 3]>,
    weights: Vec<f64>,
    ynm: Vec<Complex<f64>>,
    n_harmonics: usize,
}

impl SphereRule {
    fn new(p: usize) -> Self {
        let n_theta = p + 1;
        let n_phi = 2 * p + 2;
        let n_harmonics = p * p;
        let (nodes, gl_weights) = gauss_legendre(n_theta);
        let n_points = n_theta * n_phi;

        let mut directions = Vec::with_capacity(n_points);
        let mut weights = Vec::with_capacity(n_points);
        let mut ynm = vec![Complex::default(); n_points * n_harmonics];
        let mut ynm_theta = vec![Complex::default(); n_harmonics];

        let dphi = 2.0 * PI / n_phi as f64;
        for (z, w) in nodes.iter().zip(gl_weights.iter()) {
            let theta = z.max(-1.0).min(1.0).acos();
            let s = theta.sin();
            for j in 0..n_phi {
                let phi = j as f64 * dphi;
                let k = directions.len();
                spherical_harmonics(
                    p,
                    theta,
                    phi,
                    &mut ynm[k * n_harmonics..(k + 1) * n_harmonics],
                    &mut ynm_theta,
                );
                directions.push([s * phi.cos(), s * phi.sin(), *z]);
                weights.push(w * dphi);
            }
        }

        Self {
            directions,
            weights,
            ynm,
            n_harmonics,
        }
    }

    fn harmonics(&self, point: usize) -> &[Complex<f64>] {
        &self.ynm[point * self.n_harmonics..(point + 1) * self.n_harmonics]
    }

    /// Expand `field`, sampled on the sphere of `radius` about `center`, in the basis whose radial
    /// part at `radius` is `radial[n]`, accumulating into `out`.
    fn reexpand<T: Scalar>(
        &self,
        p: usize,
        center: &[f64; 3],
        radius: f64,
        radial: &[Complex<f64>],
        field: impl Fn(&[f64; 3]) -> Complex<f64>,
        out: &mut [Complex<T>],
    ) {
        let mut acc = vec![Complex::<f64>::default(); self.n_harmonics];
        for (q, (direction, weight)) in self.directions.iter().zip(self.weights.iter()).enumerate() {
            let point = [
                center[0] + radius * direction[0],
                center[1] + radius * direction[1],
                center[2] + radius * direction[2],
            ];
            let value = field(&point) * *weight;
            for (a, y) in acc.iter_mut().zip(self.harmonics(q).iter()) {
                *a += value * y.conj();
            }
        }
        // Degrees whose radial function underflows carry no recoverable information.
        for n in (0..p).filter(|&n| radial[n].norm_sqr() > 0.0) {
            for m in 0..2 * n + 1 {
                let nm = n * n + m;
                out[nm] += narrow::<T>(acc[nm] / radial[n]);
            }
        }
    }
}

/// Multipole field `sum M_n^m h_n(kr) Y_n^m` at `point`.
fn eval_multipole<T: Scalar>(
    p: usize,
    k: f64,
    center: &[f64; 3],
    multipole: &[Complex<T>],
    point: &[f64; 3],
) -> Complex<f64> {
    let dx = [point[0] - center[0], point[1] - center[1], point[2] - center[2]];
    let (r, theta, phi) = cart2sph(&dx);
    let mut h = vec![Complex::default(); p];
    let mut ynm = vec![Complex::default(); p * p];
    let mut ynm_theta = vec![Complex::default(); p * p];
    hankel(k * r, &mut h);
    spherical_harmonics(p, theta, phi, &mut ynm, &mut ynm_theta);

    let mut value = Complex::default();
    for n in 0..p {
        for m in 0..2 * n + 1 {
            let nm = n * n + m;
            value += widen(&multipole[nm]) * h[n] * ynm[nm];
        }
    }
    value
}

/// Local field `sum L_n^m j_n(kr) Y_n^m` at `point`.
fn eval_local<T: Scalar>(
    p: usize,
    k: f64,
    center: &[f64; 3],
    local: &[Complex<T>],
    point: &[f64; 3],
) -> Complex<f64> {
    let dx = [point[0] - center[0], point[1] - center[1], point[2] - center[2]];
    let (r, theta, phi) = cart2sph(&dx);
    let mut j = vec![0.0; p];
    let mut ynm = vec![Complex::default(); p * p];
    let mut ynm_theta = vec![Complex::default(); p * p];
    bessel_j(k * r, &mut j);
    spherical_harmonics(p, theta, phi, &mut ynm, &mut ynm_theta);

    let mut value = Complex::default();
    for n in 0..p {
        for m in 0..2 * n + 1 {
            let nm = n * n + m;
            value += widen(&local[nm]) * j[n] * ynm[nm];
        }
    }
    value
}

fn norm(x: &[f64; 3]) -> f64 {
    (x[0] * x[0] + x[1] * x[1] + x[2] * x[2]).sqrt()
}

impl<T: Scalar> Kernel for Helmholtz3d<T> {
    type T = T;

    fn expansion_order(&self) -> usize {
        self.expansion_order
    }

    fn n_coefficients(&self) -> usize {
        self.expansion_order * self.expansion_order
    }

    fn p2m(&self, center: &[T; 3], bodies: &[Body<T>], multipole: &mut [Complex<T>]) {
        let p = self.expansion_order;
        let k = self.k();
        let center = to_f64(center);
        let mut j = vec![0.0; p];
        let mut ynm = vec![Complex::default(); p * p];
        let mut ynm_theta = vec![Complex::default(); p * p];
        let prefactor = Complex::new(0.0, 4.0 * PI * k);

        for body in bodies.iter() {
            let position = to_f64(&body.position);
            let dx = [
                position[0] - center[0],
                position[1] - center[1],
                position[2] - center[2],
            ];
            let (rho, theta, phi) = cart2sph(&dx);
            bessel_j(k * rho, &mut j);
            spherical_harmonics(p, theta, phi, &mut ynm, &mut ynm_theta);
            let strength = prefactor * body.source[0].as_f64();
            for n in 0..p {
                for m in 0..2 * n + 1 {
                    let nm = n * n + m;
                    multipole[nm] += narrow::<T>(strength * j[n] * ynm[nm].conj());
                }
            }
        }
    }

    fn m2m(
        &self,
        child_center: &[T; 3],
        child: &[Complex<T>],
        parent_center: &[T; 3],
        parent: &mut [Complex<T>],
    ) {
        let p = self.expansion_order;
        let k = self.k();
        let child_center = to_f64(child_center);
        let parent_center = to_f64(parent_center);
        let shift = [
            child_center[0] - parent_center[0],
            child_center[1] - parent_center[1],
            child_center[2] - parent_center[2],
        ];
        let distance = norm(&shift);
        if distance == 0.0 {
            for (a, b) in parent.iter_mut().zip(child.iter()) {
                *a += *b;
            }
            return;
        }

        let radius = 6.0 * distance;
        let mut radial = vec![Complex::default(); p];
        hankel(k * radius, &mut radial);
        SphereRule::new(p).reexpand(
            p,
            &parent_center,
            radius,
            &radial,
            |x| eval_multipole(p, k, &child_center, child, x),
            parent,
        );
    }

    fn m2l(
        &self,
        source_center: &[T; 3],
        multipole: &[Complex<T>],
        target_center: &[T; 3],
        local: &mut [Complex<T>],
    ) {
        let p = self.expansion_order;
        let k = self.k();
        let source_center = to_f64(source_center);
        let target_center = to_f64(target_center);
        let shift = [
            target_center[0] - source_center[0],
            target_center[1] - source_center[1],
            target_center[2] - source_center[2],
        ];
        let radius = (0.4 * norm(&shift)).min(self.radius_cap());

        let mut radial = vec![0.0; p];
        bessel_j(k * radius, &mut radial);
        let radial: Vec<_> = radial.iter().map(|&j| Complex::new(j, 0.0)).collect();
        SphereRule::new(p).reexpand(
            p,
            &target_center,
            radius,
            &radial,
            |x| eval_multipole(p, k, &source_center, multipole, x),
            local,
        );
    }

    fn l2l(
        &self,
        parent_center: &[T; 3],
        parent: &[Complex<T>],
        child_center: &[T; 3],
        child: &mut [Complex<T>],
    ) {
        let p = self.expansion_order;
        let k = self.k();
        let parent_center = to_f64(parent_center);
        let child_center = to_f64(child_center);
        let shift = [
            child_center[0] - parent_center[0],
            child_center[1] - parent_center[1],
            child_center[2] - parent_center[2],
        ];
        let distance = norm(&shift);
        if distance == 0.0 {
            for (a, b) in child.iter_mut().zip(parent.iter()) {
                *a += *b;
            }
            return;
        }

        let radius = distance.min(self.radius_cap());
        let mut radial = vec![0.0; p];
        bessel_j(k * radius, &mut radial);
        let radial: Vec<_> = radial.iter().map(|&j| Complex::new(j, 0.0)).collect();
        SphereRule::new(p).reexpand(
            p,
            &child_center,
            radius,
            &radial,
            |x| eval_local(p, k, &parent_center, parent, x),
            child,
        );
    }

    fn l2p(
        &self,
        center: &[T; 3],
        local: &[Complex<T>],
        targets: &[Body<T>],
        potential: &mut [T],
        field: &mut [[T; 3]],
    ) {
        let p = self.expansion_order;
        let k = self.k();
        let center = to_f64(center);
        let mut j = vec![0.0; p + 1];
        let mut ynm = vec![Complex::default(); p * p];
        let mut ynm_theta = vec![Complex::default(); p * p];

        for (target, (pot, f)) in targets
            .iter()
            .zip(potential.iter_mut().zip(field.iter_mut()))
        {
            let position = to_f64(&target.position);
            let dx = [
                position[0] - center[0],
                position[1] - center[1],
                position[2] - center[2],
            ];
            let (r, theta, phi) = cart2sph(&dx);
            let x = k * r;
            bessel_j(x, &mut j);
            spherical_harmonics(p, theta, phi, &mut ynm, &mut ynm_theta);

            let mut value = Complex::<f64>::default();
            let mut spherical = [Complex::<f64>::default(); 3];
            for n in 0..p {
                let dj = if x > 0.0 {
                    n as f64 / x * j[n] - j[n + 1]
                } else if n == 1 {
                    1.0 / 3.0
                } else {
                    0.0
                };
                for m in 0..2 * n + 1 {
                    let nm = n * n + m;
                    let coefficient = widen(&local[nm]);
                    let order = m as f64 - n as f64;
                    value += coefficient * j[n] * ynm[nm];
                    spherical[0] += coefficient * k * dj * ynm[nm];
                    spherical[1] += coefficient * j[n] * ynm_theta[nm];
                    spherical[2] += coefficient * j[n] * ynm[nm] * Complex::new(0.0, order);
                }
            }

            let gradient = sph2cart(
                r,
                theta,
                phi,
                &[spherical[0].re, spherical[1].re, spherical[2].re],
            );
            *pot += T::of(value.re);
            for d in 0..3 {
                f[d] += T::of(gradient[d]);
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
        let k = self.wavenumber;
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
                    let r = r2.sqrt();
                    let (s, c) = (k * r).sin_cos();
                    let q = source.source[0];
                    p += q * c / r;
                    let dr = -q * (k * s / r + c / r2) / r;
                    for d in 0..3 {
                        g[d] += dx[d] * dr;
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
    fn test_bessel_closed_forms() {
        let mut j = [0.0; 4];
        let mut y = [0.0; 4];
        for x in [0.05, 0.7, 3.0, PI, 12.5] {
            bessel_j(x, &mut j);
            bessel_y(x, &mut y);
            let (s, c) = f64::sin_cos(x);
            assert_relative_eq!(j[0], s / x, epsilon = 1e-13);
            assert_relative_eq!(j[1], s / (x * x) - c / x, epsilon = 1e-13);
            assert_relative_eq!(
                j[2],
                (3.0 / (x * x) - 1.0) * s / x - 3.0 * c / (x * x),
                epsilon = 1e-12
            );
            assert_relative_eq!(y[0], -c / x, max_relative = 1e-13);
            // Wronskian j_n y_{n-1} - j_{n-1} y_n = 1 / x^2
            for n in 1..4 {
                assert_relative_eq!(
                    j[n] * y[n - 1] - j[n - 1] * y[n],
                    1.0 / (x * x),
                    max_relative = 1e-9
                );
            }
        }

        bessel_j(0.0, &mut j);
        assert_eq!(j, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_harmonics_are_orthonormal() {
        let p = 6;
        let rule = SphereRule::new(p);
        for a in 0..p * p {
            for b in 0..p * p {
                let mut inner = Complex::<f64>::default();
                for q in 0..rule.weights.len() {
                    let y = rule.harmonics(q);
                    inner += y[a] * y[b].conj() * rule.weights[q];
                }
                let expected = if a == b { 1.0 } else { 0.0 };
                assert_relative_eq!(inner.re, expected, epsilon = 1e-12);
                assert_relative_eq!(inner.im, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_p2p_pair() {
        let k = 1.5;
        let kernel = Helmholtz3d::<f64>::new(4, k);
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

        let r: f64 = 3.0;
        assert_relative_eq!(potential[0], 2.0 * (k * r).cos() / r, max_relative = 1e-14);
        let dr = -2.0 * (k * (k * r).sin() / r + (k * r).cos() / (r * r));
        assert_relative_eq!(field[0][0], dr / 3.0, max_relative = 1e-14);
        assert_relative_eq!(field[0][1], 2.0 * dr / 3.0, max_relative = 1e-14);
        assert_relative_eq!(field[0][2], 2.0 * dr / 3.0, max_relative = 1e-14);

        // Self interaction skipped
        let mut potential = [0.0];
        kernel.p2p(&[source], &[source], &[0.0; 3], &mut potential, &mut field);
        assert_eq!(potential[0], 0.0);
    }

    #[test]
    fn test_zero_wavenumber_limit_is_laplace() {
        let kernel = Helmholtz3d::<f64>::new(4, 0.0);
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
    }

    #[test]
    fn test_expansion_matches_direct() {
        let p = 12;
        let kernel = Helmholtz3d::<f64>::new(p, 1.0);
        assert_eq!(kernel.n_coefficients(), 144);
        let n = kernel.n_coefficients();

        // Positions span [-pi, pi], so sources lie within 0.28 of the leaf center and targets
        // within 0.22 of the local center.
        let mut sources = init_bodies::<f64>(40, Distribution::Cube, 0, 0, 1);
        for body in sources.iter_mut() {
            for x in body.position.iter_mut() {
                *x *= 0.05;
            }
        }
        let local_center = [4.15, 0.15, 0.15];
        let mut targets = init_bodies::<f64>(20, Distribution::Cube, 1, 0, 1);
        for body in targets.iter_mut() {
            for d in 0..3 {
                body.position[d] = body.position[d] * 0.04 + local_center[d];
            }
        }

        let leaf = [0.0; 3];
        let parent = [0.1, 0.1, 0.1];
        let remote = [4.0, 0.0, 0.0];
        let mut multipole = vec![Complex::default(); n];
        let mut shifted = vec![Complex::default(); n];
        let mut local = vec![Complex::default(); n];
        let mut child_local = vec![Complex::default(); n];
        kernel.p2m(&leaf, &sources, &mut multipole);
        kernel.m2m(&leaf, &multipole, &parent, &mut shifted);
        kernel.m2l(&parent, &shifted, &remote, &mut local);
        kernel.l2l(&remote, &local, &local_center, &mut child_local);

        let mut fmm_potential = vec![0.0; 20];
        let mut fmm_field = vec![[0.0; 3]; 20];
        kernel.l2p(&local_center, &child_local, &targets, &mut fmm_potential, &mut fmm_field);

        let mut direct_potential = vec![0.0; 20];
        let mut direct_field = vec![[0.0; 3]; 20];
        kernel.p2p(&targets, &sources, &[0.0; 3], &mut direct_potential, &mut direct_field);

        for i in 0..20 {
            assert_relative_eq!(fmm_potential[i], direct_potential[i], epsilon = 1e-6);
            for d in 0..3 {
                assert_relative_eq!(fmm_field[i][d], direct_field[i][d], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_translation_to_same_center_is_identity() {
        let kernel = Helmholtz3d::<f64>::new(5, 2.0);
        let n = kernel.n_coefficients();
        let coefficients: Vec<_> = (0..n)
            .map(|i| Complex::new(i as f64, -(i as f64) * 0.5))
            .collect();
        let center = [0.5, -0.25, 1.0];

        let mut parent = vec![Complex::default(); n];
        kernel.m2m(&center, &coefficients, &center, &mut parent);
        assert_eq!(parent, coefficients);

        let mut child = vec![Complex::default(); n];
        kernel.l2l(&center, &coefficients, &center, &mut child);
        assert_eq!(child, coefficients);
    }
}
