//! Solid harmonics and the translation operators of the Laplace kernel built from them.
//!
//! Expansions of order `p` hold `p (p + 1) / 2` complex coefficients, the coefficient of degree `n`
//! and order `m >= 0` stored at `n (n + 1) / 2 + m`, negative orders being recovered by conjugation.
//! Harmonic tables are indexed by `n^2 + n + m` for `-n <= m <= n`.
use num_complex::Complex;

use crate::traits::general::{ipow2n, odd_or_even, Scalar};

/// Number of stored coefficients of an expansion of order `p`.
pub fn n_coefficients(p: usize) -> usize {
    p * (p + 1) / 2
}

/// Spherical coordinates `(r, theta, phi)` of a Cartesian vector.
pub fn cart2sph<T: Scalar>(dx: &[T; 3]) -> (T, T, T) {
    let r = (dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2]).sqrt();
    let theta = if r == T::zero() {
        T::zero()
    } else {
        (dx[2] / r).max(-T::one()).min(T::one()).acos()
    };
    let phi = dx[1].atan2(dx[0]);
    (r, theta, phi)
}

/// Cartesian components of a gradient given in spherical components `(d/dr, d/dtheta, d/dphi)`.
///
/// Angular terms are dropped where the spherical frame is singular.
pub fn sph2cart<T: Scalar>(r: T, theta: T, phi: T, spherical: &[T; 3]) -> [T; 3] {
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    let inv_r = if r > T::zero() { T::one() / r } else { T::zero() };
    let inv_rs = if r * st != T::zero() {
        T::one() / (r * st)
    } else {
        T::zero()
    };

    [
        st * cp * spherical[0] + ct * cp * inv_r * spherical[1] - sp * inv_rs * spherical[2],
        st * sp * spherical[0] + ct * sp * inv_r * spherical[1] + cp * inv_rs * spherical[2],
        ct * spherical[0] - st * inv_r * spherical[1],
    ]
}

/// Regular solid harmonics `r^n Y_n^m / (n + |m|)!` and their theta derivatives, up to degree `p - 1`.
///
/// # Arguments
/// * `rho` - Radius.
/// * `alpha` - Polar angle.
/// * `beta` - Azimuthal angle.
/// * `p` - Number of degrees.
/// * `ynm` - Harmonics, at least `p^2` entries.
/// * `ynm_theta` - Theta derivatives, at least `p^2` entries.
pub fn eval_multipole<T: Scalar>(
    rho: T,
    alpha: T,
    beta: T,
    p: usize,
    ynm: &mut [Complex<T>],
    ynm_theta: &mut [Complex<T>],
) {
    let (y, x) = alpha.sin_cos();
    let inv_y = if y == T::zero() {
        T::zero()
    } else {
        T::one() / y
    };
    let two = T::of(2.0);
    let mut fact = T::one();
    let mut pn = T::one();
    let mut rhom = T::one();
    let ei = Complex::new(T::zero(), beta).exp();
    let mut eim = Complex::new(T::one(), T::zero());

    for m in 0..p {
        let mf = T::of_int(m as i64);
        let mut pv = pn;
        let npn = m * m + 2 * m;
        let nmn = m * m;
        ynm[npn] = eim * (rhom * pv);
        ynm[nmn] = ynm[npn].conj();
        let mut p1 = pv;
        pv = x * (two * mf + T::one()) * p1;
        ynm_theta[npn] = eim * (rhom * (pv - (mf + T::one()) * x * p1) * inv_y);
        rhom *= rho;
        let mut rhon = rhom;

        for n in (m + 1)..p {
            let nf = T::of_int(n as i64);
            let npm = n * n + n + m;
            let nmm = n * n + n - m;
            rhon /= -(nf + mf);
            ynm[npm] = eim * (rhon * pv);
            ynm[nmm] = ynm[npm].conj();
            let p2 = p1;
            p1 = pv;
            pv = (x * (two * nf + T::one()) * p1 - (nf + mf) * p2) / (nf - mf + T::one());
            ynm_theta[npm] =
                eim * (rhon * ((nf - mf + T::one()) * pv - (nf + T::one()) * x * p1) * inv_y);
            rhon *= rho;
        }

        rhom /= -(two * mf + two) * (two * mf + T::one());
        pn = -pn * fact * y;
        fact += two;
        eim *= ei;
    }
}

/// Irregular solid harmonics `(n - |m|)! Y_n^m / r^(n+1)`, up to degree `p - 1`.
///
/// # Arguments
/// * `rho` - Radius, must be positive.
/// * `alpha` - Polar angle.
/// * `beta` - Azimuthal angle.
/// * `p` - Number of degrees.
/// * `ynm` - Harmonics, at least `p^2` entries.
pub fn eval_local<T: Scalar>(rho: T, alpha: T, beta: T, p: usize, ynm: &mut [Complex<T>]) {
    let (y, x) = alpha.sin_cos();
    let two = T::of(2.0);
    let mut fact = T::one();
    let mut pn = T::one();
    let inv_r = -T::one() / rho;
    let mut rhom = -inv_r;
    let ei = Complex::new(T::zero(), beta).exp();
    let mut eim = Complex::new(T::one(), T::zero());

    for m in 0..p {
        let mf = T::of_int(m as i64);
        let mut pv = pn;
        let npn = m * m + 2 * m;
        let nmn = m * m;
        ynm[npn] = eim * (rhom * pv);
        ynm[nmn] = ynm[npn].conj();
        let mut p1 = pv;
        pv = x * (two * mf + T::one()) * p1;
        rhom *= inv_r;
        let mut rhon = rhom;

        for n in (m + 1)..p {
            let nf = T::of_int(n as i64);
            let npm = n * n + n + m;
            let nmm = n * n + n - m;
            ynm[npm] = eim * (rhon * pv);
            ynm[nmm] = ynm[npm].conj();
            let p2 = p1;
            p1 = pv;
            pv = (x * (two * nf + T::one()) * p1 - (nf + mf) * p2) / (nf - mf + T::one());
            rhon *= inv_r * (nf - mf + T::one());
        }

        pn = -pn * fact * y;
        fact += two;
        eim *= ei;
    }
}

/// Scratch harmonic tables, sized for translations of expansion order `p`.
pub struct Workspace<T: Scalar> {
    /// Solid harmonics.
    pub ynm: Vec<Complex<T>>,
    /// Theta derivatives of the regular solid harmonics.
    pub ynm_theta: Vec<Complex<T>>,
}

impl<T: Scalar> Workspace<T> {
    /// Allocate tables for expansion order `p`.
    pub fn new(p: usize) -> Self {
        Self {
            ynm: vec![Complex::default(); 4 * p * p],
            ynm_theta: vec![Complex::default(); 4 * p * p],
        }
    }
}

fn sub<T: Scalar>(a: &[T; 3], b: &[T; 3]) -> [T; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Accumulate the multipole expansion of point sources about a center.
///
/// # Arguments
/// * `p` - Expansion order.
/// * `center` - Expansion center.
/// * `sources` - Iterator over source positions and strengths.
/// * `multipole` - Coefficients, accumulated into.
pub fn p2m<T: Scalar>(
    p: usize,
    center: &[T; 3],
    sources: impl Iterator<Item = ([T; 3], T)>,
    multipole: &mut [Complex<T>],
) {
    let mut ws = Workspace::new(p);
    for (position, strength) in sources {
        let (rho, alpha, beta) = cart2sph(&sub(&position, center));
        eval_multipole(rho, alpha, -beta, p, &mut ws.ynm, &mut ws.ynm_theta);
        for n in 0..p {
            for m in 0..=n {
                let nm = n * n + n + m;
                let nms = n * (n + 1) / 2 + m;
                multipole[nms] += ws.ynm[nm] * strength;
            }
        }
    }
}

/// Translate a child multipole expansion to its parent's center.
pub fn m2m<T: Scalar>(
    p: usize,
    child_center: &[T; 3],
    child: &[Complex<T>],
    parent_center: &[T; 3],
    parent: &mut [Complex<T>],
) {
    let mut ws = Workspace::new(p);
    let (rho, alpha, beta) = cart2sph(&sub(parent_center, child_center));
    eval_multipole(rho, alpha, beta, p, &mut ws.ynm, &mut ws.ynm_theta);

    let pi = p as i64;
    for j in 0..pi {
        for k in 0..=j {
            let jks = (j * (j + 1) / 2 + k) as usize;
            let mut acc = Complex::<T>::default();
            for n in 0..=j {
                for m in (-n).max(-j + k + n)..=(k - 1).min(n) {
                    let jnkms = ((j - n) * (j - n + 1) / 2 + k - m) as usize;
                    let nm = (n * n + n - m) as usize;
                    acc += child[jnkms] * ws.ynm[nm] * (ipow2n::<T>(m) * odd_or_even::<T>(n));
                }
                for m in k..=n.min(j + k - n) {
                    let jnkms = ((j - n) * (j - n + 1) / 2 - k + m) as usize;
                    let nm = (n * n + n - m) as usize;
                    acc += child[jnkms].conj() * ws.ynm[nm] * odd_or_even::<T>(k + n + m);
                }
            }
            parent[jks] += acc;
        }
    }
}

/// Translate a multipole expansion into a local expansion about a well separated center.
pub fn m2l<T: Scalar>(
    p: usize,
    source_center: &[T; 3],
    multipole: &[Complex<T>],
    target_center: &[T; 3],
    local: &mut [Complex<T>],
) {
    let mut ws = Workspace::new(p);
    let (rho, alpha, beta) = cart2sph(&sub(target_center, source_center));
    eval_local(rho, alpha, beta, 2 * p, &mut ws.ynm);

    let pi = p as i64;
    for j in 0..pi {
        let cnm = odd_or_even::<T>(j);
        for k in 0..=j {
            let jks = (j * (j + 1) / 2 + k) as usize;
            let mut acc = Complex::<T>::default();
            for n in 0..pi {
                for m in -n..0 {
                    let nms = (n * (n + 1) / 2 - m) as usize;
                    let jnkm = ((j + n) * (j + n) + j + n + m - k) as usize;
                    acc += multipole[nms].conj() * ws.ynm[jnkm] * cnm;
                }
                for m in 0..=n {
                    let nms = (n * (n + 1) / 2 + m) as usize;
                    let jnkm = ((j + n) * (j + n) + j + n + m - k) as usize;
                    let sign = if k < m { k } else { m };
                    acc += multipole[nms] * ws.ynm[jnkm] * (cnm * odd_or_even::<T>(sign));
                }
            }
            local[jks] += acc;
        }
    }
}

/// Translate a parent local expansion to one of its children's centers.
pub fn l2l<T: Scalar>(
    p: usize,
    parent_center: &[T; 3],
    parent: &[Complex<T>],
    child_center: &[T; 3],
    child: &mut [Complex<T>],
) {
    let mut ws = Workspace::new(p);
    let (rho, alpha, beta) = cart2sph(&sub(child_center, parent_center));
    eval_multipole(rho, alpha, beta, p, &mut ws.ynm, &mut ws.ynm_theta);

    let pi = p as i64;
    for j in 0..pi {
        for k in 0..=j {
            let jks = (j * (j + 1) / 2 + k) as usize;
            let mut acc = Complex::<T>::default();
            for n in j..pi {
                for m in (j + k - n)..0 {
                    let jnkm = ((n - j) * (n - j) + n - j + m - k) as usize;
                    let nms = (n * (n + 1) / 2 - m) as usize;
                    acc += parent[nms].conj() * ws.ynm[jnkm] * odd_or_even::<T>(k);
                }
                for m in 0..=n {
                    if n - j >= (m - k).abs() {
                        let jnkm = ((n - j) * (n - j) + n - j + m - k) as usize;
                        let nms = (n * (n + 1) / 2 + m) as usize;
                        let sign = if m < k { m - k } else { 0 };
                        acc += parent[nms] * ws.ynm[jnkm] * odd_or_even::<T>(sign);
                    }
                }
            }
            child[jks] += acc;
        }
    }
}

/// Evaluate a local expansion at a point, returning the potential and its gradient.
pub fn l2p<T: Scalar>(
    p: usize,
    ws: &mut Workspace<T>,
    center: &[T; 3],
    local: &[Complex<T>],
    position: &[T; 3],
) -> (T, [T; 3]) {
    let (r, theta, phi) = cart2sph(&sub(position, center));
    eval_multipole(r, theta, phi, p, &mut ws.ynm, &mut ws.ynm_theta);

    let two = T::of(2.0);
    let inv_r = if r > T::zero() { T::one() / r } else { T::zero() };
    let i = Complex::new(T::zero(), T::one());
    let mut potential = T::zero();
    let mut spherical = [T::zero(); 3];

    for n in 0..p {
        let nf = T::of_int(n as i64);
        let nm = n * n + n;
        let nms = n * (n + 1) / 2;
        let value = (local[nms] * ws.ynm[nm]).re;
        potential += value;
        spherical[0] += value * inv_r * nf;
        spherical[1] += (local[nms] * ws.ynm_theta[nm]).re;

        for m in 1..=n {
            let mf = T::of_int(m as i64);
            let nm = n * n + n + m;
            let nms = n * (n + 1) / 2 + m;
            let value = (local[nms] * ws.ynm[nm]).re;
            potential += two * value;
            spherical[0] += two * value * inv_r * nf;
            spherical[1] += two * (local[nms] * ws.ynm_theta[nm]).re;
            spherical[2] += two * (local[nms] * ws.ynm[nm] * i).re * mf;
        }
    }

    (potential, sph2cart(r, theta, phi, &spherical))
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    /// Potential of a unit source at `source`, evaluated at `target` through P2M, M2M, M2L, L2L and L2P.
    fn translate(p: usize, source: [f64; 3], target: [f64; 3]) -> (f64, [f64; 3]) {
        let n = n_coefficients(p);
        let source_leaf = [0.1, 0.1, 0.1];
        let source_parent = [0.2, 0.2, 0.2];
        let target_parent = [3.8, 0.2, 0.2];
        let target_leaf = [3.9, 0.1, 0.1];

        let mut m_leaf = vec![Complex::default(); n];
        let mut m_parent = vec![Complex::default(); n];
        let mut l_parent = vec![Complex::default(); n];
        let mut l_leaf = vec![Complex::default(); n];

        p2m(p, &source_leaf, std::iter::once((source, 1.0)), &mut m_leaf);
        m2m(p, &source_leaf, &m_leaf, &source_parent, &mut m_parent);
        m2l(p, &source_parent, &m_parent, &target_parent, &mut l_parent);
        l2l(p, &target_parent, &l_parent, &target_leaf, &mut l_leaf);

        let mut ws = Workspace::new(p);
        l2p(p, &mut ws, &target_leaf, &l_leaf, &target)
    }

    #[test]
    fn test_translation_chain_matches_direct() {
        let source = [0.05, 0.17, 0.02];
        let target = [3.95, 0.05, 0.18];
        let (potential, gradient) = translate(12, source, target);

        let dx = [
            target[0] - source[0],
            target[1] - source[1],
            target[2] - source[2],
        ];
        let r = (dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2]).sqrt();
        assert_relative_eq!(potential, 1.0 / r, max_relative = 1e-8);
        for d in 0..3 {
            assert_relative_eq!(gradient[d], -dx[d] / (r * r * r), epsilon = 1e-8);
        }
    }

    /// Potential and gradient of a unit source through P2M, M2L and L2P alone.
    fn far_field(p: usize, source: [f64; 3], target: [f64; 3]) -> (f64, [f64; 3]) {
        let n = n_coefficients(p);
        let source_center = [0.0; 3];
        let target_center = [4.0, 0.0, 0.0];

        let mut multipole = vec![Complex::default(); n];
        let mut local = vec![Complex::default(); n];
        p2m(p, &source_center, std::iter::once((source, 1.0)), &mut multipole);
        m2l(p, &source_center, &multipole, &target_center, &mut local);

        let mut ws = Workspace::new(p);
        l2p(p, &mut ws, &target_center, &local, &target)
    }

    fn exact(source: [f64; 3], target: [f64; 3]) -> (f64, [f64; 3]) {
        let dx = [
            target[0] - source[0],
            target[1] - source[1],
            target[2] - source[2],
        ];
        let r = (dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2]).sqrt();
        (1.0 / r, [-dx[0] / (r * r * r), -dx[1] / (r * r * r), -dx[2] / (r * r * r)])
    }

    #[test]
    fn test_off_axis_source_and_target() {
        // Both ends off the translation axis, on the same side and on opposite sides, so that a
        // mirrored source azimuth would show up at second order.
        let cases = [
            ([0.0, 0.01, 0.0], [4.0, 0.01, 0.0]),
            ([0.0, 0.3, 0.1], [4.1, 0.25, -0.2]),
            ([0.2, -0.3, 0.25], [3.8, 0.3, 0.2]),
            ([-0.1, 0.2, -0.3], [4.2, -0.2, 0.3]),
        ];
        for (source, target) in cases {
            let (potential, gradient) = far_field(16, source, target);
            let (expected, expected_gradient) = exact(source, target);
            assert_relative_eq!(potential, expected, max_relative = 1e-9);
            for d in 0..3 {
                assert_relative_eq!(gradient[d], expected_gradient[d], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_monopole_at_center() {
        let p = 4;
        let n = n_coefficients(p);
        let mut multipole = vec![Complex::<f64>::default(); n];
        p2m(p, &[0.0; 3], std::iter::once(([0.0; 3], 2.0)), &mut multipole);
        assert_relative_eq!(multipole[0].re, 2.0);
        assert!(multipole[1..].iter().all(|c| c.norm() == 0.0));

        let mut local = vec![Complex::<f64>::default(); n];
        m2l(p, &[0.0; 3], &multipole, &[4.0, 0.0, 0.0], &mut local);
        assert_relative_eq!(local[0].re, 0.5, max_relative = 1e-12);
    }

    #[test]
    fn test_spherical_roundtrip() {
        let dx = [0.3f64, -0.4, 1.2];
        let (r, theta, phi) = cart2sph(&dx);
        assert_relative_eq!(r, 1.3, max_relative = 1e-12);
        assert_relative_eq!(r * theta.sin() * phi.cos(), dx[0], epsilon = 1e-12);
        assert_relative_eq!(r * theta.sin() * phi.sin(), dx[1], epsilon = 1e-12);
        assert_relative_eq!(r * theta.cos(), dx[2], epsilon = 1e-12);

        // A purely radial gradient maps onto the unit vector.
        let c = sph2cart(r, theta, phi, &[1.0, 0.0, 0.0]);
        for d in 0..3 {
            assert_relative_eq!(c[d], dx[d] / r, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_singular_frame_is_finite() {
        let c = sph2cart(0.0f64, 0.0, 0.0, &[1.0, 1.0, 1.0]);
        assert!(c.iter().all(|x| x.is_finite()));
    }
}
