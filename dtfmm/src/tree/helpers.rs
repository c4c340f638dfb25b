//! Helper functions used in generating and resetting bodies, used by drivers, benchmarks and tests.
use std::{f64::consts::PI, str::FromStr};

use rand::prelude::*;

use crate::{
    traits::{
        general::Scalar,
        types::FmmError,
    },
    tree::types::Body,
};

/// Spatial distributions of generated bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Distribution {
    /// Uniform in the cube `[-pi, pi)^3`.
    Cube,
    /// Uniform on the surface of a sphere of radius pi.
    Sphere,
    /// Uniform on one octant of a sphere, stretched over the cube.
    Octant,
    /// Plummer model, scaled into the cube.
    Plummer,
    /// Regular cell centered lattice over the cube, shared between ranks.
    Lattice,
}

impl FromStr for Distribution {
    type Err = FmmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cube" | "c" => Ok(Distribution::Cube),
            "sphere" | "s" => Ok(Distribution::Sphere),
            "octant" | "o" => Ok(Distribution::Octant),
            "plummer" | "p" => Ok(Distribution::Plummer),
            "lattice" | "l" => Ok(Distribution::Lattice),
            _ => Err(FmmError::Config(format!("Unknown distribution '{s}'"))),
        }
    }
}

fn cube(n: usize, rng: &mut StdRng) -> Vec<[f64; 3]> {
    (0..n)
        .map(|_| {
            [
                rng.gen::<f64>() * 2. * PI - PI,
                rng.gen::<f64>() * 2. * PI - PI,
                rng.gen::<f64>() * 2. * PI - PI,
            ]
        })
        .collect()
}

fn sphere(n: usize, rng: &mut StdRng) -> Vec<[f64; 3]> {
    (0..n)
        .map(|_| {
            let phi = rng.gen::<f64>() * 2. * PI;
            let theta = (rng.gen::<f64>() * 2. - 1.).acos();
            [
                PI * theta.sin() * phi.cos(),
                PI * theta.sin() * phi.sin(),
                PI * theta.cos(),
            ]
        })
        .collect()
}

fn octant(n: usize, rng: &mut StdRng) -> Vec<[f64; 3]> {
    (0..n)
        .map(|_| {
            let theta = rng.gen::<f64>() * PI * 0.5;
            let phi = rng.gen::<f64>() * PI * 0.5;
            [
                2. * PI * theta.sin() * phi.cos() - PI,
                2. * PI * theta.sin() * phi.sin() - PI,
                2. * PI * theta.cos() - PI,
            ]
        })
        .collect()
}

fn plummer(n: usize, rng: &mut StdRng) -> Vec<[f64; 3]> {
    let mut points = Vec::with_capacity(n);
    while points.len() < n {
        let u: f64 = rng.gen();
        if u <= 0. {
            continue;
        }
        let r = 1. / (u.powf(-2. / 3.) - 1.).sqrt();
        if !r.is_finite() || r > 100. {
            continue;
        }
        let z = (rng.gen::<f64>() * 2. - 1.) * r;
        let phi = rng.gen::<f64>() * 2. * PI;
        let rxy = (r * r - z * z).max(0.).sqrt();
        points.push([rxy * phi.cos(), rxy * phi.sin(), z]);
    }

    let extent = points
        .iter()
        .flat_map(|p| p.iter().map(|x| x.abs()))
        .fold(0., f64::max);
    if extent > 0. {
        let scale = PI / extent;
        for p in points.iter_mut() {
            for x in p.iter_mut() {
                *x *= scale;
            }
        }
    }
    points
}

fn lattice(n: usize, rank: usize, size: usize) -> Vec<[f64; 3]> {
    let n_global = n * size;
    let nx = (n_global as f64).cbrt().ceil().max(1.) as usize;
    let h = 2. * PI / nx as f64;
    (rank * n..(rank + 1) * n)
        .map(|i| {
            let (ix, iy, iz) = (i % nx, (i / nx) % nx, i / (nx * nx));
            [
                -PI + (ix as f64 + 0.5) * h,
                -PI + (iy as f64 + 0.5) * h,
                -PI + (iz as f64 + 0.5) * h,
            ]
        })
        .collect()
}

/// Generate bodies for one rank of a run.
///
/// Sources are drawn uniformly and shifted to zero mean on each component, accumulators are zero and
/// weights one. Global indices are offset by `rank * n`.
///
/// # Arguments
/// * `n` - Number of bodies on this rank.
/// * `distribution` - Spatial distribution.
/// * `seed` - Random seed.
/// * `rank` - Rank of the calling process.
/// * `size` - Number of ranks.
pub fn init_bodies<T: Scalar>(
    n: usize,
    distribution: Distribution,
    seed: u64,
    rank: usize,
    size: usize,
) -> Vec<Body<T>> {
    let mut rng = StdRng::seed_from_u64(seed);

    let positions = match distribution {
        Distribution::Cube => cube(n, &mut rng),
        Distribution::Sphere => sphere(n, &mut rng),
        Distribution::Octant => octant(n, &mut rng),
        Distribution::Plummer => plummer(n, &mut rng),
        Distribution::Lattice => lattice(n, rank, size.max(1)),
    };

    let mut sources: Vec<[f64; 3]> = (0..n)
        .map(|_| [rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5])
        .collect();

    if n > 0 {
        let mut mean = [0f64; 3];
        for s in sources.iter() {
            for i in 0..3 {
                mean[i] += s[i] / n as f64;
            }
        }
        for s in sources.iter_mut() {
            for i in 0..3 {
                s[i] -= mean[i];
            }
        }
    }

    positions
        .iter()
        .zip(sources.iter())
        .enumerate()
        .map(|(i, (p, s))| Body {
            position: p.map(T::of),
            source: s.map(T::of),
            potential: T::zero(),
            field: [T::zero(); 3],
            index: rank * n + i,
            weight: T::one(),
        })
        .collect()
}

/// Select an evenly strided subset of bodies, used to pick targets for verification.
///
/// # Arguments
/// * `bodies` - Bodies to sample from.
/// * `n_targets` - Number of samples, all bodies are returned if there are fewer.
pub fn sample_bodies<T: Scalar>(bodies: &[Body<T>], n_targets: usize) -> Vec<Body<T>> {
    if n_targets == 0 {
        return Vec::new();
    }
    let stride = (bodies.len() / n_targets).max(1);
    bodies.iter().step_by(stride).take(n_targets).copied().collect()
}

/// Zero the potential and field accumulators of bodies, and reset their weights.
pub fn init_target<T: Scalar>(bodies: &mut [Body<T>]) {
    for body in bodies.iter_mut() {
        body.potential = T::zero();
        body.field = [T::zero(); 3];
        body.weight = T::one();
    }
}

/// Shift targets and sources apart along the first axis, so that the two sets occupy adjacent halves
/// of the domain.
pub fn separate_sources<T: Scalar>(targets: &mut [Body<T>], sources: &mut [Body<T>]) {
    let half = T::of(0.5);
    let pi = T::PI();
    for body in targets.iter_mut() {
        body.position[0] = (body.position[0] + pi) * half;
    }
    for body in sources.iter_mut() {
        body.position[0] = (body.position[0] - pi) * half;
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_distributions_in_domain() {
        let distributions = [
            Distribution::Cube,
            Distribution::Sphere,
            Distribution::Octant,
            Distribution::Plummer,
            Distribution::Lattice,
        ];

        for &distribution in distributions.iter() {
            let bodies = init_bodies::<f64>(500, distribution, 0, 0, 1);
            assert_eq!(bodies.len(), 500);
            for body in bodies.iter() {
                for x in body.position.iter() {
                    assert!(x.abs() <= PI + 1e-12, "{distribution:?} out of domain");
                }
            }
        }
    }

    #[test]
    fn test_sources_zero_mean() {
        let bodies = init_bodies::<f64>(1000, Distribution::Cube, 4, 0, 1);
        for i in 0..3 {
            let sum: f64 = bodies.iter().map(|b| b.source[i]).sum();
            assert_relative_eq!(sum, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_indices_offset_by_rank() {
        let bodies = init_bodies::<f32>(10, Distribution::Cube, 0, 2, 4);
        let indices: Vec<usize> = bodies.iter().map(|b| b.index).collect();
        assert_eq!(indices, (20..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_lattice_distinct_across_ranks() {
        let a = init_bodies::<f64>(8, Distribution::Lattice, 0, 0, 2);
        let b = init_bodies::<f64>(8, Distribution::Lattice, 0, 1, 2);
        for x in a.iter() {
            assert!(b.iter().all(|y| y.position != x.position));
        }
    }

    #[test]
    fn test_sample_and_reset() {
        let mut bodies = init_bodies::<f64>(1000, Distribution::Sphere, 0, 0, 1);
        for body in bodies.iter_mut() {
            body.potential = 1.0;
            body.field = [1.0; 3];
        }

        let sampled = sample_bodies(&bodies, 100);
        assert_eq!(sampled.len(), 100);
        assert_eq!(sampled[1].index, 10);

        init_target(&mut bodies);
        assert!(bodies.iter().all(|b| b.potential == 0.0 && b.field == [0.0; 3]));
    }

    #[test]
    fn test_parse_distribution() {
        assert_eq!("plummer".parse::<Distribution>().unwrap(), Distribution::Plummer);
        assert_eq!("C".parse::<Distribution>().unwrap(), Distribution::Cube);
        assert!(matches!(
            "torus".parse::<Distribution>(),
            Err(FmmError::Config(_))
        ));
    }
}
