//! Helper functions used in FMM evaluation
use std::time::{Duration, Instant};

use crate::traits::general::Scalar;

/// Run a closure, recording its wall time if requested.
pub fn optionally_time<T>(timed: bool, f: impl FnOnce() -> T) -> (T, Option<Duration>) {
    if timed {
        let start = Instant::now();
        let result = f();
        (result, Some(start.elapsed()))
    } else {
        (f(), None)
    }
}

/// Half width, in periods, of the image lattice used for a number of image shells, `sum_{i<images} 3^i`.
pub fn periodic_range(images: usize) -> i64 {
    (0..images).map(|i| 3i64.pow(i as u32)).sum()
}

/// Offsets of every periodic image of the domain, the unshifted domain included.
///
/// # Arguments
/// * `images` - Number of image shells, zero for a free space problem.
/// * `cycle` - Period of the domain along each axis.
pub fn periodic_offsets<T: Scalar>(images: usize, cycle: T) -> Vec<[T; 3]> {
    let prange = periodic_range(images);
    let mut offsets = Vec::with_capacity(((2 * prange + 1) as usize).pow(3));
    for ix in -prange..=prange {
        for iy in -prange..=prange {
            for iz in -prange..=prange {
                offsets.push([
                    T::of_int(ix) * cycle,
                    T::of_int(iy) * cycle,
                    T::of_int(iz) * cycle,
                ]);
            }
        }
    }
    offsets
}
