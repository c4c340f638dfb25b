//! Morton encoding of positions, used to order bodies along a space filling curve.
use num::ToPrimitive;

use crate::{traits::general::Scalar, tree::constants::MORTON_BITS};

/// Spread the lowest 21 bits of `x` so that two zero bits separate each of them.
#[inline]
fn split_by_3(x: u64) -> u64 {
    let mut x = x & 0x1f_ffff;
    x = (x | x << 32) & 0x001f_0000_0000_ffff;
    x = (x | x << 16) & 0x001f_0000_ff00_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}

/// Inverse of `split_by_3`.
#[inline]
fn compact_by_3(x: u64) -> u64 {
    let mut x = x & 0x1249_2492_4924_9249;
    x = (x | x >> 2) & 0x10c3_0c30_c30c_30c3;
    x = (x | x >> 4) & 0x100f_00f0_0f00_f00f;
    x = (x | x >> 8) & 0x001f_0000_ff00_00ff;
    x = (x | x >> 16) & 0x001f_0000_0000_ffff;
    x = (x | x >> 32) & 0x1f_ffff;
    x
}

/// Encode integer anchor coordinates, the x bit is the least significant of each triple.
pub fn encode_anchor(anchor: &[u64; 3]) -> u64 {
    split_by_3(anchor[0]) | (split_by_3(anchor[1]) << 1) | (split_by_3(anchor[2]) << 2)
}

/// Decode a Morton key into integer anchor coordinates.
pub fn decode_key(key: u64) -> [u64; 3] {
    [compact_by_3(key), compact_by_3(key >> 1), compact_by_3(key >> 2)]
}

/// Integer coordinates of a position on the finest Morton grid of a cube.
///
/// Positions outside the cube are clamped onto its boundary.
///
/// # Arguments
/// * `position` - Cartesian coordinate.
/// * `center` - Center of the enclosing cube.
/// * `radius` - Half side length of the enclosing cube.
pub fn point_to_anchor<T: Scalar>(position: &[T; 3], center: &[T; 3], radius: T) -> [u64; 3] {
    let n = 1u64 << MORTON_BITS;
    let scale = T::of_int(n as i64) / (T::of(2.0) * radius);
    let mut anchor = [0u64; 3];
    for i in 0..3 {
        let x = ((position[i] - center[i] + radius) * scale).floor();
        let x = x.max(T::zero()).min(T::of_int((n - 1) as i64));
        anchor[i] = x.to_u64().unwrap_or(0);
    }
    anchor
}

/// Morton key of a position in a cube.
pub fn encode_point<T: Scalar>(position: &[T; 3], center: &[T; 3], radius: T) -> u64 {
    encode_anchor(&point_to_anchor(position, center, radius))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode_decode_anchor() {
        let anchors = [[0, 0, 0], [1, 0, 0], [0, 1, 0], [0, 0, 1], [65535, 3, 40000], [12, 65535, 7]];
        for anchor in anchors.iter() {
            assert_eq!(decode_key(encode_anchor(anchor)), *anchor);
        }
        assert_eq!(encode_anchor(&[1, 0, 0]), 1);
        assert_eq!(encode_anchor(&[0, 1, 0]), 2);
        assert_eq!(encode_anchor(&[0, 0, 1]), 4);
        assert_eq!(encode_anchor(&[1, 1, 1]), 7);
    }

    #[test]
    fn test_point_ordering_follows_octants() {
        let center = [0.0f64; 3];
        let radius = 1.0;

        // Every point of the low octant precedes every point of the high octant.
        let low = encode_point(&[-0.1, -0.9, -0.5], &center, radius);
        let high = encode_point(&[0.1, 0.1, 0.1], &center, radius);
        assert!(low < high);

        let corner = encode_point(&[1.0, 1.0, 1.0], &center, radius);
        let max = (1u64 << MORTON_BITS) - 1;
        assert_eq!(decode_key(corner), [max, max, max]);

        let outside = encode_point(&[-5.0, 0.0, 0.0], &center, radius);
        assert_eq!(decode_key(outside)[0], 0);
    }
}
