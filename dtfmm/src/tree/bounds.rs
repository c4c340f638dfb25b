//! Bounding boxes of body sets
use itertools::izip;

use crate::{
    traits::general::Scalar,
    tree::{
        constants::ROOT_PADDING,
        types::{Body, Bounds},
    },
};

impl<T: Scalar> Default for Bounds<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Scalar> Bounds<T> {
    /// The identity element of `merge`, containing no points.
    pub fn empty() -> Self {
        Self {
            min: [T::infinity(); 3],
            max: [T::neg_infinity(); 3],
        }
    }

    /// Whether these bounds contain no points.
    pub fn is_empty(&self) -> bool {
        self.min.iter().zip(self.max.iter()).any(|(l, r)| l > r)
    }

    /// Compute the bounds of a set of bodies.
    ///
    /// # Arguments
    /// * `bodies` - Bodies to bound, an empty slice yields empty bounds.
    pub fn from_bodies(bodies: &[Body<T>]) -> Self {
        Self::from_bodies_merged(bodies, Self::empty())
    }

    /// Compute the bounds of a set of bodies, merged with existing bounds.
    ///
    /// # Arguments
    /// * `bodies` - Bodies to bound.
    /// * `bounds` - Existing bounds to merge with.
    pub fn from_bodies_merged(bodies: &[Body<T>], bounds: Self) -> Self {
        bodies.iter().fold(bounds, |mut acc, body| {
            for (l, r, x) in izip!(acc.min.iter_mut(), acc.max.iter_mut(), body.position.iter()) {
                *l = l.min(*x);
                *r = r.max(*x);
            }
            acc
        })
    }

    /// Component wise union of two bounds.
    pub fn merge(&self, other: &Self) -> Self {
        let mut result = *self;
        for i in 0..3 {
            result.min[i] = self.min[i].min(other.min[i]);
            result.max[i] = self.max[i].max(other.max[i]);
        }
        result
    }

    /// The cube enclosing these bounds, returned as its center and half side length.
    ///
    /// The radius is padded so that bodies on the boundary fall strictly inside, and so that a
    /// single point still yields a cube of positive size. Empty bounds yield the unit cube at the origin.
    pub fn cube(&self) -> ([T; 3], T) {
        if self.is_empty() {
            return ([T::zero(); 3], T::one());
        }

        let two = T::of(2.0);
        let mut center = [T::zero(); 3];
        let mut radius = T::zero();
        let mut extent = T::zero();

        for i in 0..3 {
            center[i] = (self.min[i] + self.max[i]) / two;
            radius = radius.max((self.max[i] - self.min[i]) / two);
            extent = extent.max(self.min[i].abs()).max(self.max[i].abs());
        }

        let floor = T::epsilon() * T::of(1024.0) * (T::one() + extent);
        let radius = radius * (T::one() + T::of(ROOT_PADDING)) + floor;
        (center, radius)
    }
}
