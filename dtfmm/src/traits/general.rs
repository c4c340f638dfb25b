//! Useful traits
use std::fmt::{Debug, Display};
use std::iter::Sum;

use num::traits::{Float, FloatConst, NumAssign};

/// Real floating point types over which trees, expansions and bodies are defined.
pub trait Scalar:
    Float + FloatConst + NumAssign + Default + Debug + Display + Sum + Send + Sync + 'static
{
    /// Exact conversion from an `f64` literal.
    fn of(value: f64) -> Self;

    /// Conversion from an integer, used for factorial and recurrence coefficients.
    fn of_int(value: i64) -> Self;

    /// Widening conversion to `f64`, used where special functions are evaluated in double precision.
    fn as_f64(self) -> f64;
}

macro_rules! impl_scalar {
    ($t:ty) => {
        impl Scalar for $t {
            #[inline(always)]
            fn of(value: f64) -> Self {
                value as $t
            }

            #[inline(always)]
            fn of_int(value: i64) -> Self {
                value as $t
            }

            #[inline(always)]
            fn as_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_scalar!(f32);
impl_scalar!(f64);

/// Returns `-1` for odd and `1` for even integers.
#[inline(always)]
pub fn odd_or_even<T: Scalar>(n: i64) -> T {
    if n & 1 == 1 {
        -T::one()
    } else {
        T::one()
    }
}

/// Returns `1` for non-negative `m`, and `(-1)^m` otherwise.
#[inline(always)]
pub fn ipow2n<T: Scalar>(m: i64) -> T {
    if m >= 0 {
        T::one()
    } else {
        odd_or_even(m)
    }
}
