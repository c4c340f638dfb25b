//! Accuracy checks of FMM results against direct summation
use crate::{
    traits::{
        general::Scalar,
        types::{FmmError, FmmResult},
    },
    tree::types::Body,
};

/// Relative L2 errors between two sets of bodies holding the same targets in the same order.
pub struct Verify;

impl Verify {
    /// Squared L2 difference of potentials.
    pub fn potential_difference<T: Scalar>(approx: &[Body<T>], exact: &[Body<T>]) -> f64 {
        approx
            .iter()
            .zip(exact.iter())
            .map(|(a, e)| (a.potential - e.potential).as_f64().powi(2))
            .sum()
    }

    /// Squared L2 norm of potentials.
    pub fn potential_norm<T: Scalar>(exact: &[Body<T>]) -> f64 {
        exact.iter().map(|e| e.potential.as_f64().powi(2)).sum()
    }

    /// Squared L2 difference of fields.
    pub fn field_difference<T: Scalar>(approx: &[Body<T>], exact: &[Body<T>]) -> f64 {
        approx
            .iter()
            .zip(exact.iter())
            .map(|(a, e)| {
                (0..3)
                    .map(|d| (a.field[d] - e.field[d]).as_f64().powi(2))
                    .sum::<f64>()
            })
            .sum()
    }

    /// Squared L2 norm of fields.
    pub fn field_norm<T: Scalar>(exact: &[Body<T>]) -> f64 {
        exact
            .iter()
            .map(|e| (0..3).map(|d| e.field[d].as_f64().powi(2)).sum::<f64>())
            .sum()
    }

    /// Relative L2 errors of potential and field. Where the exact norm vanishes, as for the potential
    /// of the Biot-Savart kernel, the absolute error is returned instead.
    pub fn relative_errors<T: Scalar>(approx: &[Body<T>], exact: &[Body<T>]) -> (f64, f64) {
        Self::relative_from_sums([
            Self::potential_difference(approx, exact),
            Self::potential_norm(exact),
            Self::field_difference(approx, exact),
            Self::field_norm(exact),
        ])
    }

    /// Relative errors from squared sums ordered as potential difference, potential norm, field
    /// difference, field norm. Sums may be accumulated over several ranks before the division.
    pub fn relative_from_sums(sums: [f64; 4]) -> (f64, f64) {
        let relative = |difference: f64, norm: f64| {
            if norm > 0.0 {
                (difference / norm).sqrt()
            } else {
                difference.sqrt()
            }
        };
        (relative(sums[0], sums[1]), relative(sums[2], sums[3]))
    }

    /// Accept relative errors at or below a threshold.
    pub fn accept(potential: f64, field: f64, threshold: f64) -> FmmResult<(f64, f64)> {
        if potential <= threshold && field <= threshold {
            Ok((potential, field))
        } else {
            Err(FmmError::Accuracy {
                potential,
                field,
                threshold,
            })
        }
    }

    /// Relative errors, failing if either exceeds a threshold.
    ///
    /// # Arguments
    /// * `approx` - Approximate results.
    /// * `exact` - Reference results for the same targets in the same order.
    /// * `threshold` - Largest accepted relative error.
    pub fn check<T: Scalar>(
        approx: &[Body<T>],
        exact: &[Body<T>],
        threshold: f64,
    ) -> FmmResult<(f64, f64)> {
        if approx.len() != exact.len() {
            return Err(FmmError::Config(format!(
                "Cannot compare {} bodies against {}",
                approx.len(),
                exact.len()
            )));
        }
        let (potential, field) = Self::relative_errors(approx, exact);
        Self::accept(potential, field, threshold)
    }
}
