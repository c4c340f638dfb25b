//! FMM traits
use crate::{
    traits::{
        general::Scalar,
        types::{FmmOperatorTime, FmmResult},
    },
    tree::types::Body,
};

/// Interface for an evaluable FMM, whether on a single node or on one rank of a distributed run.
pub trait Evaluate {
    /// Data associated with FMM.
    type Scalar: Scalar;

    /// Evaluate potentials and fields, overwriting the accumulators of the target bodies.
    fn evaluate(&mut self) -> FmmResult<()>;

    /// Target bodies held locally, in tree order.
    fn bodies(&self) -> &[Body<Self::Scalar>];

    /// Operator times recorded by the last evaluation, empty unless timing was requested.
    fn times(&self) -> &[FmmOperatorTime];
}
