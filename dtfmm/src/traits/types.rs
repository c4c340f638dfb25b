//! Utility types for trait definitions.
use std::time::{Duration, Instant};

/// Type to handle FMM related errors
#[derive(thiserror::Error, Debug)]
pub enum FmmError {
    /// Invalid run time configuration, detected before any tree work begins
    #[error("Configuration error: {0}")]
    Config(String),

    /// A structural invariant of the tree was violated during construction
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Computed relative errors exceed the accepted threshold
    #[error("Accuracy check failed: potential error {potential:e}, field error {field:e}, threshold {threshold:e}")]
    Accuracy {
        /// Relative L2 error in the potential
        potential: f64,
        /// Relative L2 error in the field
        field: f64,
        /// Accepted threshold
        threshold: f64,
    },

    /// Failure while exchanging data between ranks
    #[error("Communication error: {0}")]
    Communication(String),

    /// Unimplemented section
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result Type
pub type FmmResult<T> = std::result::Result<T, FmmError>;

/// Enumeration of operator types for timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FmmOperatorType {
    /// Tree construction
    Build,
    /// Particle to multipole
    P2M,
    /// Multipole to multipole (level)
    M2M(u64),
    /// Dual tree traversal, including multipole to local and particle to particle evaluation
    Traversal,
    /// Local to local (level)
    L2L(u64),
    /// Local to particle
    L2P,
    /// Local essential tree exchange
    Let,
}

/// Timing of an operator
#[derive(Debug, Clone, Copy)]
pub struct FmmOperatorTime {
    /// Operator name
    pub operator: FmmOperatorType,

    /// Time in milliseconds
    pub time: u64,
}

impl FmmOperatorTime {
    /// Constructor from an instant
    pub fn from_instant(operator: FmmOperatorType, instant: Instant) -> Self {
        Self::from_duration(operator, instant.elapsed())
    }

    /// Constructor from a duration
    pub fn from_duration(operator: FmmOperatorType, duration: Duration) -> Self {
        Self {
            operator,
            time: duration.as_millis() as u64,
        }
    }
}

