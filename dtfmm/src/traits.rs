//! # Trait Definitions
pub mod fmm;
pub mod general;
pub mod kernel;
pub mod tree;
pub mod types;
