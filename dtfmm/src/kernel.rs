//! # Kernels
//!
//! Field translations of the Laplace and Biot-Savart kernels, expressed with solid harmonics, and of
//! the Helmholtz kernel, expressed with spherical wave functions.
pub mod harmonics;

mod biot_savart;
mod helmholtz;
mod laplace;

pub use biot_savart::BiotSavart3d;
pub use helmholtz::Helmholtz3d;
pub use laplace::Laplace3d;
