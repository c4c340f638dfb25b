//! # Dual Tree Fast Multipole Method
//!
//! A fast multipole method built around a dual tree traversal, designed for computing approximate
//! pairwise sums over N bodies at controlled accuracy.
//!
//! Notable features of this library are:
//! * Adaptive octrees built with task parallel recursion.
//! * A dual tree traversal with a tunable multipole acceptance criterion, single or dual recursion,
//!   and periodic images.
//! * Distributed memory evaluation via a request driven local essential tree exchange, available
//!   with MPI behind the `mpi` feature, and as an in-process simulation for testing.
//! * A trait based kernel interface, with Laplace and Biot-Savart kernels expressed with solid harmonics
//!   and a Helmholtz kernel expressed with spherical wave functions.
//!
//! ## Example
//! ```
//! use dtfmm::{Laplace3d, SingleNodeBuilder, FmmConfig};
//! use dtfmm::tree::helpers::{init_bodies, Distribution};
//!
//! let bodies = init_bodies::<f64>(500, Distribution::Cube, 0, 0, 1);
//! let config = FmmConfig::<f64>::default();
//! let kernel = Laplace3d::new(config.expansion_order);
//!
//! let mut fmm = SingleNodeBuilder::new()
//!     .bodies(bodies)
//!     .unwrap()
//!     .parameters(config, kernel)
//!     .unwrap()
//!     .build()
//!     .unwrap();
//!
//! fmm.evaluate().unwrap();
//! assert_eq!(fmm.bodies().len(), 500);
//! ```
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod fmm;
pub mod kernel;
pub mod traits;
pub mod tree;

// Public API
#[doc(inline)]
pub use fmm::types::{Equation, Fmm, FmmConfig, SingleNodeBuilder};
#[cfg(feature = "mpi")]
#[doc(inline)]
pub use fmm::tree_mpi::TreeMpi;
#[doc(inline)]
pub use kernel::{BiotSavart3d, Helmholtz3d, Laplace3d};
#[doc(inline)]
pub use traits::types::{FmmError, FmmResult};
#[doc(inline)]
pub use tree::types::{Body, Bounds, Cell, Octree};
