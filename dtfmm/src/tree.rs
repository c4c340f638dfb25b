//! # Adaptive Octrees
//!
//! Bodies are sorted into an adaptive octree whose cells are stored in a breadth first arena, so
//! that the cells of each level, and the children of each cell, are contiguous.
//!
//! # Example Usage
//! ```
//! use dtfmm::tree::{builder::OctreeBuilder, helpers::{init_bodies, Distribution}, types::Bounds};
//!
//! let mut bodies = init_bodies::<f64>(1000, Distribution::Plummer, 0, 0, 1);
//! let mut buffer = bodies.clone();
//! let bounds = Bounds::from_bodies(&bodies);
//! let tree = OctreeBuilder::new(16, 1000).build(&mut bodies, &mut buffer, &bounds).unwrap();
//! assert!(tree.cells.len() > 1);
//! ```
pub mod constants;
pub mod types;

pub mod bounds;
pub mod builder;
pub mod helpers;
pub mod morton;
mod octree;
