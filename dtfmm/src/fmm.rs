//! A dual tree traversal fast multipole method, on a single node or distributed over ranks.
mod builder;
pub mod helpers;
mod single_node;
pub mod traversal;
pub mod types;
pub mod up_down_pass;
pub mod verify;

pub mod multi_node;

#[cfg(feature = "mpi")]
pub mod tree_mpi;

pub use types::Fmm;
