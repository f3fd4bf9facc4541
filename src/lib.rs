//! Jacobi relaxation on compute devices.
//!
//! Solves dense diagonally dominant systems `Ax = b` and fits natural cubic
//! splines by relaxing their moment recurrence, with the iteration loop
//! running against either a wgpu device or the host reference backend.

pub mod config;
pub mod device;
pub mod error;
pub mod output;
pub mod solver;
pub mod stats;
