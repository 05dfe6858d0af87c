//! # `poisfft`: Fourier-based Poisson solver on MPI pencil decompositions
//!
//! # Dependencies
//! - cargo >= v1.70
//! - mpi installation
//! - libclang
//!
//! # Details
//!
//! This library solves the three-dimensional Poisson equation
//! `lap(phi) = f` on rectangular grids distributed over many processes,
//! with an arbitrary combination of boundary conditions per face:
//! even-symmetric, odd-symmetric, periodic or unbounded (free space).
//!
//! The solve is a pencil-decomposed spectral pipeline: per direction a 1-D
//! transform (DFT, real-to-complex DFT, or a cosine/sine transform) is
//! applied along the fast axis of a pencil topology, and the data is
//! re-partitioned between directions by block exchanges over the process
//! grid. The right-hand side is convolved in spectral space with a Green's
//! function built through the same pipeline, then transformed back.
//!
//! Implemented Green's function families, see [`types::GreenKind`]:
//! - `Chat2` (singular kernel, cell-averaged origin)
//! - `Hej2`, `Hej4`, `Hej6` (Gaussian-regularized kernels)
//! - `Lgf2` (lattice Green's function, pre-tabulated)
//!
//! # Example
//! Solve a fully periodic problem ( run with `cargo mpirun --np 4 --bin poisfft` )
//! ```ignore
//! use poisfft::solver::Solver;
//! use poisfft::topology::Topology;
//! use poisfft::types::{uniform_bc, BoundaryKind, ExchangeStrategy, SolveMode};
//!
//! fn main() {
//!     let universe = mpi::initialize().unwrap();
//!     let world = universe.world();
//!     let n = 64;
//!     let h = 1.0 / n as f64;
//!     let topo = Topology::new(
//!         0, 1, [n; 3], [1, 2, 2], false, None, poisfft::DEFAULT_ALIGNMENT, &world,
//!     )
//!     .unwrap();
//!     let bc = uniform_bc(BoundaryKind::Periodic, 1);
//!     let mut solver = Solver::new(
//!         topo, &bc, [h; 3], [1.0; 3], 0, ExchangeStrategy::AllToAll,
//!     )
//!     .unwrap();
//!     solver.setup(None).unwrap();
//!     let len = solver.topology_physical().mem_size();
//!     let rhs = vec![0.0; len];
//!     let mut phi = vec![0.0; len];
//!     solver.solve(&mut phi, &rhs, SolveMode::Std).unwrap();
//! }
//! ```
#![warn(missing_docs)]
#![allow(clippy::unnecessary_cast)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#[macro_use]
extern crate enum_dispatch;
pub mod error;
mod green;
pub mod kernels;
pub mod memory;
pub mod plan;
pub mod solver;
pub mod switch_topo;
pub mod topology;
pub mod types;
pub mod utils;

pub use error::{Result, SolverError};
pub use solver::Solver;
pub use topology::{TopoLayout, Topology};
pub use types::{BoundaryKind, ExchangeStrategy, GreenKind, SolveMode};

/// Default byte alignment of pencil starts; fits the 256-bit vector lanes
pub const DEFAULT_ALIGNMENT: usize = 32;
