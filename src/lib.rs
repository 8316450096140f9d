//! Distributed Lanczos eigensolver for Hubbard-type lattice models.
//!
//! This crate computes the ground state and low excitations of fermion Hubbard
//! models on chain, square, triangular and honeycomb lattices. The Hamiltonian is
//! never stored: it is applied implicitly from hopping and interaction tables over
//! a combinatorially indexed Fock basis, with amplitudes split into contiguous
//! shards across a group of ranks.
//!
//! ## Algorithms
//!
//! **Lanczos** ([`algorithms::lanczos`]): a three-term recurrence that projects `H`
//! onto a Krylov subspace as a small tridiagonal matrix. With
//! [`Reorthogonalization::Full`] every basis vector is kept and re-orthogonalized
//! against, costing `O(n m)` memory. With [`Reorthogonalization::None`] only two
//! vectors are held (`O(n)` memory) and eigenvectors are rebuilt by replaying the
//! recurrence.
//!
//! **Full diagonalization** ([`algorithms::full`]): small Hilbert spaces are
//! written out densely and diagonalized exactly with [`faer`].
//!
//! [`SolverDriver`] chooses between the two, restarts Lanczos runs that exhaust
//! their iteration budget, and reports how the result was obtained.
//!
//! ## Distribution
//!
//! Every collective takes an explicit [`comm::Communicator`]. [`comm::SelfComm`]
//! is a single rank; [`comm::ThreadGroup`] runs ranks as threads connected by
//! channels. All ranks must make the same sequence of collective calls.
//!
//! ## Example Usage
//!
//! The two-site Hubbard model at half filling has the ground-state energy
//! `(U - sqrt(U^2 + 16 t^2)) / 2`:
//!
//! ```rust
//! use lattice_lanczos::{
//!     comm::SelfComm,
//!     config::SolverConfig,
//!     model::{HubbardParams, Lattice, ModelDescriptor},
//!     solvers::solve_model,
//! };
//!
//! let tables = Lattice::Chain { length: 2, periodic: false }
//!     .generate(&HubbardParams { t: 1.0, u: 4.0, v: 0.0 });
//! let model = ModelDescriptor::new(tables, 2, false).with_two_sz(0);
//!
//! let result = solve_model(&model, &SolverConfig::default(), &SelfComm)?;
//! let exact = (4.0 - (16.0f64 + 16.0).sqrt()) / 2.0;
//! assert!((result.ground_energy().unwrap() - exact).abs() < 1e-10);
//! # Ok::<(), lattice_lanczos::SolverError>(())
//! ```

pub mod algorithms;
pub mod comm;
pub mod config;
pub mod error;
pub mod model;
pub mod operator;
pub mod random;
pub mod solvers;
pub mod utils;
pub mod vector;

pub use algorithms::{LanczosState, Reorthogonalization};
pub use config::{Algorithm, SolverConfig};
pub use error::{ErrorKind, Result, SolverError};
pub use solvers::{ConvergenceStatus, SolverDriver, SolverResult, solve_model};
