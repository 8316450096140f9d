//! Error types for the solver.
//!
//! Every failure the crate can report is collected in one enum, [`ErrorKind`],
//! wrapped by the public [`SolverError`]. Numerical end states such as Lanczos
//! breakdown or an exhausted iteration budget are *not* errors; they are
//! reported through [`crate::algorithms::LanczosState`] and
//! [`crate::solvers::ConvergenceStatus`].
//!
//! [`thiserror`] derives the `Display` implementations. [`faer::linalg::evd::EvdError`]
//! does not implement [`std::error::Error`], so it is wrapped manually.
use thiserror::Error;

/// Represents all possible errors raised by the solver.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct SolverError(#[from] ErrorKind);

impl SolverError {
    /// The underlying error kind, for callers that branch on the failure mode.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub enum ErrorKind {
    /// A random stream was drawn from before it was seeded.
    #[error("Random stream used before it was seeded.")]
    InvalidSeed,

    /// The vector handed to an operator does not match the operator's dimension
    /// or shard layout.
    #[error("Dimension mismatch: operator expects {expected} amplitudes but vector has {actual}.")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A configuration value is out of range or inconsistent with the model.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lanczos hit its iteration cap on every attempt.
    #[error(
        "Lanczos did not converge after {attempts} attempt(s); last ground-state estimate {estimate:.12}."
    )]
    NotConverged { attempts: usize, estimate: f64 },

    /// A dense Hamiltonian or a rank's operator tables would not fit in the
    /// configured memory budget.
    #[error("Allocation of {required_bytes} bytes exceeds the limit of {limit_bytes} bytes.")]
    OutOfMemory {
        required_bytes: u128,
        limit_bytes: u128,
    },

    /// Wraps an error from [`faer`]'s eigendecomposition.
    #[error("Eigendecomposition failed: {0:?}")]
    Evd(faer::linalg::evd::EvdError),

    /// A collective operation failed: a peer vanished or ranks disagreed on
    /// which collective they were in.
    #[error("Transport failure on rank {rank}: {message}")]
    Transport { rank: usize, message: String },

    /// Writing or reading a checkpoint failed.
    #[error("Checkpoint I/O failed for '{path}': {message}")]
    Checkpoint { path: String, message: String },
}

impl PartialEq for SolverError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl From<faer::linalg::evd::EvdError> for SolverError {
    fn from(err: faer::linalg::evd::EvdError) -> Self {
        SolverError(ErrorKind::Evd(err))
    }
}

pub type Result<T, E = SolverError> = std::result::Result<T, E>;
