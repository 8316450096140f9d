//! Run configuration.
//!
//! [`SolverConfig`] is the single source of every tunable. It has no hidden
//! defaults: [`Default`] spells out each value. Missing fields fall back to
//! those defaults when the struct is deserialized.

use crate::{
    algorithms::{LanczosOptions, Reorthogonalization, lanczos::StartVector},
    error::{ErrorKind, Result},
};
use serde::{Deserialize, Serialize};

/// Default per-rank memory budget: 4 GiB.
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 4 << 30;

/// Which eigensolver the driver uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// Full diagonalization up to `full_diag_threshold` states, Lanczos above.
    #[default]
    Auto,
    Lanczos,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    /// Relative change of the eigenvalue estimates that counts as converged.
    pub tolerance: f64,
    /// `beta_k` below this multiple of `max(|alpha_k|, beta_{k-1}, 1)` is a breakdown.
    pub breakdown_tolerance: f64,
    /// Lanczos steps between convergence checks.
    pub check_interval: usize,
    pub reorthogonalization: Reorthogonalization,
    pub n_eigenvalues: usize,
    /// `initial_iv`: seeds the random start vector and places the unit one.
    pub seed: i64,
    pub start_vector: StartVector,
    pub full_diag_threshold: usize,
    /// Lanczos restarts after `MaxIterReached` before giving up.
    pub max_restarts: usize,
    pub algorithm: Algorithm,
    pub memory_limit_bytes: u64,
    pub eigenvectors: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-10,
            breakdown_tolerance: 1e-12,
            check_interval: 1,
            reorthogonalization: Reorthogonalization::Full,
            n_eigenvalues: 1,
            seed: 1,
            start_vector: StartVector::Random,
            full_diag_threshold: 1000,
            max_restarts: 2,
            algorithm: Algorithm::Auto,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            eigenvectors: false,
        }
    }
}

impl SolverConfig {
    /// The Lanczos-specific subset of the configuration.
    pub fn lanczos_options(&self) -> LanczosOptions {
        LanczosOptions {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            breakdown_tolerance: self.breakdown_tolerance,
            check_interval: self.check_interval,
            n_eigenvalues: self.n_eigenvalues,
            reorthogonalization: self.reorthogonalization,
        }
    }

    /// Rejects inconsistent values. Runs before any collective, so every rank
    /// fails the same way.
    pub fn validate(&self) -> Result<()> {
        self.lanczos_options().validate()?;
        if self.check_interval > self.max_iterations {
            return Err(ErrorKind::InvalidConfig(format!(
                "check_interval {} exceeds max_iterations {}",
                self.check_interval, self.max_iterations
            ))
            .into());
        }
        if self.memory_limit_bytes == 0 {
            return Err(
                ErrorKind::InvalidConfig("memory_limit_bytes must be positive".into()).into(),
            );
        }
        self.restart_seed(self.max_restarts)?;
        Ok(())
    }

    /// Start-vector seed of restart number `restart` (0 is the first attempt).
    pub fn restart_seed(&self, restart: usize) -> Result<i64> {
        i64::try_from(restart)
            .ok()
            .and_then(|offset| self.seed.checked_add(offset))
            .ok_or_else(|| {
                ErrorKind::InvalidConfig(format!(
                    "seed {} leaves no room for {restart} restart(s)",
                    self.seed
                ))
                .into()
            })
    }

    /// Full diagonalization is chosen for `dim` states.
    pub fn use_full(&self, dim: usize) -> bool {
        match self.algorithm {
            Algorithm::Auto => dim <= self.full_diag_threshold,
            Algorithm::Lanczos => false,
            Algorithm::Full => true,
        }
    }
}
