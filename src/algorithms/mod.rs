//! Core eigensolver algorithms.
//!
//! - **[`lanczos`]**: the distributed Lanczos state machine, [`lanczos::LanczosEngine`].
//! - **[`tridiagonal`]**: dense and Sturm-bisection solvers for the small projected
//!   matrix `T_m`.
//! - **[`full`]**: the dense fallback for small Hilbert spaces.
//!
//! The types below are shared by all three and by [`crate::solvers`].

pub mod full;
pub mod lanczos;
pub mod tridiagonal;

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Where a Lanczos run currently is.
///
/// `Converged`, `MaxIterReached` and `Breakdown` are terminal. None of them is
/// an error: after a breakdown the Krylov subspace is invariant and the Ritz
/// values found so far are exact eigenvalues of `H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LanczosState {
    Init,
    Iterating,
    Converged,
    MaxIterReached,
    Breakdown,
}

impl LanczosState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LanczosState::Converged | LanczosState::MaxIterReached | LanczosState::Breakdown
        )
    }
}

/// How the Krylov basis is kept orthogonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reorthogonalization {
    /// Plain three-term recurrence. Only `v_{k-1}` and `v_k` are kept, and
    /// eigenvectors are rebuilt by replaying the recurrence.
    None,
    /// Keep every basis vector and orthogonalize each new one against all of
    /// them (two passes of classical Gram-Schmidt).
    #[default]
    Full,
}

/// Sort order for [`tridiagonal::solve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// The projected matrix `T_m`: diagonal `alphas[0..m]`, off-diagonal `betas[0..m-1]`.
///
/// While a run is still iterating, `betas` also holds `beta_{m-1}`, the coupling
/// to the next basis vector `v_m`, which is not part of `T_m` yet. Solvers must
/// read the off-diagonal through [`Tridiagonal::off_diagonal`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tridiagonal {
    pub alphas: Vec<f64>,
    pub betas: Vec<f64>,
}

impl Tridiagonal {
    /// Number of Lanczos steps `m` represented.
    pub fn len(&self) -> usize {
        self.alphas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alphas.is_empty()
    }

    /// The `m - 1` off-diagonal entries of `T_m`, without any trailing coupling.
    pub fn off_diagonal(&self) -> &[f64] {
        let m = self.alphas.len().saturating_sub(1);
        &self.betas[..m.min(self.betas.len())]
    }

    pub fn clear(&mut self) {
        self.alphas.clear();
        self.betas.clear();
    }
}

/// Knobs of a single Lanczos run. [`crate::config::SolverConfig`] carries the
/// user-facing version of these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LanczosOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub breakdown_tolerance: f64,
    pub check_interval: usize,
    pub n_eigenvalues: usize,
    pub reorthogonalization: Reorthogonalization,
}

impl Default for LanczosOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-10,
            breakdown_tolerance: 1e-12,
            check_interval: 1,
            n_eigenvalues: 1,
            reorthogonalization: Reorthogonalization::Full,
        }
    }
}

impl LanczosOptions {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| -> Result<()> {
            Err(ErrorKind::InvalidConfig(msg.to_string()).into())
        };
        if self.max_iterations == 0 {
            return bad("max_iterations must be at least 1");
        }
        if self.check_interval == 0 {
            return bad("check_interval must be at least 1");
        }
        if self.n_eigenvalues == 0 {
            return bad("n_eigenvalues must be at least 1");
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return bad("tolerance must be a positive number");
        }
        if !(self.breakdown_tolerance.is_finite() && self.breakdown_tolerance >= 0.0) {
            return bad("breakdown_tolerance must be a non-negative number");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!LanczosState::Init.is_terminal());
        assert!(!LanczosState::Iterating.is_terminal());
        assert!(LanczosState::Converged.is_terminal());
        assert!(LanczosState::MaxIterReached.is_terminal());
        assert!(LanczosState::Breakdown.is_terminal());
    }

    #[test]
    fn test_options_validation() {
        assert!(LanczosOptions::default().validate().is_ok());
        let zero_iter = LanczosOptions {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(zero_iter.validate().is_err());
        let nan_tol = LanczosOptions {
            tolerance: f64::NAN,
            ..Default::default()
        };
        assert!(nan_tol.validate().is_err());
    }

    #[test]
    fn test_off_diagonal_drops_trailing_coupling() {
        let mut t = Tridiagonal {
            alphas: vec![1.0, 2.0, 3.0],
            betas: vec![0.5, 0.25, 0.125],
        };
        assert_eq!(t.off_diagonal(), &[0.5, 0.25]);
        t.betas.pop();
        assert_eq!(t.off_diagonal(), &[0.5, 0.25]);
        t.clear();
        assert!(t.off_diagonal().is_empty());
    }
}
