//! This module provides the high-level entry point: [`SolverDriver`] picks an
//! eigensolver for the problem size, runs it, and applies the restart policy.
//!
//! - Hilbert spaces up to `full_diag_threshold` states are diagonalized densely
//!   ([`FullDiagonalizer`]); larger ones go to [`LanczosEngine`].
//! - A Lanczos breakdown is a success: the Krylov space is invariant and the Ritz
//!   values are exact. It is reported as [`ConvergenceStatus::Breakdown`].
//! - A run that exhausts `max_iterations` is restarted from a new deterministic
//!   start vector (`seed + attempt`). After `max_restarts` restarts the driver
//!   gives up with `NotConverged`, carrying the last ground-state estimate.
//!
//! Configuration is validated when the driver is built, before any collective.

use crate::{
    algorithms::{
        LanczosState,
        full::FullDiagonalizer,
        lanczos::{LanczosEngine, start_vector},
    },
    comm::Communicator,
    config::SolverConfig,
    error::{ErrorKind, Result},
    model::{HubbardHamiltonian, ModelDescriptor},
    operator::{AssembleDense, DistributedOperator},
    vector::DistributedVector,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the reported eigenvalues were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvergenceStatus {
    /// Lanczos estimates settled within the tolerance.
    Converged,
    /// Lanczos hit an invariant subspace; the Ritz values are exact.
    Breakdown,
    /// Dense diagonalization.
    Exact,
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvergenceStatus::Converged => "converged",
            ConvergenceStatus::Breakdown => "breakdown",
            ConvergenceStatus::Exact => "exact",
        };
        f.write_str(name)
    }
}

/// Outcome of [`SolverDriver::solve`].
#[derive(Debug, Clone)]
pub struct SolverResult {
    pub status: ConvergenceStatus,
    /// Lowest eigenvalues, ascending. At most `n_eigenvalues` of them.
    pub eigenvalues: Vec<f64>,
    /// One shard per requested eigenvalue when `eigenvectors` is set, else empty.
    pub eigenvectors: Vec<DistributedVector>,
    /// Lanczos steps of the successful attempt; 0 for full diagonalization.
    pub iterations: usize,
    /// Lanczos attempts made, restarts included; 0 for full diagonalization.
    pub attempts: usize,
    /// Residual-norm estimate of the lowest Ritz pair; 0 for full diagonalization.
    pub residual: f64,
}

impl SolverResult {
    pub fn ground_energy(&self) -> Option<f64> {
        self.eigenvalues.first().copied()
    }
}

#[derive(Debug, Clone)]
pub struct SolverDriver {
    config: SolverConfig,
}

impl SolverDriver {
    /// Validates `config`; no communication takes place.
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Computes the lowest eigenpairs of `operator`. Collective.
    ///
    /// Spaces no larger than `full_diag_threshold` (or any space when the
    /// algorithm is forced to `Full`) are diagonalized densely; all others go
    /// through Lanczos with restarts.
    ///
    /// # Arguments
    /// * `operator` - The distributed Hamiltonian. Every rank passes its own
    ///   handle on the same global operator.
    /// * `comm` - The rank group the operator is sharded over.
    ///
    /// # Returns
    /// A [`SolverResult`] identical on every rank, apart from the eigenvector
    /// shards, which each hold this rank's block.
    pub fn solve<O>(&self, operator: &O, comm: &dyn Communicator) -> Result<SolverResult>
    where
        O: DistributedOperator + AssembleDense + ?Sized,
    {
        if self.config.use_full(operator.dim()) {
            self.solve_full(operator, comm)
        } else {
            self.solve_lanczos(operator, comm)
        }
    }

    /// Dense path. Collective.
    pub fn solve_full<O>(&self, operator: &O, comm: &dyn Communicator) -> Result<SolverResult>
    where
        O: DistributedOperator + AssembleDense + ?Sized,
    {
        let n_vectors = if self.config.eigenvectors {
            self.config.n_eigenvalues
        } else {
            0
        };
        let spectrum = FullDiagonalizer::new(self.config.memory_limit_bytes)
            .diagonalize(operator, n_vectors, comm)?;
        let count = self.config.n_eigenvalues.min(spectrum.eigenvalues.len());
        Ok(SolverResult {
            status: ConvergenceStatus::Exact,
            eigenvalues: spectrum.eigenvalues[..count].to_vec(),
            eigenvectors: spectrum.eigenvectors,
            iterations: 0,
            attempts: 0,
            residual: 0.0,
        })
    }

    /// Lanczos path with the restart policy. Collective.
    pub fn solve_lanczos<O>(&self, operator: &O, comm: &dyn Communicator) -> Result<SolverResult>
    where
        O: DistributedOperator + ?Sized,
    {
        let config = &self.config;
        let root = comm.rank() == 0;
        let start = start_vector(config.start_vector, config.seed, operator.layout(), comm)?;
        let mut engine = LanczosEngine::new(operator, start, config.lanczos_options(), comm)?;

        let mut restarts = 0;
        loop {
            let outcome = engine.run()?;
            let status = match outcome.state {
                LanczosState::Converged => ConvergenceStatus::Converged,
                LanczosState::Breakdown => {
                    if root {
                        log::warn!(
                            "Lanczos broke down after {} steps; returning {} exact eigenvalue(s)",
                            outcome.iterations,
                            outcome.eigenvalues.len()
                        );
                    }
                    ConvergenceStatus::Breakdown
                }
                _ => {
                    let estimate = outcome.eigenvalues.first().copied().unwrap_or(f64::NAN);
                    if restarts >= config.max_restarts {
                        return Err(ErrorKind::NotConverged {
                            attempts: restarts + 1,
                            estimate,
                        }
                        .into());
                    }
                    restarts += 1;
                    let seed = config.restart_seed(restarts)?;
                    if root {
                        log::warn!(
                            "Lanczos restart {restarts}/{} with seed {seed} \
                             (last estimate {estimate:.12})",
                            config.max_restarts
                        );
                    }
                    engine.restart(start_vector(
                        config.start_vector,
                        seed,
                        operator.layout(),
                        comm,
                    )?)?;
                    continue;
                }
            };

            let eigenvectors = if config.eigenvectors {
                engine.eigenvectors(config.n_eigenvalues)?
            } else {
                Vec::new()
            };
            return Ok(SolverResult {
                status,
                eigenvalues: outcome.eigenvalues,
                eigenvectors,
                iterations: outcome.iterations,
                attempts: restarts + 1,
                residual: outcome.residual,
            });
        }
    }
}

/// Builds the Hubbard Hamiltonian for `model` and solves it. Collective.
pub fn solve_model(
    model: &ModelDescriptor,
    config: &SolverConfig,
    comm: &dyn Communicator,
) -> Result<SolverResult> {
    let driver = SolverDriver::new(config.clone())?;
    let hamiltonian =
        HubbardHamiltonian::with_memory_limit(model, config.memory_limit_bytes, comm)?;
    if comm.rank() == 0 {
        log::info!(
            "Hubbard model: {} sites, {:?}, dim {}, {} rank(s)",
            model.sites(),
            hamiltonian.basis().sector(),
            hamiltonian.dim(),
            comm.size()
        );
    }
    driver.solve(&hamiltonian, comm)
}
