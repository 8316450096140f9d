//! Distributed symmetric Lanczos iteration for extremal eigenpairs.
//!
//! [`LanczosEngine`] drives the three-term recurrence
//!
//! ```text
//! beta_k v_{k+1} = H v_k - alpha_k v_k - beta_{k-1} v_{k-1}
//! ```
//!
//! one step at a time and projects `H` onto the Krylov subspace as the tridiagonal
//! matrix `T_m`. Every step is a sequence of collectives (one operator apply and a
//! handful of reductions), so all ranks must drive the engine in lockstep. The
//! scalar work (convergence checks, the `T_m` eigensolve) is repeated on every
//! rank from identical inputs, and no rank ever reads another rank's shard.
//!
//! The engine always holds `v_{k-1}` and `v_k`. What else it keeps depends on
//! the [`Reorthogonalization`] mode:
//!
//! - **`Full`**: every `v_k` is also copied into a [`KrylovBasis`], a local
//!   `n_local x m` column block. Each new vector is orthogonalized against the
//!   block with two passes of classical Gram-Schmidt: `c = V^T w` is one local
//!   matrix product plus one batched reduction, then `w -= V c`. Ritz vectors are
//!   the product `V Y`. Memory is `O(n m)`.
//! - **`None`**: nothing else is kept. Memory is `O(n)`. Ritz vectors are rebuilt
//!   afterwards by replaying the recurrence from the saved start vector with the
//!   stored `alphas`/`betas`, at the cost of `m - 1` further applies.

use super::{
    LanczosOptions, LanczosState, Reorthogonalization, SortOrder, Tridiagonal,
    tridiagonal::{self, TridiagonalEigen},
};
use crate::{
    comm::Communicator,
    error::{ErrorKind, Result},
    operator::DistributedOperator,
    random::RandomStream,
    vector::{DistributedVector, ShardLayout},
};
use faer::{Accum, ColRef, Mat, MatRef, Par, linalg::matmul::matmul};
use serde::{Deserialize, Serialize};

/// Columns a [`KrylovBasis`] reserves on its first growth.
const BASIS_MIN_COLUMNS: usize = 16;

/// How the first Krylov vector is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StartVector {
    /// Uniform amplitudes in `[-1, 1)` from the stream seeded by `initial_iv`.
    #[default]
    Random,
    /// A single 1.0 at global index `((dim / 2 + initial_iv) mod dim + 1) mod dim`.
    Unit,
}

/// Global position of the [`StartVector::Unit`] amplitude.
///
/// The offset `dim / 2 + initial_iv` is reduced modulo `dim` and shifted one
/// place up; the shift can run off the end, which wraps to index 0.
pub fn unit_start_index(dim: usize, initial_iv: i64) -> Result<usize> {
    if dim == 0 {
        return Err(ErrorKind::InvalidConfig("empty Hilbert space".into()).into());
    }
    let dim = i128::try_from(dim)
        .map_err(|_| ErrorKind::InvalidConfig(format!("dimension {dim} out of range")))?;
    let offset = (dim / 2 + i128::from(initial_iv)).rem_euclid(dim);
    let index = (offset + 1) % dim;
    // `index < dim`, which came from a usize.
    Ok(index as usize)
}

/// Builds the (unnormalized) start vector on this rank's shard. Collective only
/// in the sense that every rank must call it with the same arguments.
pub fn start_vector(
    kind: StartVector,
    initial_iv: i64,
    layout: &ShardLayout,
    comm: &dyn Communicator,
) -> Result<DistributedVector> {
    let mut v = DistributedVector::zeros(layout, comm)?;
    match kind {
        StartVector::Random => {
            let mut stream = RandomStream::from_initial_iv(initial_iv);
            v.set_random(&mut stream)?;
        }
        StartVector::Unit => {
            v.set_unit(unit_start_index(layout.dim(), initial_iv)?)?;
        }
    }
    Ok(v)
}

/// This rank's rows of the Krylov basis `V = [v_0 .. v_{m-1}]`, one column per
/// vector. The block grows by doubling and keeps its allocation across
/// [`KrylovBasis::clear`].
#[derive(Debug, Clone)]
pub struct KrylovBasis {
    block: Mat<f64>,
    len: usize,
}

impl KrylovBasis {
    pub fn new(local_len: usize) -> Self {
        Self {
            block: Mat::zeros(local_len, 0),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `v` as the next column.
    pub fn push(&mut self, v: &DistributedVector) -> Result<()> {
        let rows = self.block.nrows();
        if v.local().len() != rows {
            return Err(ErrorKind::DimensionMismatch {
                expected: rows,
                actual: v.local().len(),
            }
            .into());
        }
        if self.len == self.block.ncols() {
            let columns = (2 * self.len).max(BASIS_MIN_COLUMNS);
            self.block.resize_with(rows, columns, |_, _| 0.0);
        }
        self.block.col_mut(self.len).copy_from(v.as_mat().col(0));
        self.len += 1;
        Ok(())
    }

    /// The retained vectors as an `n_local x len` view.
    pub fn vectors(&self) -> MatRef<'_, f64> {
        self.leading(self.len)
    }

    /// The first `min(count, len)` vectors.
    pub fn leading(&self, count: usize) -> MatRef<'_, f64> {
        self.block.as_ref().get(.., 0..count.min(self.len))
    }

    pub fn column(&self, k: usize) -> Option<ColRef<'_, f64>> {
        (k < self.len).then(|| self.block.col(k))
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// Orthogonalizes `w` against every column of `basis`.
///
/// Two classical Gram-Schmidt passes. Each computes the local part of `V^T w`
/// with one matrix product, sums it across ranks with a single reduction and
/// subtracts `V c`. The second pass mops up what cancellation left behind in
/// the first.
fn reorthogonalize(
    w: &mut DistributedVector,
    basis: &KrylovBasis,
    comm: &dyn Communicator,
) -> Result<()> {
    let v = basis.vectors();
    let mut coefficients = Mat::<f64>::zeros(v.ncols(), 1);
    for _ in 0..2 {
        matmul(
            coefficients.as_mut(),
            Accum::Replace,
            v.transpose(),
            w.as_mat(),
            1.0,
            Par::Seq,
        );
        comm.all_reduce_sum(coefficients.col_as_slice_mut(0))?;
        matmul(
            w.as_mat_mut(),
            Accum::Add,
            v,
            coefficients.as_ref(),
            -1.0,
            Par::Seq,
        );
    }
    Ok(())
}

/// Progress of the eigenvalue estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceState {
    /// Lanczos steps taken (`m`).
    pub iterations: usize,
    /// Lowest Ritz values at the last check, ascending.
    pub estimates: Vec<f64>,
    /// Largest change of any estimate between the last two checks.
    pub delta: Option<f64>,
    /// `|beta_m y_m|` for the lowest Ritz pair, known once the run terminates.
    pub residual: Option<f64>,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanczosOutcome {
    pub state: LanczosState,
    pub iterations: usize,
    /// The lowest `min(n_eigenvalues, iterations)` Ritz values, ascending.
    pub eigenvalues: Vec<f64>,
    pub residual: f64,
}

/// The Lanczos state machine: `Init -> Iterating -> Converged | MaxIterReached | Breakdown`.
pub struct LanczosEngine<'a, O: DistributedOperator + ?Sized> {
    operator: &'a O,
    comm: &'a dyn Communicator,
    options: LanczosOptions,
    state: LanczosState,
    /// Normalized `v_0`, kept for replay and restarts.
    start: DistributedVector,
    v_prev: DistributedVector,
    v_curr: DistributedVector,
    /// Holds `w` during a step.
    work: DistributedVector,
    /// Present in `Full` mode only.
    basis: Option<KrylovBasis>,
    tridiagonal: Tridiagonal,
    /// `beta_m`, the norm of the residual direction after the last step.
    trailing_beta: f64,
    convergence: ConvergenceState,
    ritz: Option<TridiagonalEigen>,
}

impl<'a, O: DistributedOperator + ?Sized> LanczosEngine<'a, O> {
    /// Prepares a Lanczos run on `operator` from the vector `start`.
    ///
    /// Nothing is applied yet; the first call to [`LanczosEngine::step`] takes
    /// the engine out of `Init`. Options and the vector layout are validated
    /// before the only collective here (normalizing `start`), so bad input fails
    /// identically on every rank instead of leaving some ranks waiting.
    ///
    /// # Arguments
    /// * `operator` - The symmetric operator `H`, sharded like `start`.
    /// * `start` - This rank's shard of `v_0`. It need not be normalized, but it
    ///   must not be the zero vector.
    /// * `options` - Iteration limits, tolerances and the reorthogonalization mode.
    /// * `comm` - The rank group every collective of the run goes through.
    ///
    /// # Returns
    /// An engine in state [`LanczosState::Init`], or `InvalidConfig` /
    /// `DimensionMismatch` when the options or the start vector are unusable.
    pub fn new(
        operator: &'a O,
        start: DistributedVector,
        options: LanczosOptions,
        comm: &'a dyn Communicator,
    ) -> Result<Self> {
        options.validate()?;
        operator.check_vector(&start)?;
        let layout = operator.layout();
        let basis = match options.reorthogonalization {
            Reorthogonalization::Full => Some(KrylovBasis::new(start.local().len())),
            Reorthogonalization::None => None,
        };
        let mut engine = Self {
            operator,
            comm,
            options,
            state: LanczosState::Init,
            start,
            v_prev: DistributedVector::zeros(layout, comm)?,
            v_curr: DistributedVector::zeros(layout, comm)?,
            work: DistributedVector::zeros(layout, comm)?,
            basis,
            tridiagonal: Tridiagonal::default(),
            trailing_beta: 0.0,
            convergence: ConvergenceState::default(),
            ritz: None,
        };
        engine.start.normalize(comm)?;
        Ok(engine)
    }

    /// Discards the current Krylov space and starts over from `start`.
    pub fn restart(&mut self, start: DistributedVector) -> Result<()> {
        self.operator.check_vector(&start)?;
        self.start = start;
        self.start.normalize(self.comm)?;
        if let Some(basis) = &mut self.basis {
            basis.clear();
        }
        self.tridiagonal.clear();
        self.trailing_beta = 0.0;
        self.convergence = ConvergenceState::default();
        self.ritz = None;
        self.state = LanczosState::Init;
        Ok(())
    }

    pub fn state(&self) -> LanczosState {
        self.state
    }

    pub fn options(&self) -> &LanczosOptions {
        &self.options
    }

    pub fn tridiagonal(&self) -> &Tridiagonal {
        &self.tridiagonal
    }

    pub fn convergence(&self) -> &ConvergenceState {
        &self.convergence
    }

    pub fn iterations(&self) -> usize {
        self.tridiagonal.len()
    }

    fn is_root(&self) -> bool {
        self.comm.rank() == 0
    }

    /// Performs one Lanczos step and returns the resulting state. Collective.
    ///
    /// Calling `step` on a terminated engine is a no-op.
    pub fn step(&mut self) -> Result<LanczosState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        if self.state == LanczosState::Init {
            self.v_curr.copy_from(&self.start)?;
            self.v_prev.fill(0.0);
            if let Some(basis) = &mut self.basis {
                basis.push(&self.start)?;
            }
            self.state = LanczosState::Iterating;
            if self.is_root() {
                log::info!(
                    "Lanczos start: dim {}, {:?} reorthogonalization, up to {} steps",
                    self.operator.dim(),
                    self.options.reorthogonalization,
                    self.options.max_iterations
                );
            }
        }

        let k = self.tridiagonal.len();
        let beta_prev = if k == 0 {
            0.0
        } else {
            self.tridiagonal.betas[k - 1]
        };

        let alpha = if k == 0 {
            // First multiply: <v_0|H|v_0> comes out of the apply itself.
            let alpha = self.operator.apply_with_expectation(
                &self.v_curr,
                &mut self.work,
                self.comm,
            )?;
            self.work.axpy(-alpha, &self.v_curr)?;
            alpha
        } else {
            self.operator.apply(&self.v_curr, &mut self.work, self.comm)?;
            self.work.axpy(-beta_prev, &self.v_prev)?;
            let alpha = self.work.dot(&self.v_curr, self.comm)?;
            self.work.axpy(-alpha, &self.v_curr)?;
            alpha
        };

        if let Some(basis) = &self.basis {
            reorthogonalize(&mut self.work, basis, self.comm)?;
        }
        let beta = self.work.norm(self.comm)?;
        self.tridiagonal.alphas.push(alpha);
        self.trailing_beta = beta;
        let m = k + 1;
        self.convergence.iterations = m;

        let threshold = self.options.breakdown_tolerance * alpha.abs().max(beta_prev).max(1.0);
        if beta <= threshold || m >= self.operator.dim() {
            self.update_estimates()?;
            self.state = LanczosState::Breakdown;
            if self.is_root() {
                log::warn!(
                    "Lanczos breakdown at step {m}: beta = {beta:.3e}; Krylov space is invariant"
                );
            }
            self.finish()?;
            return Ok(self.state);
        }

        // v_{k+1} = w / beta_k; the old v_{k-1} buffer becomes the next `work`.
        self.work.scale(1.0 / beta);
        self.tridiagonal.betas.push(beta);
        std::mem::swap(&mut self.v_prev, &mut self.v_curr);
        std::mem::swap(&mut self.v_curr, &mut self.work);
        if let Some(basis) = &mut self.basis {
            basis.push(&self.v_curr)?;
        }

        let due = m % self.options.check_interval == 0 || m >= self.options.max_iterations;
        if due && self.update_estimates()? {
            self.state = LanczosState::Converged;
        } else if m >= self.options.max_iterations {
            self.state = LanczosState::MaxIterReached;
            if self.is_root() {
                log::warn!(
                    "Lanczos reached max_iterations = {} without converging (delta = {:?})",
                    self.options.max_iterations,
                    self.convergence.delta
                );
            }
        }
        if self.state.is_terminal() {
            self.finish()?;
        }
        Ok(self.state)
    }

    /// Re-solves `T_m` for the lowest eigenvalues and reports whether they
    /// have settled.
    fn update_estimates(&mut self) -> Result<bool> {
        let m = self.tridiagonal.len();
        let wanted = self.options.n_eigenvalues;
        let estimates = tridiagonal::lowest_eigenvalues(
            &self.tridiagonal.alphas,
            self.tridiagonal.off_diagonal(),
            wanted,
        )?;
        let previous = std::mem::replace(&mut self.convergence.estimates, estimates);
        let current = &self.convergence.estimates;
        if previous.len() != current.len() || current.is_empty() {
            return Ok(false);
        }
        let delta = current
            .iter()
            .zip(&previous)
            .map(|(c, p)| (c - p).abs())
            .fold(0.0, f64::max);
        self.convergence.delta = Some(delta);
        if self.is_root() {
            log::debug!("step {m}: E0 = {:.15}, delta = {delta:.3e}", current[0]);
        }
        let settled = current
            .iter()
            .zip(&previous)
            .all(|(c, p)| (c - p).abs() < self.options.tolerance * c.abs().max(1.0));
        Ok(settled && current.len() == wanted && m > wanted)
    }

    /// Dense solve of the final `T_m` and the residual estimate.
    fn finish(&mut self) -> Result<()> {
        let ritz = tridiagonal::solve(
            &self.tridiagonal.alphas,
            self.tridiagonal.off_diagonal(),
            SortOrder::Ascending,
        )?;
        let m = ritz.values.len();
        let residual = if m == 0 {
            0.0
        } else {
            (self.trailing_beta * ritz.vectors[(m - 1, 0)]).abs()
        };
        self.convergence.residual = Some(residual);
        if self.is_root() {
            log::info!(
                "Lanczos end: {:?} after {m} steps, E0 = {:.15}, residual = {residual:.3e}",
                self.state,
                ritz.values.first().copied().unwrap_or(f64::NAN)
            );
        }
        self.ritz = Some(ritz);
        Ok(())
    }

    /// Steps until a terminal state is reached. Collective.
    pub fn run(&mut self) -> Result<LanczosOutcome> {
        while !self.state.is_terminal() {
            self.step()?;
        }
        self.outcome()
    }

    /// The result of a terminated run.
    pub fn outcome(&self) -> Result<LanczosOutcome> {
        let ritz = self.ritz.as_ref().ok_or_else(|| {
            ErrorKind::InvalidConfig("Lanczos run has not terminated".into())
        })?;
        let count = self.options.n_eigenvalues.min(ritz.values.len());
        Ok(LanczosOutcome {
            state: self.state,
            iterations: self.iterations(),
            eigenvalues: ritz.values[..count].to_vec(),
            residual: self.convergence.residual.unwrap_or(0.0),
        })
    }

    /// Visits this rank's shard of `v_0 .. v_{m-1}` in order. Collective in
    /// `None` mode, where the basis is regenerated from the start vector.
    pub fn for_each_basis_vector<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(usize, ColRef<'_, f64>) -> Result<()>,
    {
        let m = self.tridiagonal.len();
        match &self.basis {
            Some(basis) => {
                for j in 0..m {
                    let v = basis.column(j).ok_or_else(|| {
                        ErrorKind::InvalidConfig(format!("Krylov vector {j} was never stored"))
                    })?;
                    visit(j, v)?;
                }
            }
            None => {
                let layout = self.operator.layout();
                let mut prev = DistributedVector::zeros(layout, self.comm)?;
                let mut curr = self.start.clone();
                let mut next = DistributedVector::zeros(layout, self.comm)?;
                for j in 0..m {
                    visit(j, curr.as_mat().col(0))?;
                    if j + 1 == m {
                        break;
                    }
                    // Same operation order as `step`, so the replayed basis is
                    // bitwise identical for a fixed partition.
                    self.operator.apply(&curr, &mut next, self.comm)?;
                    if j > 0 {
                        next.axpy(-self.tridiagonal.betas[j - 1], &prev)?;
                    }
                    next.axpy(-self.tridiagonal.alphas[j], &curr)?;
                    next.scale(1.0 / self.tridiagonal.betas[j]);
                    std::mem::swap(&mut prev, &mut curr);
                    std::mem::swap(&mut curr, &mut next);
                }
            }
        }
        Ok(())
    }

    /// Normalized Ritz vectors for the lowest `count` Ritz values. Collective.
    ///
    /// With a stored basis this is the single product `V Y`, where the columns
    /// of `Y` are the wanted eigenvectors of `T_m`. Without one, the basis is
    /// replayed and each `v_j` contributes the rank-one update `v_j Y[j, :]`.
    pub fn eigenvectors(&self, count: usize) -> Result<Vec<DistributedVector>> {
        let ritz = self.ritz.as_ref().ok_or_else(|| {
            ErrorKind::InvalidConfig("eigenvectors requested before the run terminated".into())
        })?;
        let m = ritz.values.len();
        let count = count.min(m);
        let y = ritz.vectors.as_ref().get(.., 0..count);
        let mut block = Mat::<f64>::zeros(self.start.local().len(), count);
        match &self.basis {
            Some(basis) => matmul(
                block.as_mut(),
                Accum::Replace,
                basis.leading(m),
                y,
                1.0,
                Par::Seq,
            ),
            None => self.for_each_basis_vector(|j, v| {
                matmul(block.as_mut(), Accum::Add, v, y.row(j), 1.0, Par::Seq);
                Ok(())
            })?,
        }

        let mut vectors = Vec::with_capacity(count);
        for i in 0..count {
            let mut x = DistributedVector::zeros(self.operator.layout(), self.comm)?;
            x.as_mat_mut().col_mut(0).copy_from(block.col(i));
            x.normalize(self.comm)?;
            vectors.push(x);
        }
        Ok(vectors)
    }
}
