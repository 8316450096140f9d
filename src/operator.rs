//! This module defines the core abstraction for distributed linear operators.
//!
//! Lanczos never needs individual matrix elements. It only needs the
//! matrix-vector product `w = H v`. Writing the engine against that action alone
//! makes it "matrix-free":
//! 1.  **Generality**: The same engine drives the implicit Hubbard Hamiltonian,
//!     whose matrix is never stored, and simple diagonal test operators.
//! 2.  **Distribution**: The product is a collective. An operator may exchange
//!     data with other ranks while applying, but it only ever reads and writes the
//!     caller's own shards.
//! 3.  **Testability**: Operators with a known spectrum can be plugged in to
//!     validate the engine before it is trusted on physics problems.
//!
//! [`DistributedOperator`] captures the matrix-free contract. [`AssembleDense`] is
//! the optional capability the full-diagonalization fallback needs: writing the
//! whole matrix out densely.

use crate::{
    comm::Communicator,
    error::{ErrorKind, Result},
    vector::{DistributedVector, ShardLayout},
};
use faer::Mat;

/// A real symmetric operator acting on sharded vectors.
pub trait DistributedOperator {
    /// Global dimension of the operator.
    fn dim(&self) -> usize;

    /// The shard layout operands and results must share.
    fn layout(&self) -> &ShardLayout;

    /// Computes `out = H v` on this rank's shard. Collective.
    ///
    /// Implementations must validate `v` and `out` with [`Self::check_vector`]
    /// before entering any collective, so a malformed call fails on every rank
    /// without leaving peers waiting.
    fn apply(
        &self,
        v: &DistributedVector,
        out: &mut DistributedVector,
        comm: &dyn Communicator,
    ) -> Result<()>;

    /// Computes `out = H v` and returns `<v, H v>`. Collective.
    ///
    /// This is the "first multiply" of a Lanczos run. Its expectation value is
    /// the first diagonal element of the tridiagonal matrix.
    fn apply_with_expectation(
        &self,
        v: &DistributedVector,
        out: &mut DistributedVector,
        comm: &dyn Communicator,
    ) -> Result<f64> {
        self.apply(v, out, comm)?;
        v.dot(out, comm)
    }

    /// Fails with `DimensionMismatch` unless `v` uses this operator's layout.
    fn check_vector(&self, v: &DistributedVector) -> Result<()> {
        if v.dim() != self.dim() {
            return Err(ErrorKind::DimensionMismatch {
                expected: self.dim(),
                actual: v.dim(),
            }
            .into());
        }
        if v.layout() != self.layout() {
            let expected = self.layout().local_len(v.rank());
            return Err(ErrorKind::DimensionMismatch {
                expected,
                actual: v.local().len(),
            }
            .into());
        }
        Ok(())
    }
}

/// Operators that can write themselves out as a dense matrix.
pub trait AssembleDense {
    /// The full `dim x dim` matrix. Callers check memory before calling this.
    fn assemble_dense(&self) -> Mat<f64>;
}

/// A diagonal operator with a prescribed spectrum.
///
/// Applying it needs no communication. Its eigenpairs are known exactly, which
/// makes it the reference problem for engine tests.
#[derive(Debug, Clone)]
pub struct DiagonalOperator {
    diagonal: Vec<f64>,
    layout: ShardLayout,
}

impl DiagonalOperator {
    pub fn new(diagonal: Vec<f64>, comm: &dyn Communicator) -> Self {
        let layout = ShardLayout::balanced(diagonal.len(), comm.size());
        Self { diagonal, layout }
    }

    pub fn diagonal(&self) -> &[f64] {
        &self.diagonal
    }
}

impl DistributedOperator for DiagonalOperator {
    fn dim(&self) -> usize {
        self.diagonal.len()
    }

    fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    fn apply(
        &self,
        v: &DistributedVector,
        out: &mut DistributedVector,
        _comm: &dyn Communicator,
    ) -> Result<()> {
        self.check_vector(v)?;
        self.check_vector(out)?;
        let range = v.global_range();
        let d = &self.diagonal[range];
        for ((o, &x), &di) in out.local_mut().iter_mut().zip(v.local()).zip(d) {
            *o = di * x;
        }
        Ok(())
    }
}

impl AssembleDense for DiagonalOperator {
    fn assemble_dense(&self) -> Mat<f64> {
        let n = self.diagonal.len();
        Mat::from_fn(n, n, |i, j| if i == j { self.diagonal[i] } else { 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;

    #[test]
    fn test_diagonal_operator_apply() {
        let op = DiagonalOperator::new(vec![1.0, -2.0, 3.0], &SelfComm);
        let v = DistributedVector::from_fn(op.layout(), &SelfComm, |i| (i + 1) as f64).unwrap();
        let mut out = DistributedVector::zeros(op.layout(), &SelfComm).unwrap();
        let expectation = op.apply_with_expectation(&v, &mut out, &SelfComm).unwrap();
        assert_eq!(out.local(), &[1.0, -4.0, 9.0]);
        assert_eq!(expectation, 1.0 - 8.0 + 27.0);
    }

    #[test]
    fn test_dimension_mismatch_is_reported() {
        let op = DiagonalOperator::new(vec![1.0, 2.0], &SelfComm);
        let layout = ShardLayout::balanced(3, 1);
        let v = DistributedVector::zeros(&layout, &SelfComm).unwrap();
        let mut out = DistributedVector::zeros(&layout, &SelfComm).unwrap();
        let err = op.apply(&v, &mut out, &SelfComm).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_assemble_dense_matches_apply() {
        let op = DiagonalOperator::new(vec![0.5, 1.5], &SelfComm);
        let dense = op.assemble_dense();
        assert_eq!(dense[(0, 0)], 0.5);
        assert_eq!(dense[(1, 1)], 1.5);
        assert_eq!(dense[(0, 1)], 0.0);
    }
}
