//! Dense fallback for small Hilbert spaces.
//!
//! Below a few thousand states it is cheaper and more robust to write `H` out and
//! diagonalize it exactly than to iterate. Every rank assembles the same dense
//! matrix and runs the same faer eigendecomposition, so no communication is
//! needed and all ranks agree on the spectrum. Requested eigenvectors are then
//! cut into shards of the operator's layout.

use super::SortOrder;
use crate::{
    comm::Communicator,
    error::{ErrorKind, Result},
    operator::{AssembleDense, DistributedOperator},
    vector::DistributedVector,
};
use faer::Side;

/// Every eigenvalue and the lowest few eigenvectors of a dense diagonalization.
#[derive(Debug, Clone)]
pub struct FullSpectrum {
    /// All `dim` eigenvalues.
    pub eigenvalues: Vec<f64>,
    pub eigenvectors: Vec<DistributedVector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullDiagonalizer {
    memory_limit_bytes: u64,
    order: SortOrder,
}

impl FullDiagonalizer {
    pub fn new(memory_limit_bytes: u64) -> Self {
        Self {
            memory_limit_bytes,
            order: SortOrder::Ascending,
        }
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Bytes needed for the dense matrix plus its eigenvector matrix.
    pub fn required_bytes(dim: usize) -> u128 {
        2 * (dim as u128) * (dim as u128) * std::mem::size_of::<f64>() as u128
    }

    /// Fails with `OutOfMemory` if a `dim x dim` problem exceeds the limit.
    pub fn check_memory(&self, dim: usize) -> Result<()> {
        let required_bytes = Self::required_bytes(dim);
        let limit_bytes = self.memory_limit_bytes as u128;
        if required_bytes > limit_bytes {
            return Err(ErrorKind::OutOfMemory {
                required_bytes,
                limit_bytes,
            }
            .into());
        }
        Ok(())
    }

    /// Diagonalizes `operator` and returns all eigenvalues plus the first
    /// `n_vectors` eigenvectors as shards.
    ///
    /// Every rank assembles and diagonalizes the same dense matrix, then keeps
    /// only its own block of each eigenvector. No communication takes place.
    ///
    /// # Arguments
    /// * `operator` - The operator to diagonalize; it must support dense assembly.
    /// * `n_vectors` - How many of the lowest eigenvectors to return, at most `dim`.
    /// * `comm` - The rank group the operator is sharded over.
    ///
    /// # Returns
    /// The full spectrum in ascending order, or `OutOfMemory` when the dense
    /// matrix would not fit in `memory_limit_bytes`. The memory check runs before
    /// anything is allocated.
    pub fn diagonalize<O>(
        &self,
        operator: &O,
        n_vectors: usize,
        comm: &dyn Communicator,
    ) -> Result<FullSpectrum>
    where
        O: DistributedOperator + AssembleDense + ?Sized,
    {
        let dim = operator.dim();
        self.check_memory(dim)?;
        operator.layout().check_group(comm)?;
        if comm.rank() == 0 {
            log::info!(
                "Full diagonalization start: dim {dim}, {} MiB",
                Self::required_bytes(dim) >> 20
            );
        }
        if dim == 0 {
            return Ok(FullSpectrum {
                eigenvalues: Vec::new(),
                eigenvectors: Vec::new(),
            });
        }

        let h = operator.assemble_dense();
        let evd = h.as_ref().self_adjoint_eigen(Side::Lower)?;
        let s = evd.S();
        let u = evd.U();
        let column = |k: usize| match self.order {
            SortOrder::Ascending => k,
            SortOrder::Descending => dim - 1 - k,
        };

        let eigenvalues: Vec<f64> = (0..dim).map(|k| s[column(k)]).collect();
        let eigenvectors = (0..n_vectors.min(dim))
            .map(|k| DistributedVector::from_fn(operator.layout(), comm, |i| u[(i, column(k))]))
            .collect::<Result<Vec<_>>>()?;

        if comm.rank() == 0 {
            log::info!("Full diagonalization end: E0 = {:.15}", eigenvalues[0]);
        }
        Ok(FullSpectrum {
            eigenvalues,
            eigenvectors,
        })
    }
}
