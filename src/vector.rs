//! Vectors over the many-body Hilbert space, sharded across ranks.
//!
//! A [`ShardLayout`] splits the global index range `0..dim` into one contiguous
//! block per rank. Concatenating the blocks in rank order gives back `0..dim`
//! with no gaps or overlap. A [`DistributedVector`] owns the amplitudes of exactly
//! one block, stored as an `n_local x 1` faer matrix so that the local kernels
//! (and the block products in Lanczos) run through faer. Everything that needs
//! data from other ranks goes through a [`Communicator`]:
//!
//! - `dot`, `norm` and `normalize` are **collective**. Every rank must call them,
//!   in the same order, or the group stalls.
//! - `axpy`, `scale`, `copy_from` and `fill` are purely local.

use crate::{
    comm::Communicator,
    error::{ErrorKind, Result},
    random::{Interval, RandomStream},
};
use faer::{
    Conj, Mat, MatMut, MatRef,
    linalg::matmul::dot::inner_prod,
    unzip, zip,
};
use std::{ops::Range, sync::Arc};

/// Contiguous partition of `0..dim` into one block per rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLayout {
    /// `bounds[r]..bounds[r + 1]` is the block of rank `r`.
    bounds: Arc<[usize]>,
}

impl ShardLayout {
    /// Splits `dim` into `parts` blocks whose lengths differ by at most one,
    /// the longer blocks first.
    pub fn balanced(dim: usize, parts: usize) -> Self {
        let parts = parts.max(1);
        let base = dim / parts;
        let extra = dim % parts;
        let lengths: Vec<usize> = (0..parts)
            .map(|r| base + usize::from(r < extra))
            .collect();
        Self::from_lengths(&lengths)
    }

    /// Builds a layout from explicit per-rank block lengths.
    pub fn from_lengths(lengths: &[usize]) -> Self {
        let mut bounds = Vec::with_capacity(lengths.len() + 1);
        bounds.push(0);
        let mut acc = 0;
        for len in lengths {
            acc += len;
            bounds.push(acc);
        }
        Self {
            bounds: bounds.into(),
        }
    }

    pub fn dim(&self) -> usize {
        self.bounds[self.bounds.len() - 1]
    }

    pub fn parts(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn range(&self, rank: usize) -> Range<usize> {
        self.bounds[rank]..self.bounds[rank + 1]
    }

    pub fn local_len(&self, rank: usize) -> usize {
        self.bounds[rank + 1] - self.bounds[rank]
    }

    /// The rank whose block contains the global `index`.
    ///
    /// # Panics
    /// Panics if `index >= dim()`.
    pub fn owner(&self, index: usize) -> usize {
        assert!(index < self.dim(), "index {index} outside 0..{}", self.dim());
        // Empty blocks share a bound with their neighbour; the last matching bound wins.
        self.bounds.partition_point(|&b| b <= index) - 1
    }

    /// Fails unless this layout has exactly one block per rank of `comm`.
    pub fn check_group(&self, comm: &dyn Communicator) -> Result<()> {
        if self.parts() != comm.size() {
            return Err(ErrorKind::InvalidConfig(format!(
                "layout has {} shards but the group has {} ranks",
                self.parts(),
                comm.size()
            ))
            .into());
        }
        Ok(())
    }
}

/// One rank's shard of a global real vector.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedVector {
    layout: ShardLayout,
    rank: usize,
    /// `local_len x 1`.
    local: Mat<f64>,
}

impl DistributedVector {
    /// Allocates the zero vector on this rank's shard of `layout`.
    pub fn zeros(layout: &ShardLayout, comm: &dyn Communicator) -> Result<Self> {
        layout.check_group(comm)?;
        Ok(Self {
            layout: layout.clone(),
            rank: comm.rank(),
            local: Mat::zeros(layout.local_len(comm.rank()), 1),
        })
    }

    /// Wraps an existing shard.
    pub fn from_local(layout: &ShardLayout, rank: usize, local: Vec<f64>) -> Result<Self> {
        let expected = layout.local_len(rank);
        if local.len() != expected {
            return Err(ErrorKind::DimensionMismatch {
                expected,
                actual: local.len(),
            }
            .into());
        }
        Ok(Self {
            layout: layout.clone(),
            rank,
            local: Mat::from_fn(expected, 1, |i, _| local[i]),
        })
    }

    /// Builds this rank's shard from a function of the global index.
    pub fn from_fn(
        layout: &ShardLayout,
        comm: &dyn Communicator,
        f: impl Fn(usize) -> f64,
    ) -> Result<Self> {
        layout.check_group(comm)?;
        let range = layout.range(comm.rank());
        Ok(Self {
            layout: layout.clone(),
            rank: comm.rank(),
            local: Mat::from_fn(range.len(), 1, |i, _| f(range.start + i)),
        })
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dim(&self) -> usize {
        self.layout.dim()
    }

    /// Global index range owned by this shard.
    pub fn global_range(&self) -> Range<usize> {
        self.layout.range(self.rank)
    }

    pub fn local(&self) -> &[f64] {
        self.local.col_as_slice(0)
    }

    pub fn local_mut(&mut self) -> &mut [f64] {
        self.local.col_as_slice_mut(0)
    }

    pub fn into_local(self) -> Vec<f64> {
        self.local().to_vec()
    }

    /// The shard as an `n_local x 1` matrix view.
    pub fn as_mat(&self) -> MatRef<'_, f64> {
        self.local.as_ref()
    }

    pub fn as_mat_mut(&mut self) -> MatMut<'_, f64> {
        self.local.as_mut()
    }

    /// Fails unless `other` has the same dimension and shard boundaries.
    pub fn check_compatible(&self, other: &DistributedVector) -> Result<()> {
        if self.layout != other.layout || self.rank != other.rank {
            let (expected, actual) = if self.dim() != other.dim() {
                (self.dim(), other.dim())
            } else {
                (self.local.nrows(), other.local.nrows())
            };
            return Err(ErrorKind::DimensionMismatch { expected, actual }.into());
        }
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        zip!(self.local.col_mut(0)).for_each(|unzip!(x)| *x = value);
    }

    /// Sets every amplitude to `2 (u - 1/2)`, where `u` is the uniform draw
    /// whose draw index equals the amplitude's global index.
    pub fn set_random(&mut self, stream: &mut RandomStream) -> Result<()> {
        stream.seek(self.global_range().start as u64)?;
        stream.fill_uniform(self.local_mut(), Interval::ClosedOpen)?;
        zip!(self.local.col_mut(0)).for_each(|unzip!(x)| *x = 2.0 * (*x - 0.5));
        Ok(())
    }

    /// Sets the vector to the global unit vector `e_index`.
    pub fn set_unit(&mut self, index: usize) -> Result<()> {
        if index >= self.dim() {
            return Err(ErrorKind::DimensionMismatch {
                expected: self.dim(),
                actual: index + 1,
            }
            .into());
        }
        self.fill(0.0);
        let range = self.global_range();
        if range.contains(&index) {
            self.local[(index - range.start, 0)] = 1.0;
        }
        Ok(())
    }

    pub fn copy_from(&mut self, other: &DistributedVector) -> Result<()> {
        self.check_compatible(other)?;
        self.local.col_mut(0).copy_from(other.local.col(0));
        Ok(())
    }

    /// `self += alpha * x`, local.
    pub fn axpy(&mut self, alpha: f64, x: &DistributedVector) -> Result<()> {
        self.check_compatible(x)?;
        zip!(self.local.col_mut(0), x.local.col(0)).for_each(|unzip!(y, x)| *y += alpha * *x);
        Ok(())
    }

    /// `self *= alpha`, local.
    pub fn scale(&mut self, alpha: f64) {
        zip!(self.local.col_mut(0)).for_each(|unzip!(x)| *x *= alpha);
    }

    fn local_dot(&self, other: &DistributedVector) -> f64 {
        inner_prod(
            self.local.col(0).transpose(),
            Conj::No,
            other.local.col(0),
            Conj::No,
        )
    }

    /// Global inner product. Collective.
    pub fn dot(&self, other: &DistributedVector, comm: &dyn Communicator) -> Result<f64> {
        self.check_compatible(other)?;
        comm.reduce_sum(self.local_dot(other))
    }

    /// Euclidean norm. Collective.
    pub fn norm(&self, comm: &dyn Communicator) -> Result<f64> {
        let local = self.local.col(0).squared_norm_l2();
        Ok(comm.reduce_sum(local)?.max(0.0).sqrt())
    }

    /// Scales to unit norm and returns the norm it had. Collective.
    ///
    /// A zero vector is left untouched and reported as an invalid start vector.
    pub fn normalize(&mut self, comm: &dyn Communicator) -> Result<f64> {
        let norm = self.norm(comm)?;
        if norm == 0.0 || !norm.is_finite() {
            return Err(ErrorKind::InvalidConfig(format!(
                "cannot normalize a vector of norm {norm}"
            ))
            .into());
        }
        self.scale(1.0 / norm);
        Ok(norm)
    }

    /// Assembles the full vector on every rank. Collective.
    pub fn gather(&self, comm: &dyn Communicator) -> Result<Vec<f64>> {
        Ok(comm.all_gather(self.local())?.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SelfComm, ThreadGroup};

    #[test]
    fn test_balanced_layout_covers_range_once() {
        let layout = ShardLayout::balanced(10, 3);
        assert_eq!(layout.parts(), 3);
        assert_eq!(layout.range(0), 0..4);
        assert_eq!(layout.range(1), 4..7);
        assert_eq!(layout.range(2), 7..10);
        for i in 0..10 {
            assert!(layout.range(layout.owner(i)).contains(&i));
        }
    }

    #[test]
    fn test_owner_skips_empty_shards() {
        let layout = ShardLayout::from_lengths(&[2, 0, 3]);
        assert_eq!(layout.owner(1), 0);
        assert_eq!(layout.owner(2), 2);
        assert_eq!(layout.owner(4), 2);
    }

    #[test]
    fn test_dot_is_non_negative_and_norm_consistent() {
        let layout = ShardLayout::balanced(50, 1);
        let mut stream = RandomStream::initialize(3);
        let mut v = DistributedVector::zeros(&layout, &SelfComm).unwrap();
        v.set_random(&mut stream).unwrap();
        let vv = v.dot(&v, &SelfComm).unwrap();
        assert!(vv >= 0.0);
        assert!((v.norm(&SelfComm).unwrap() - vv.sqrt()).abs() < 1e-14);
        v.normalize(&SelfComm).unwrap();
        assert!((v.norm(&SelfComm).unwrap() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn test_axpy_and_scale() {
        let layout = ShardLayout::balanced(4, 1);
        let x = DistributedVector::from_fn(&layout, &SelfComm, |i| i as f64).unwrap();
        let mut y = DistributedVector::from_fn(&layout, &SelfComm, |_| 1.0).unwrap();
        y.axpy(2.0, &x).unwrap();
        y.scale(0.5);
        assert_eq!(y.local(), &[0.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_mismatched_vectors_are_rejected() {
        let a = DistributedVector::zeros(&ShardLayout::balanced(4, 1), &SelfComm).unwrap();
        let mut b = DistributedVector::zeros(&ShardLayout::balanced(5, 1), &SelfComm).unwrap();
        let err = b.axpy(1.0, &a).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::DimensionMismatch {
                expected: 5,
                actual: 4
            }
        );
    }

    #[test]
    fn test_zero_vector_cannot_be_normalized() {
        let mut v = DistributedVector::zeros(&ShardLayout::balanced(3, 1), &SelfComm).unwrap();
        assert!(matches!(
            v.normalize(&SelfComm).unwrap_err().kind(),
            ErrorKind::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_random_vector_is_independent_of_rank_count() {
        let dim = 37;
        let mut stream = RandomStream::initialize(11);
        let single = {
            let layout = ShardLayout::balanced(dim, 1);
            let mut v = DistributedVector::zeros(&layout, &SelfComm).unwrap();
            v.set_random(&mut stream).unwrap();
            v.into_local()
        };
        let gathered = ThreadGroup::new(4).run(|comm| {
            let layout = ShardLayout::balanced(dim, comm.size());
            let mut stream = RandomStream::initialize(11);
            let mut v = DistributedVector::zeros(&layout, comm).unwrap();
            v.set_random(&mut stream).unwrap();
            let norm = v.norm(comm).unwrap();
            (v.gather(comm).unwrap(), norm)
        });
        for (full, norm) in &gathered {
            assert_eq!(full, &single);
            assert_eq!(*norm, gathered[0].1);
        }
    }

    #[test]
    fn test_unit_vector_lands_on_owner() {
        let owners = ThreadGroup::new(3).run(|comm| {
            let layout = ShardLayout::balanced(9, comm.size());
            let mut v = DistributedVector::zeros(&layout, comm).unwrap();
            v.set_unit(5).unwrap();
            v.local().iter().sum::<f64>()
        });
        assert_eq!(owners, vec![0.0, 1.0, 0.0]);
    }
}
