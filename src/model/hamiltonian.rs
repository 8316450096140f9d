//! The matrix-free Hubbard Hamiltonian.
//!
//! ```text
//! H = - sum_{<ij>,σ} t_ij (c†_{iσ} c_{jσ} + h.c.)
//!     + sum_i U_i n_{i↑} n_{i↓} + sum_{<ij>} V_ij n_i n_j - μ sum_i n_i
//! ```
//!
//! Each rank owns a contiguous block of basis indices. `apply` walks the owned
//! columns of H. Diagonal terms and hoppings that land inside the rank's block
//! are accumulated directly. Hoppings that land in another rank's block are
//! packed as `(global index, value)` pairs and delivered with one
//! [`Communicator::exchange`]. Received contributions are added in source-rank
//! order, so the result is deterministic for a fixed partition.

use super::{Basis, ModelDescriptor, ModelTables};
use crate::{
    comm::{Communicator, Parcel},
    config::DEFAULT_MEMORY_LIMIT_BYTES,
    error::{ErrorKind, Result},
    operator::{AssembleDense, DistributedOperator},
    vector::{DistributedVector, ShardLayout},
};
use faer::Mat;
use std::collections::BTreeMap;

/// Per-rank storage of one basis index: its `u64` state and `f64` diagonal.
const BYTES_PER_LOCAL_STATE: u128 = 16;

/// One spin-resolved hopping channel, precomputed as orbital bit masks.
#[derive(Debug, Clone, Copy)]
struct HoppingChannel {
    a: u32,
    b: u32,
    /// Bits strictly between orbitals `a` and `b`, for the fermion sign.
    between: u64,
    t: f64,
}

#[derive(Debug, Clone)]
pub struct HubbardHamiltonian {
    basis: Basis,
    tables: ModelTables,
    chemical_potential: f64,
    channels: Vec<HoppingChannel>,
    layout: ShardLayout,
    rank: usize,
    /// Basis states of this rank's block, in index order.
    local_states: Vec<u64>,
    /// Diagonal matrix elements of this rank's block.
    local_diagonal: Vec<f64>,
}

fn between_mask(a: u32, b: u32) -> u64 {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    // Ones at positions lo+1 .. hi-1.
    let below_hi = (1u64 << hi) - 1;
    let through_lo = (1u64 << (lo + 1)) - 1;
    below_hi & !through_lo
}

impl HubbardHamiltonian {
    /// Builds the operator for this rank with the default memory limit.
    pub fn new(model: &ModelDescriptor, comm: &dyn Communicator) -> Result<Self> {
        Self::with_memory_limit(model, DEFAULT_MEMORY_LIMIT_BYTES, comm)
    }

    /// Builds the operator for this rank. Validation happens here, before any
    /// collective call is made.
    ///
    /// Each rank stores the basis state and the diagonal element of every index
    /// in its block. The size of the *largest* block is checked against
    /// `limit_bytes`, so every rank reaches the same verdict even when block
    /// lengths differ by one.
    pub fn with_memory_limit(
        model: &ModelDescriptor,
        limit_bytes: u64,
        comm: &dyn Communicator,
    ) -> Result<Self> {
        let basis = model.basis()?;
        if !model.chemical_potential.is_finite() {
            return Err(ErrorKind::InvalidConfig("non-finite chemical potential".into()).into());
        }
        let channels = model
            .tables
            .hoppings
            .iter()
            .flat_map(|h| (0..2).map(move |spin| (h.i, h.j, h.t, spin)))
            .map(|(i, j, t, spin)| {
                let a = basis.orbital(i, spin);
                let b = basis.orbital(j, spin);
                HoppingChannel {
                    a,
                    b,
                    between: between_mask(a, b),
                    t,
                }
            })
            .collect();

        let layout = ShardLayout::balanced(basis.dim(), comm.size());
        let largest_block = layout.local_len(0);
        let required_bytes = largest_block as u128 * BYTES_PER_LOCAL_STATE;
        if required_bytes > u128::from(limit_bytes) {
            return Err(ErrorKind::OutOfMemory {
                required_bytes,
                limit_bytes: u128::from(limit_bytes),
            }
            .into());
        }
        let rank = comm.rank();
        let mut hamiltonian = Self {
            basis,
            tables: model.tables.clone(),
            chemical_potential: model.chemical_potential,
            channels,
            layout,
            rank,
            local_states: Vec::new(),
            local_diagonal: Vec::new(),
        };
        let range = hamiltonian.layout.range(rank);
        let out_of_memory = |_| ErrorKind::OutOfMemory {
            required_bytes,
            limit_bytes: u128::from(limit_bytes),
        };
        let mut local_states = Vec::new();
        local_states
            .try_reserve_exact(range.len())
            .map_err(out_of_memory)?;
        let mut local_diagonal = Vec::new();
        local_diagonal
            .try_reserve_exact(range.len())
            .map_err(out_of_memory)?;
        for i in range {
            let state = hamiltonian.basis.state(i);
            local_states.push(state);
            local_diagonal.push(hamiltonian.diagonal_element(state));
        }
        hamiltonian.local_states = local_states;
        hamiltonian.local_diagonal = local_diagonal;
        log::debug!(
            "rank {rank}: Hubbard operator with dim {} ({} local states, {} hopping channels)",
            hamiltonian.basis.dim(),
            hamiltonian.local_states.len(),
            hamiltonian.channels.len()
        );
        Ok(hamiltonian)
    }

    pub fn basis(&self) -> &Basis {
        &self.basis
    }

    /// `<s|H|s>`.
    pub fn diagonal_element(&self, state: u64) -> f64 {
        let n = |site: usize| {
            (self.basis.occupation(state, site, 0) + self.basis.occupation(state, site, 1)) as f64
        };
        let mut energy = 0.0;
        for (site, &u) in self.tables.onsite.iter().enumerate() {
            if u != 0.0 {
                let up = self.basis.occupation(state, site, 0);
                let down = self.basis.occupation(state, site, 1);
                energy += u * (up * down) as f64;
            }
        }
        for v in &self.tables.intersite {
            energy += v.v * n(v.i) * n(v.j);
        }
        if self.chemical_potential != 0.0 {
            energy -= self.chemical_potential * state.count_ones() as f64;
        }
        energy
    }

    /// Calls `emit(target_state, element)` for every off-diagonal element
    /// `<target|H|state>` in the column of `state`.
    pub fn for_each_hop(&self, state: u64, mut emit: impl FnMut(u64, f64)) {
        for ch in &self.channels {
            let occ_a = (state >> ch.a) & 1;
            let occ_b = (state >> ch.b) & 1;
            if occ_a == occ_b {
                continue;
            }
            let target = state ^ (1u64 << ch.a) ^ (1u64 << ch.b);
            let sign = if (state & ch.between).count_ones() % 2 == 0 {
                1.0
            } else {
                -1.0
            };
            emit(target, -ch.t * sign);
        }
    }
}

impl HubbardHamiltonian {
    /// Rank-local preconditions of `apply`.
    fn check_apply(
        &self,
        v: &DistributedVector,
        out: &DistributedVector,
        comm: &dyn Communicator,
    ) -> Result<()> {
        self.check_vector(v)?;
        self.check_vector(out)?;
        if v.rank() != self.rank || comm.rank() != self.rank {
            return Err(ErrorKind::InvalidConfig(format!(
                "operator built for rank {} used on rank {}",
                self.rank,
                comm.rank()
            ))
            .into());
        }
        Ok(())
    }
}

impl DistributedOperator for HubbardHamiltonian {
    fn dim(&self) -> usize {
        self.basis.dim()
    }

    fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    fn apply(
        &self,
        v: &DistributedVector,
        out: &mut DistributedVector,
        comm: &dyn Communicator,
    ) -> Result<()> {
        // The exchange below is collective: a rank that bails out alone would
        // leave its peers waiting, so the local checks are agreed on first.
        comm.agree(self.check_apply(v, out, comm))?;

        let start = v.global_range().start;
        let end = v.global_range().end;
        let mut outgoing: BTreeMap<usize, Parcel> = BTreeMap::new();
        {
            let out_local = out.local_mut();
            for ((o, &x), &d) in out_local.iter_mut().zip(v.local()).zip(&self.local_diagonal) {
                *o = d * x;
            }
            for (&state, &amplitude) in self.local_states.iter().zip(v.local()) {
                if amplitude == 0.0 {
                    continue;
                }
                self.for_each_hop(state, |target, element| {
                    let Some(index) = self.basis.index(target) else {
                        return;
                    };
                    let value = element * amplitude;
                    if (start..end).contains(&index) {
                        out_local[index - start] += value;
                    } else {
                        outgoing
                            .entry(self.layout.owner(index))
                            .or_default()
                            .push(index as u64, value);
                    }
                });
            }
        }

        let received = comm.exchange(outgoing)?;
        let out_local = out.local_mut();
        for (src, parcel) in received {
            for (&index, &value) in parcel.indices.iter().zip(&parcel.values) {
                let index = index as usize;
                if !(start..end).contains(&index) {
                    return Err(ErrorKind::Transport {
                        rank: self.rank,
                        message: format!(
                            "rank {src} sent amplitude {index} outside {start}..{end}"
                        ),
                    }
                    .into());
                }
                out_local[index - start] += value;
            }
        }
        Ok(())
    }
}

impl AssembleDense for HubbardHamiltonian {
    fn assemble_dense(&self) -> Mat<f64> {
        let dim = self.basis.dim();
        let mut h = Mat::<f64>::zeros(dim, dim);
        for col in 0..dim {
            let state = self.basis.state(col);
            h[(col, col)] += self.diagonal_element(state);
            self.for_each_hop(state, |target, element| {
                if let Some(row) = self.basis.index(target) {
                    h[(row, col)] += element;
                }
            });
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        comm::{SelfComm, ThreadGroup},
        model::{HubbardParams, Lattice, basis::MAX_SITES},
        random::RandomStream,
    };

    fn chain(length: usize, u: f64) -> ModelDescriptor {
        let tables = Lattice::Chain {
            length,
            periodic: true,
        }
        .generate(&HubbardParams { t: 1.0, u, v: 0.0 });
        ModelDescriptor::new(tables, length, false).with_two_sz(0)
    }

    #[test]
    fn test_between_mask() {
        assert_eq!(between_mask(1, 4), 0b01100);
        assert_eq!(between_mask(4, 1), 0b01100);
        assert_eq!(between_mask(2, 3), 0);
    }

    #[test]
    fn test_dense_matrix_is_symmetric() {
        let h = HubbardHamiltonian::new(&chain(4, 3.0), &SelfComm).unwrap();
        let dense = h.assemble_dense();
        for i in 0..dense.nrows() {
            for j in 0..dense.ncols() {
                assert_eq!(dense[(i, j)], dense[(j, i)]);
            }
        }
    }

    #[test]
    fn test_dimer_matrix_elements() {
        // Two sites, one up and one down electron: |↑↓,0>, |↑,↓>, |↓,↑>, |0,↑↓>.
        let h = HubbardHamiltonian::new(
            &ModelDescriptor::new(
                Lattice::Chain {
                    length: 2,
                    periodic: false,
                }
                .generate(&HubbardParams {
                    t: 1.0,
                    u: 4.0,
                    v: 0.0,
                }),
                2,
                false,
            )
            .with_two_sz(0),
            &SelfComm,
        )
        .unwrap();
        let dense = h.assemble_dense();
        assert_eq!(dense.nrows(), 4);
        let trace: f64 = (0..4).map(|i| dense[(i, i)]).sum();
        assert_eq!(trace, 8.0);
        let frobenius_off: f64 = (0..4)
            .flat_map(|i| (0..4).map(move |j| (i, j)))
            .filter(|(i, j)| i != j)
            .map(|(i, j)| dense[(i, j)].powi(2))
            .sum();
        // Four hopping paths of magnitude t, each appearing twice.
        assert_eq!(frobenius_off, 8.0);
    }

    #[test]
    fn test_apply_matches_dense_matrix() {
        let model = chain(4, 2.0);
        let h = HubbardHamiltonian::new(&model, &SelfComm).unwrap();
        let dense = h.assemble_dense();
        let mut v = DistributedVector::zeros(h.layout(), &SelfComm).unwrap();
        v.set_random(&mut RandomStream::initialize(5)).unwrap();
        let mut hv = DistributedVector::zeros(h.layout(), &SelfComm).unwrap();
        h.apply(&v, &mut hv, &SelfComm).unwrap();
        for i in 0..h.dim() {
            let expected: f64 = (0..h.dim()).map(|j| dense[(i, j)] * v.local()[j]).sum();
            assert!((hv.local()[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_apply_is_linear_and_symmetric() {
        let tables = Lattice::Triangular {
            width: 3,
            height: 2,
            periodic: true,
        }
        .generate(&HubbardParams {
            t: 1.0,
            u: 5.0,
            v: 0.5,
        });
        let model = ModelDescriptor::new(tables, 5, false).with_chemical_potential(0.3);
        let h = HubbardHamiltonian::new(&model, &SelfComm).unwrap();
        let random = |seed| {
            let mut v = DistributedVector::zeros(h.layout(), &SelfComm).unwrap();
            v.set_random(&mut RandomStream::initialize(seed)).unwrap();
            v
        };
        let apply = |v: &DistributedVector| {
            let mut out = DistributedVector::zeros(h.layout(), &SelfComm).unwrap();
            h.apply(v, &mut out, &SelfComm).unwrap();
            out
        };
        let (x, y) = (random(1), random(2));
        let (a, b) = (0.75, -2.5);

        let mut combined = x.clone();
        combined.scale(a);
        combined.axpy(b, &y).unwrap();
        let lhs = apply(&combined);
        let mut rhs = apply(&x);
        rhs.scale(a);
        rhs.axpy(b, &apply(&y)).unwrap();
        for (l, r) in lhs.local().iter().zip(rhs.local()) {
            assert!((l - r).abs() < 1e-10);
        }

        let xhy = x.dot(&apply(&y), &SelfComm).unwrap();
        let hxy = apply(&x).dot(&y, &SelfComm).unwrap();
        assert!((xhy - hxy).abs() < 1e-9 * xhy.abs().max(1.0));
    }

    #[test]
    fn test_distributed_apply_matches_single_rank() {
        let model = chain(4, 2.0);
        let reference = {
            let h = HubbardHamiltonian::new(&model, &SelfComm).unwrap();
            let mut v = DistributedVector::zeros(h.layout(), &SelfComm).unwrap();
            v.set_random(&mut RandomStream::initialize(9)).unwrap();
            let mut hv = DistributedVector::zeros(h.layout(), &SelfComm).unwrap();
            h.apply(&v, &mut hv, &SelfComm).unwrap();
            hv.into_local()
        };
        let results = ThreadGroup::new(3).run(|comm| {
            let h = HubbardHamiltonian::new(&model, comm).unwrap();
            let mut v = DistributedVector::zeros(h.layout(), comm).unwrap();
            v.set_random(&mut RandomStream::initialize(9)).unwrap();
            let mut hv = DistributedVector::zeros(h.layout(), comm).unwrap();
            h.apply(&v, &mut hv, comm).unwrap();
            hv.gather(comm).unwrap()
        });
        for full in results {
            for (a, b) in full.iter().zip(&reference) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_oversized_shard_is_rejected_before_allocation() {
        let tables = Lattice::Chain {
            length: MAX_SITES,
            periodic: false,
        }
        .generate(&HubbardParams {
            t: 1.0,
            u: 4.0,
            v: 0.0,
        });
        let model = ModelDescriptor::new(tables, 0, true);
        let err = HubbardHamiltonian::new(&model, &SelfComm).unwrap_err();
        match err.kind() {
            ErrorKind::OutOfMemory {
                required_bytes,
                limit_bytes,
            } => {
                assert_eq!(*required_bytes, (1u128 << 62) * BYTES_PER_LOCAL_STATE);
                assert_eq!(*limit_bytes, u128::from(DEFAULT_MEMORY_LIMIT_BYTES));
            }
            other => panic!("unexpected error {other:?}"),
        }

        // Four sites at half filling hold 36 states, 576 bytes.
        let small = chain(4, 1.0);
        assert!(HubbardHamiltonian::with_memory_limit(&small, 575, &SelfComm).is_err());
        assert!(HubbardHamiltonian::with_memory_limit(&small, 576, &SelfComm).is_ok());
    }

    #[test]
    fn test_apply_rejects_foreign_vector() {
        let h = HubbardHamiltonian::new(&chain(4, 2.0), &SelfComm).unwrap();
        let layout = ShardLayout::balanced(h.dim() + 1, 1);
        let v = DistributedVector::zeros(&layout, &SelfComm).unwrap();
        let mut out = DistributedVector::zeros(h.layout(), &SelfComm).unwrap();
        let err = h.apply(&v, &mut out, &SelfComm).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::DimensionMismatch {
                expected: h.dim(),
                actual: h.dim() + 1
            }
        );
    }

    #[test]
    fn test_apply_failure_on_one_rank_fails_all_ranks() {
        let model = chain(4, 2.0);
        let results = ThreadGroup::new(2).run(|comm| {
            let h = HubbardHamiltonian::new(&model, comm).unwrap();
            let dim = if comm.rank() == 1 { h.dim() + 1 } else { h.dim() };
            let layout = ShardLayout::balanced(dim, comm.size());
            let v = DistributedVector::zeros(&layout, comm).unwrap();
            let mut out = DistributedVector::zeros(h.layout(), comm).unwrap();
            h.apply(&v, &mut out, comm)
        });
        assert!(matches!(
            results[1].as_ref().unwrap_err().kind(),
            ErrorKind::DimensionMismatch { .. }
        ));
        match results[0].as_ref().unwrap_err().kind() {
            ErrorKind::Transport { rank, message } => {
                assert_eq!(*rank, 0);
                assert!(message.contains("failed a precondition"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
