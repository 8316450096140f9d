//! Fock basis of a spinful fermion lattice with combinatorial indexing.
//!
//! Orbital `site + spin * sites` holds the spin-`spin` electron of `site`
//! (spin 0 is up, spin 1 is down), so a basis state is a `2 * sites`-bit word.
//! A [`Basis`] maps between states and dense indices `0..dim` without storing a
//! state list. It uses the combinatorial number system: the colex rank of a
//! `k`-bit word with set bits `p_0 < p_1 < ... < p_{k-1}` is `sum_j C(p_j, j + 1)`.
//! That keeps memory per rank proportional to its shard, not to the Hilbert space.

use crate::error::{ErrorKind, Result};

/// Largest lattice the 64-bit state encoding supports.
pub const MAX_SITES: usize = 31;

/// Which particle-number sector the Hilbert space is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sector {
    /// Fixed numbers of up and down electrons.
    Canonical { n_up: usize, n_down: usize },
    /// Fixed total electron number, any spin projection.
    NumberConserved { electrons: usize },
    /// Every occupation pattern (`4^sites` states).
    GrandCanonical,
}

#[derive(Debug, Clone)]
pub struct Basis {
    sites: usize,
    sector: Sector,
    dim: usize,
    /// `binom[n][k] = C(n, k)` for `n, k <= 2 * sites`.
    binom: Vec<Vec<u64>>,
}

fn pascal(n_max: usize) -> Vec<Vec<u64>> {
    let mut table = vec![vec![0u64; n_max + 1]; n_max + 1];
    for n in 0..=n_max {
        table[n][0] = 1;
        for k in 1..=n {
            table[n][k] = table[n - 1][k - 1] + table[n - 1][k];
        }
    }
    table
}

impl Basis {
    pub fn new(sites: usize, sector: Sector) -> Result<Self> {
        if sites == 0 || sites > MAX_SITES {
            return Err(ErrorKind::InvalidConfig(format!(
                "lattice must have 1..={MAX_SITES} sites, got {sites}"
            ))
            .into());
        }
        let binom = pascal(2 * sites);
        let dim: u64 = match sector {
            Sector::Canonical { n_up, n_down } => {
                if n_up > sites || n_down > sites {
                    return Err(ErrorKind::InvalidConfig(format!(
                        "{n_up} up / {n_down} down electrons do not fit on {sites} sites"
                    ))
                    .into());
                }
                binom[sites][n_up]
                    .checked_mul(binom[sites][n_down])
                    .ok_or_else(|| ErrorKind::InvalidConfig("Hilbert space too large".into()))?
            }
            Sector::NumberConserved { electrons } => {
                if electrons > 2 * sites {
                    return Err(ErrorKind::InvalidConfig(format!(
                        "{electrons} electrons do not fit on {sites} sites"
                    ))
                    .into());
                }
                binom[2 * sites][electrons]
            }
            Sector::GrandCanonical => 1u64 << (2 * sites),
        };
        let dim = usize::try_from(dim)
            .map_err(|_| ErrorKind::InvalidConfig("Hilbert space too large".into()))?;
        Ok(Self {
            sites,
            sector,
            dim,
            binom,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn sites(&self) -> usize {
        self.sites
    }

    pub fn sector(&self) -> Sector {
        self.sector
    }

    /// Bit position of the orbital `(site, spin)`.
    pub fn orbital(&self, site: usize, spin: usize) -> u32 {
        (site + spin * self.sites) as u32
    }

    fn site_mask(&self) -> u64 {
        (1u64 << self.sites) - 1
    }

    fn rank_word(&self, mut word: u64) -> u64 {
        let mut rank = 0;
        let mut j = 1;
        while word != 0 {
            let p = word.trailing_zeros() as usize;
            rank += self.binom[p][j];
            j += 1;
            word &= word - 1;
        }
        rank
    }

    fn unrank_word(&self, mut rank: u64, ones: usize, width: usize) -> u64 {
        let mut word = 0u64;
        let mut p = width;
        for j in (1..=ones).rev() {
            // Largest p with C(p, j) <= rank.
            p -= 1;
            while self.binom[p][j] > rank {
                p -= 1;
            }
            rank -= self.binom[p][j];
            word |= 1u64 << p;
        }
        word
    }

    /// The basis state with dense index `index`.
    ///
    /// # Panics
    /// Panics if `index >= dim()`.
    pub fn state(&self, index: usize) -> u64 {
        assert!(index < self.dim, "basis index {index} outside 0..{}", self.dim);
        let index = index as u64;
        match self.sector {
            Sector::Canonical { n_up, n_down } => {
                let stride = self.binom[self.sites][n_down];
                let up = self.unrank_word(index / stride, n_up, self.sites);
                let down = self.unrank_word(index % stride, n_down, self.sites);
                up | (down << self.sites)
            }
            Sector::NumberConserved { electrons } => {
                self.unrank_word(index, electrons, 2 * self.sites)
            }
            Sector::GrandCanonical => index,
        }
    }

    /// Dense index of `state`, or `None` if the state lies outside the sector.
    pub fn index(&self, state: u64) -> Option<usize> {
        if self.sites < 32 && state >> (2 * self.sites) != 0 {
            return None;
        }
        let index = match self.sector {
            Sector::Canonical { n_up, n_down } => {
                let up = state & self.site_mask();
                let down = state >> self.sites;
                if up.count_ones() as usize != n_up || down.count_ones() as usize != n_down {
                    return None;
                }
                self.rank_word(up) * self.binom[self.sites][n_down] + self.rank_word(down)
            }
            Sector::NumberConserved { electrons } => {
                if state.count_ones() as usize != electrons {
                    return None;
                }
                self.rank_word(state)
            }
            Sector::GrandCanonical => state,
        };
        Some(index as usize)
    }

    /// Occupation of orbital `(site, spin)` in `state`, as 0 or 1.
    pub fn occupation(&self, state: u64, site: usize, spin: usize) -> u32 {
        ((state >> self.orbital(site, spin)) & 1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bijective(basis: &Basis) {
        let mut previous = None;
        for i in 0..basis.dim() {
            let s = basis.state(i);
            assert_eq!(basis.index(s), Some(i), "state {s:b}");
            assert_ne!(previous, Some(s));
            previous = Some(s);
        }
    }

    #[test]
    fn test_canonical_dimension_and_ranking() {
        let basis = Basis::new(4, Sector::Canonical { n_up: 2, n_down: 1 }).unwrap();
        assert_eq!(basis.dim(), 6 * 4);
        assert_bijective(&basis);
        // Wrong particle numbers are outside the sector.
        assert_eq!(basis.index(0b0001_0001), None);
    }

    #[test]
    fn test_number_conserved_dimension_and_ranking() {
        let basis = Basis::new(3, Sector::NumberConserved { electrons: 3 }).unwrap();
        assert_eq!(basis.dim(), 20);
        assert_bijective(&basis);
    }

    #[test]
    fn test_grand_canonical_is_identity() {
        let basis = Basis::new(2, Sector::GrandCanonical).unwrap();
        assert_eq!(basis.dim(), 16);
        assert_eq!(basis.state(9), 9);
        assert_eq!(basis.index(9), Some(9));
        assert_eq!(basis.index(16), None);
    }

    #[test]
    fn test_colex_order_is_numeric_order() {
        let basis = Basis::new(3, Sector::NumberConserved { electrons: 2 }).unwrap();
        let states: Vec<u64> = (0..basis.dim()).map(|i| basis.state(i)).collect();
        let mut sorted = states.clone();
        sorted.sort_unstable();
        assert_eq!(states, sorted);
    }

    #[test]
    fn test_invalid_sectors() {
        assert!(Basis::new(0, Sector::GrandCanonical).is_err());
        assert!(Basis::new(MAX_SITES + 1, Sector::GrandCanonical).is_err());
        assert!(Basis::new(2, Sector::Canonical { n_up: 3, n_down: 0 }).is_err());
        assert!(Basis::new(2, Sector::NumberConserved { electrons: 5 }).is_err());
    }
}
