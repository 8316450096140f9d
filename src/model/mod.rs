//! Hubbard-type lattice models.
//!
//! This module describes the physical system the solver is asked to diagonalize:
//!
//! - **[`lattice`]**: Nearest-neighbour generators for chain, square, triangular and
//!   honeycomb geometries. Each emits uniform [`ModelTables`].
//! - **[`basis`]**: The Fock basis of a particle-number sector, with combinatorial
//!   state/index conversion.
//! - **[`hamiltonian`]**: The matrix-free [`HubbardHamiltonian`] and its distributed
//!   apply.
//!
//! A [`ModelDescriptor`] binds tables to an electron count and ensemble. It is
//! immutable once built.

pub mod basis;
pub mod hamiltonian;
pub mod lattice;

pub use basis::{Basis, Sector};
pub use hamiltonian::HubbardHamiltonian;
pub use lattice::Lattice;

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Spin-conserving hopping `-t (c†_{iσ} c_{jσ} + h.c.)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hopping {
    pub i: usize,
    pub j: usize,
    pub t: f64,
}

/// Density-density interaction `v n_i n_j`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub i: usize,
    pub j: usize,
    pub v: f64,
}

/// Uniform coupling constants for [`Lattice::generate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HubbardParams {
    pub t: f64,
    pub u: f64,
    pub v: f64,
}

/// What a lattice generator emits: hopping and interaction tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTables {
    pub sites: usize,
    pub hoppings: Vec<Hopping>,
    /// On-site repulsion `U_i n_{i↑} n_{i↓}`, one entry per site.
    pub onsite: Vec<f64>,
    pub intersite: Vec<Interaction>,
}

impl ModelTables {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| -> Result<()> { Err(ErrorKind::InvalidConfig(msg).into()) };
        if self.onsite.len() != self.sites {
            return bad(format!(
                "{} on-site couplings for {} sites",
                self.onsite.len(),
                self.sites
            ));
        }
        for h in &self.hoppings {
            if h.i >= self.sites || h.j >= self.sites || h.i == h.j {
                return bad(format!("invalid hopping bond ({}, {})", h.i, h.j));
            }
        }
        for v in &self.intersite {
            if v.i >= self.sites || v.j >= self.sites || v.i == v.j {
                return bad(format!("invalid interaction bond ({}, {})", v.i, v.j));
            }
        }
        let finite = self.hoppings.iter().all(|h| h.t.is_finite())
            && self.onsite.iter().all(|u| u.is_finite())
            && self.intersite.iter().all(|v| v.v.is_finite());
        if !finite {
            return bad("non-finite coupling constant".to_string());
        }
        Ok(())
    }
}

/// Everything needed to build the Hamiltonian of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub tables: ModelTables,
    pub electrons: usize,
    pub grand_canonical: bool,
    /// Twice the total spin projection, `N_up - N_down`. `None` keeps every
    /// spin sector with the given electron number.
    pub two_sz: Option<i64>,
    pub chemical_potential: f64,
}

impl ModelDescriptor {
    pub fn new(tables: ModelTables, electrons: usize, grand_canonical: bool) -> Self {
        Self {
            tables,
            electrons,
            grand_canonical,
            two_sz: None,
            chemical_potential: 0.0,
        }
    }

    pub fn with_two_sz(mut self, two_sz: i64) -> Self {
        self.two_sz = Some(two_sz);
        self
    }

    pub fn with_chemical_potential(mut self, mu: f64) -> Self {
        self.chemical_potential = mu;
        self
    }

    pub fn sites(&self) -> usize {
        self.tables.sites
    }

    /// The particle-number sector selected by the electron count, ensemble and spin.
    pub fn sector(&self) -> Result<Sector> {
        if self.grand_canonical {
            return Ok(Sector::GrandCanonical);
        }
        match self.two_sz {
            None => Ok(Sector::NumberConserved {
                electrons: self.electrons,
            }),
            Some(two_sz) => {
                let n = self.electrons as i64;
                if (n + two_sz) % 2 != 0 || two_sz.abs() > n {
                    return Err(ErrorKind::InvalidConfig(format!(
                        "2Sz = {two_sz} is incompatible with {n} electrons"
                    ))
                    .into());
                }
                Ok(Sector::Canonical {
                    n_up: ((n + two_sz) / 2) as usize,
                    n_down: ((n - two_sz) / 2) as usize,
                })
            }
        }
    }

    /// Validates the tables and builds the basis.
    pub fn basis(&self) -> Result<Basis> {
        self.tables.validate()?;
        Basis::new(self.sites(), self.sector()?)
    }
}
