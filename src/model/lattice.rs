//! Nearest-neighbour lattice generators.
//!
//! Every supported geometry is a variant of [`Lattice`], and all of them produce
//! the same [`ModelTables`]. The Hamiltonian only ever sees those uniform
//! hopping and interaction tables, never the lattice type.

use super::{Hopping, HubbardParams, Interaction, ModelTables};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lattice {
    Chain {
        length: usize,
        periodic: bool,
    },
    Square {
        width: usize,
        height: usize,
        periodic: bool,
    },
    Triangular {
        width: usize,
        height: usize,
        periodic: bool,
    },
    /// `width x height` unit cells of two sites each.
    Honeycomb {
        width: usize,
        height: usize,
        periodic: bool,
    },
}

/// Inserts the bond `{a, b}` unless it is a self-loop. Small periodic lattices
/// wrap onto bonds that already exist; the set keeps one copy.
fn add_bond(bonds: &mut BTreeSet<(usize, usize)>, a: usize, b: usize) {
    if a != b {
        bonds.insert((a.min(b), a.max(b)));
    }
}

/// Neighbour `x + dx` on a ring or open segment of length `n`.
fn shift(x: usize, dx: isize, n: usize, periodic: bool) -> Option<usize> {
    let shifted = x as isize + dx;
    if (0..n as isize).contains(&shifted) {
        Some(shifted as usize)
    } else if periodic {
        Some(shifted.rem_euclid(n as isize) as usize)
    } else {
        None
    }
}

impl Lattice {
    pub fn sites(&self) -> usize {
        match *self {
            Lattice::Chain { length, .. } => length,
            Lattice::Square { width, height, .. } | Lattice::Triangular { width, height, .. } => {
                width * height
            }
            Lattice::Honeycomb { width, height, .. } => 2 * width * height,
        }
    }

    /// Nearest-neighbour bonds `(i, j)` with `i < j`, sorted and unique.
    pub fn bonds(&self) -> Vec<(usize, usize)> {
        let mut bonds = BTreeSet::new();
        match *self {
            Lattice::Chain { length, periodic } => {
                for x in 0..length {
                    if let Some(nx) = shift(x, 1, length, periodic) {
                        add_bond(&mut bonds, x, nx);
                    }
                }
            }
            Lattice::Square {
                width,
                height,
                periodic,
            }
            | Lattice::Triangular {
                width,
                height,
                periodic,
            } => {
                let triangular = matches!(self, Lattice::Triangular { .. });
                let site = |x: usize, y: usize| x + width * y;
                for y in 0..height {
                    for x in 0..width {
                        let right = shift(x, 1, width, periodic);
                        let up = shift(y, 1, height, periodic);
                        if let Some(nx) = right {
                            add_bond(&mut bonds, site(x, y), site(nx, y));
                        }
                        if let Some(ny) = up {
                            add_bond(&mut bonds, site(x, y), site(x, ny));
                        }
                        if triangular {
                            if let (Some(nx), Some(ny)) = (right, up) {
                                add_bond(&mut bonds, site(x, y), site(nx, ny));
                            }
                        }
                    }
                }
            }
            Lattice::Honeycomb {
                width,
                height,
                periodic,
            } => {
                let a = |x: usize, y: usize| 2 * (x + width * y);
                let b = |x: usize, y: usize| 2 * (x + width * y) + 1;
                for y in 0..height {
                    for x in 0..width {
                        add_bond(&mut bonds, a(x, y), b(x, y));
                        if let Some(px) = shift(x, -1, width, periodic) {
                            add_bond(&mut bonds, a(x, y), b(px, y));
                        }
                        if let Some(py) = shift(y, -1, height, periodic) {
                            add_bond(&mut bonds, a(x, y), b(x, py));
                        }
                    }
                }
            }
        }
        bonds.into_iter().collect()
    }

    /// Emits the uniform hopping/interaction tables for a Hubbard model on this lattice.
    pub fn generate(&self, params: &HubbardParams) -> ModelTables {
        let bonds = self.bonds();
        let hoppings = bonds
            .iter()
            .map(|&(i, j)| Hopping { i, j, t: params.t })
            .collect();
        let intersite = if params.v != 0.0 {
            bonds
                .iter()
                .map(|&(i, j)| Interaction { i, j, v: params.v })
                .collect()
        } else {
            Vec::new()
        };
        ModelTables {
            sites: self.sites(),
            hoppings,
            onsite: vec![params.u; self.sites()],
            intersite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_bonds() {
        let open = Lattice::Chain {
            length: 4,
            periodic: false,
        };
        assert_eq!(open.bonds(), vec![(0, 1), (1, 2), (2, 3)]);
        let ring = Lattice::Chain {
            length: 4,
            periodic: true,
        };
        assert_eq!(ring.bonds(), vec![(0, 1), (0, 3), (1, 2), (2, 3)]);
        // A two-site ring wraps onto its only bond.
        let dimer = Lattice::Chain {
            length: 2,
            periodic: true,
        };
        assert_eq!(dimer.bonds(), vec![(0, 1)]);
    }

    #[test]
    fn test_coordination_numbers() {
        let coordination = |lattice: Lattice| {
            let mut degree = vec![0; lattice.sites()];
            for (i, j) in lattice.bonds() {
                degree[i] += 1;
                degree[j] += 1;
            }
            degree
        };
        let square = Lattice::Square {
            width: 4,
            height: 4,
            periodic: true,
        };
        assert!(coordination(square).iter().all(|&d| d == 4));
        let triangular = Lattice::Triangular {
            width: 3,
            height: 3,
            periodic: true,
        };
        assert!(coordination(triangular).iter().all(|&d| d == 6));
        let honeycomb = Lattice::Honeycomb {
            width: 3,
            height: 3,
            periodic: true,
        };
        assert_eq!(honeycomb.sites(), 18);
        assert!(coordination(honeycomb).iter().all(|&d| d == 3));
    }

    #[test]
    fn test_generate_tables() {
        let tables = Lattice::Chain {
            length: 3,
            periodic: false,
        }
        .generate(&HubbardParams {
            t: 1.0,
            u: 4.0,
            v: 0.5,
        });
        assert_eq!(tables.sites, 3);
        assert_eq!(tables.hoppings.len(), 2);
        assert_eq!(tables.onsite, vec![4.0; 3]);
        assert_eq!(tables.intersite.len(), 2);
        assert!(tables.validate().is_ok());
    }
}
