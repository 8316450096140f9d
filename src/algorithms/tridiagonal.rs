//! Eigensolvers for the symmetric tridiagonal matrix `T_m` produced by Lanczos.
//!
//! Two entry points:
//! - [`solve`] builds `T_m` densely and hands it to faer's self-adjoint
//!   eigendecomposition. It returns every eigenpair and is used once a run
//!   terminates, when Ritz vectors are needed.
//! - [`lowest_eigenvalues`] runs Sturm-sequence bisection for the few smallest
//!   eigenvalues only. It is `O(m)` per bisection step and needs no allocation
//!   beyond the output, so the engine can afford it at every convergence check.
//!
//! Both are pure functions of `(alphas, betas)`. Every rank evaluates them
//! redundantly on identical inputs.

use super::SortOrder;
use crate::error::{ErrorKind, Result};
use faer::{Mat, Side};

/// Smallest magnitude a Sturm pivot may take before it is clamped.
const PIVOT_GUARD: f64 = 1e-300;

/// Upper bound on bisection steps. Each halves the bracket; 200 is far more
/// than the 64 needed to exhaust `f64` precision from a finite bracket.
const MAX_BISECTIONS: usize = 200;

/// Eigenpairs of `T_m`. Column `i` of `vectors` belongs to `values[i]`.
#[derive(Debug, Clone)]
pub struct TridiagonalEigen {
    pub values: Vec<f64>,
    pub vectors: Mat<f64>,
}

fn check_shape(alphas: &[f64], betas: &[f64]) -> Result<()> {
    if !alphas.is_empty() && betas.len() + 1 != alphas.len() {
        return Err(ErrorKind::DimensionMismatch {
            expected: alphas.len() - 1,
            actual: betas.len(),
        }
        .into());
    }
    Ok(())
}

/// Assembles `T_m` as a dense matrix.
pub fn assemble(alphas: &[f64], betas: &[f64]) -> Mat<f64> {
    let m = alphas.len();
    Mat::from_fn(m, m, |i, j| {
        if i == j {
            alphas[i]
        } else if i + 1 == j {
            betas[i]
        } else if j + 1 == i {
            betas[j]
        } else {
            0.0
        }
    })
}

/// All eigenvalues and eigenvectors of `T_m`, in the requested order.
pub fn solve(alphas: &[f64], betas: &[f64], order: SortOrder) -> Result<TridiagonalEigen> {
    check_shape(alphas, betas)?;
    let m = alphas.len();
    if m == 0 {
        return Ok(TridiagonalEigen {
            values: Vec::new(),
            vectors: Mat::zeros(0, 0),
        });
    }
    let t = assemble(alphas, betas);
    let evd = t.as_ref().self_adjoint_eigen(Side::Lower)?;
    let s = evd.S();
    let u = evd.U();

    // faer returns eigenvalues in non-decreasing order.
    let column = |k: usize| match order {
        SortOrder::Ascending => k,
        SortOrder::Descending => m - 1 - k,
    };
    let values = (0..m).map(|k| s[column(k)]).collect();
    let vectors = Mat::from_fn(m, m, |i, k| u[(i, column(k))]);
    Ok(TridiagonalEigen { values, vectors })
}

/// Number of eigenvalues of `T_m` strictly below `lambda`.
///
/// The count of negative pivots in the `LDL^T` factorization of `T_m - lambda I`.
pub fn sturm_count(alphas: &[f64], betas: &[f64], lambda: f64) -> usize {
    let mut count = 0;
    let mut q: f64 = 1.0;
    for (i, &alpha) in alphas.iter().enumerate() {
        let coupling = if i == 0 {
            0.0
        } else {
            let safe = if q.abs() < PIVOT_GUARD {
                PIVOT_GUARD.copysign(q)
            } else {
                q
            };
            betas[i - 1] * betas[i - 1] / safe
        };
        q = alpha - lambda - coupling;
        if q < 0.0 {
            count += 1;
        }
    }
    count
}

/// Gershgorin interval containing the whole spectrum of `T_m`.
pub fn gershgorin_bounds(alphas: &[f64], betas: &[f64]) -> (f64, f64) {
    let m = alphas.len();
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for i in 0..m {
        let left = if i > 0 { betas[i - 1].abs() } else { 0.0 };
        let right = if i + 1 < m { betas[i].abs() } else { 0.0 };
        lo = lo.min(alphas[i] - left - right);
        hi = hi.max(alphas[i] + left + right);
    }
    (lo, hi)
}

/// The `count` smallest eigenvalues of `T_m`, ascending, by Sturm bisection.
///
/// Returns fewer than `count` values when `m < count`.
pub fn lowest_eigenvalues(alphas: &[f64], betas: &[f64], count: usize) -> Result<Vec<f64>> {
    check_shape(alphas, betas)?;
    let m = alphas.len();
    if m == 0 {
        return Ok(Vec::new());
    }
    let (lo, hi) = gershgorin_bounds(alphas, betas);
    let pad = 1.0 + 1e-8 * lo.abs().max(hi.abs());
    let (lo, hi) = (lo - pad, hi + pad);

    let mut values = Vec::with_capacity(count.min(m));
    for k in 0..count.min(m) {
        // Eigenvalue k is the smallest x with more than k eigenvalues below it.
        let mut a = lo;
        let mut b = hi;
        for _ in 0..MAX_BISECTIONS {
            let mid = 0.5 * (a + b);
            if b - a <= 2.0 * f64::EPSILON * mid.abs().max(1.0) {
                break;
            }
            if sturm_count(alphas, betas, mid) <= k {
                a = mid;
            } else {
                b = mid;
            }
        }
        values.push(0.5 * (a + b));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sturm_count_2x2() {
        // [[1, -1], [-1, 3]] has eigenvalues 2 -+ sqrt(2).
        let a = [1.0, 3.0];
        let b = [-1.0];
        assert_eq!(sturm_count(&a, &b, 0.0), 0);
        assert_eq!(sturm_count(&a, &b, 1.0), 1);
        assert_eq!(sturm_count(&a, &b, 4.0), 2);
    }

    #[test]
    fn test_bisection_matches_dense_solve() {
        let alphas = [2.0, -1.0, 0.5, 3.0, 1.0];
        let betas = [0.7, 1.1, -0.4, 0.9];
        let dense = solve(&alphas, &betas, SortOrder::Ascending).unwrap();
        let lowest = lowest_eigenvalues(&alphas, &betas, 3).unwrap();
        assert_eq!(lowest.len(), 3);
        for (a, b) in lowest.iter().zip(&dense.values) {
            assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        }
    }

    #[test]
    fn test_clean_chain_spectrum() {
        // d = 0, e = -1: eigenvalues 2 cos(k pi / (n + 1)).
        let n = 40;
        let alphas = vec![0.0; n];
        let betas = vec![-1.0; n - 1];
        let all = lowest_eigenvalues(&alphas, &betas, n).unwrap();
        for (k, value) in all.iter().enumerate() {
            let exact = 2.0 * ((n - k) as f64 * std::f64::consts::PI / (n as f64 + 1.0)).cos();
            assert!((value - exact).abs() < 1e-10, "k={k}: {value} vs {exact}");
        }
    }

    #[test]
    fn test_descending_order_and_vectors() {
        let alphas = [1.0, 3.0];
        let betas = [-1.0];
        let eig = solve(&alphas, &betas, SortOrder::Descending).unwrap();
        assert!(eig.values[0] > eig.values[1]);
        let t = assemble(&alphas, &betas);
        for k in 0..2 {
            for i in 0..2 {
                let tv: f64 = (0..2).map(|j| t[(i, j)] * eig.vectors[(j, k)]).sum();
                assert!((tv - eig.values[k] * eig.vectors[(i, k)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_degenerate_spectrum() {
        let alphas = [2.0, 2.0, 2.0];
        let betas = [0.0, 0.0];
        assert_eq!(lowest_eigenvalues(&alphas, &betas, 3).unwrap().len(), 3);
        for v in lowest_eigenvalues(&alphas, &betas, 3).unwrap() {
            assert!((v - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        assert!(solve(&[1.0, 2.0], &[], SortOrder::Ascending).is_err());
        assert!(lowest_eigenvalues(&[1.0], &[0.5], 1).is_err());
        assert!(lowest_eigenvalues(&[], &[], 1).unwrap().is_empty());
    }
}
