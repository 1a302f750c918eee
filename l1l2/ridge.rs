// l1l2/ridge.rs

//! Closed-form ridge regression used to refit the features selected by the
//! L1L2 solver.
//!
//! The refit minimizes `(1/n) * ||y - X w||^2 + penalty * ||w||^2`. The gram
//! matrix is factorized once with a symmetric eigendecomposition, so a whole
//! grid of penalties costs a single decomposition. Tall designs use `X'X`,
//! wide designs the dual form through `XX'`. A zero penalty yields the
//! minimum-norm least-squares solution.

use crate::algorithms::{AlgorithmError, check_design, check_penalty};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{Eigh, UPLO};

/// Eigendecomposition of the gram matrix of one design, reusable across penalties.
#[derive(Debug, Clone)]
pub struct RidgeSolver {
    // V for tall designs, X'V for wide designs.
    basis: Array2<f64>,
    eigenvalues: Array1<f64>,
    // V' X'y for tall designs, V' y for wide designs.
    projected: Array1<f64>,
    n_samples: usize,
    rank_scale: f64,
}

impl RidgeSolver {
    pub fn new(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Self, AlgorithmError> {
        check_design(x, y)?;
        let (n, p) = x.dim();

        let (basis, eigenvalues, projected) = if n < p {
            let gram = x.dot(&x.t());
            let (eigenvalues, eigenvectors) = gram
                .eigh(UPLO::Lower)
                .map_err(AlgorithmError::EigendecompositionFailed)?;
            let projected = eigenvectors.t().dot(&y);
            (x.t().dot(&eigenvectors), eigenvalues, projected)
        } else {
            let gram = x.t().dot(&x);
            let (eigenvalues, eigenvectors) = gram
                .eigh(UPLO::Lower)
                .map_err(AlgorithmError::EigendecompositionFailed)?;
            let projected = eigenvectors.t().dot(&x.t().dot(&y));
            (eigenvectors, eigenvalues, projected)
        };

        Ok(Self {
            basis,
            eigenvalues,
            projected,
            n_samples: n,
            rank_scale: n.max(p) as f64 * f64::EPSILON,
        })
    }

    /// Ridge coefficients for one penalty.
    ///
    /// Shifted eigenvalues below `max_eigenvalue * max(n, p) * eps` are treated
    /// as zero, as a pseudo-inverse would.
    pub fn solve(&self, penalty: f64) -> Result<Array1<f64>, AlgorithmError> {
        check_penalty("lambda", penalty)?;
        let shift = penalty * self.n_samples as f64;
        let shifted = self.eigenvalues.mapv(|ev| ev + shift);
        let largest = shifted.iter().fold(0.0_f64, |acc, &ev| acc.max(ev.abs()));
        let cutoff = largest * self.rank_scale;

        let weights = Array1::from_shape_fn(shifted.len(), |i| {
            if shifted[i] > cutoff {
                self.projected[i] / shifted[i]
            } else {
                0.0
            }
        });
        Ok(self.basis.dot(&weights))
    }
}

/// Ridge coefficients for a single penalty.
///
/// Rejects designs without columns; callers refitting an empty selection must
/// handle the null model themselves.
pub fn ridge_regression(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    penalty: f64,
) -> Result<Array1<f64>, AlgorithmError> {
    check_penalty("lambda", penalty)?;
    RidgeSolver::new(x, y)?.solve(penalty)
}
