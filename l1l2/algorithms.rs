// l1l2/algorithms.rs

//! # L1L2 Regularization via FISTA
//!
//! This module holds the numerical core of the crate: the soft-thresholding
//! proximal operator and the accelerated proximal-gradient (FISTA) solver for
//!
//! ```text
//! (1/n) * ||y - X beta||^2 + tau * ||beta||_1 + mu * ||beta||^2
//! ```
//!
//! Two entry points are provided:
//!
//! 1.  [`l1l2_regularization`] solves the problem for one `(mu, tau)` pair,
//!     optionally warm-started.
//! 2.  [`l1l2_path`] walks a strictly monotone grid of sparsity penalties at a
//!     fixed `mu`, weakest penalty first, threading each solution into the next
//!     solve. It stops as soon as two consecutive solutions are entirely zero,
//!     since every stronger penalty yields the null model too.
//!
//! Hitting the iteration cap is not an error. Every solve returns a
//! [`ConvergenceDiagnostic`] alongside the coefficients and the caller decides
//! whether to log it.

use ndarray::{Array1, ArrayView1, ArrayView2};
use ndarray_linalg::{EigValsh, UPLO};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coefficients whose magnitude falls below this value are treated as unselected.
pub const SELECTION_THRESHOLD: f64 = 1e-16;

/// Error type shared by the FISTA solver and the ridge refit.
#[derive(Error, Debug)]
pub enum AlgorithmError {
    #[error("Invalid penalty grid: {0}")]
    InvalidGrid(String),

    #[error("Penalty '{name}' must be finite and non-negative, got {value}.")]
    InvalidPenalty { name: &'static str, value: f64 },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("The {0} contains NaN or infinite values.")]
    NonFiniteInput(&'static str),

    #[error("Invalid solver options: {0}")]
    InvalidOptions(String),

    #[error("Invalid l1 bounds request: {0}")]
    InvalidBounds(String),

    #[error("Eigendecomposition failed: {0}")]
    EigendecompositionFailed(ndarray_linalg::error::LinalgError),
}

/// Knobs of the FISTA solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Iteration cap (`kmax`).
    pub max_iter: usize,
    /// Relative change `max|delta beta| / max|beta|` below which a solve stops.
    pub tolerance: f64,
    /// Re-estimate the step size from the curvature along each step.
    pub adaptive: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 100_000,
            tolerance: 1e-5,
            adaptive: false,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), AlgorithmError> {
        if self.max_iter == 0 {
            return Err(AlgorithmError::InvalidOptions(
                "max_iter must be at least 1".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(AlgorithmError::InvalidOptions(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// How a single solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceDiagnostic {
    /// Number of FISTA iterations performed. Zero when the step size degenerated.
    pub iterations: usize,
    /// `false` when the iteration cap was reached before the tolerance was met.
    pub converged: bool,
}

/// Result of [`l1l2_regularization`].
#[derive(Debug, Clone)]
pub struct SolverFit {
    pub beta: Array1<f64>,
    pub diagnostic: ConvergenceDiagnostic,
}

/// Result of [`l1l2_path`].
///
/// Entries follow the caller's grid order and `coefficients[i]` is the solution
/// for `tau[i]`. Null models at the strong end of the grid are dropped, so for
/// an increasing grid the entries are a prefix of it and for a decreasing grid
/// a suffix.
#[derive(Debug, Clone, Default)]
pub struct RegularizationPath {
    pub tau: Vec<f64>,
    pub coefficients: Vec<Array1<f64>>,
    pub diagnostics: Vec<ConvergenceDiagnostic>,
    /// Number of penalties actually solved, including the dropped null models.
    pub evaluated: usize,
}

impl RegularizationPath {
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Number of selected features at each path position.
    pub fn selected_counts(&self) -> Vec<usize> {
        self.coefficients
            .iter()
            .map(|beta| support(beta.view()).len())
            .collect()
    }

    /// Number of solves that stopped at the iteration cap.
    pub fn capped_solves(&self) -> usize {
        self.diagnostics.iter().filter(|d| !d.converged).count()
    }

    fn reverse(&mut self) {
        self.tau.reverse();
        self.coefficients.reverse();
        self.diagnostics.reverse();
    }
}

/// Direction of a sparsity grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridOrder {
    Increasing,
    Decreasing,
}

impl GridOrder {
    /// The grid reordered from the weakest penalty to the strongest.
    pub fn by_strength(self, tau_range: &[f64]) -> Vec<f64> {
        match self {
            GridOrder::Increasing => tau_range.to_vec(),
            GridOrder::Decreasing => tau_range.iter().rev().copied().collect(),
        }
    }
}

/// Elementwise proximal operator of the L1 penalty.
///
/// `w_i = sign(v_i) * max(|v_i| - threshold / 2, 0)`.
pub fn soft_thresholding(v: ArrayView1<f64>, threshold: f64) -> Array1<f64> {
    let half = threshold / 2.0;
    v.mapv(|value| {
        let magnitude = value.abs() - half;
        if magnitude > 0.0 {
            value.signum() * magnitude
        } else {
            0.0
        }
    })
}

/// Boolean mask of the features selected by `beta`.
pub fn selection_mask(beta: ArrayView1<f64>) -> Array1<bool> {
    beta.mapv(|b| b.abs() >= SELECTION_THRESHOLD)
}

/// Indices of the features selected by `beta`, in increasing order.
pub fn support(beta: ArrayView1<f64>) -> Vec<usize> {
    beta.iter()
        .enumerate()
        .filter(|(_, b)| b.abs() >= SELECTION_THRESHOLD)
        .map(|(index, _)| index)
        .collect()
}

/// Linear predictor `X beta`.
pub fn predict(x: ArrayView2<f64>, beta: ArrayView1<f64>) -> Result<Array1<f64>, AlgorithmError> {
    if x.ncols() != beta.len() {
        return Err(AlgorithmError::ShapeMismatch(format!(
            "design has {} columns but the coefficient vector has {} entries",
            x.ncols(),
            beta.len()
        )));
    }
    Ok(x.dot(&beta))
}

/// Solves the L1L2 problem for a single `(mu, tau)` pair.
///
/// When the step-size constant is numerically zero (a null design with
/// `mu = 0`) the starting point is returned untouched with zero iterations.
pub fn l1l2_regularization(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    mu: f64,
    tau: f64,
    warm_start: Option<ArrayView1<f64>>,
    options: &SolverOptions,
) -> Result<SolverFit, AlgorithmError> {
    check_design(x, y)?;
    check_penalty("mu", mu)?;
    check_penalty("tau", tau)?;
    options.validate()?;

    let start = initial_beta(x.ncols(), warm_start)?;
    let problem = FistaProblem::new(x.view(), y.view(), mu)?;
    Ok(problem.solve(tau, start, options))
}

/// Computes the regularization path over a strictly monotone sparsity grid.
///
/// Whatever the grid direction, penalties are solved from the weakest to the
/// strongest, each solve warm-started from the previous solution. Once two
/// consecutive solutions are entirely zero the remaining penalties are skipped,
/// and the null models at the strong end are dropped from the result. The
/// returned entries are put back in the caller's order.
pub fn l1l2_path(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    mu: f64,
    tau_range: &[f64],
    warm_start: Option<ArrayView1<f64>>,
    options: &SolverOptions,
) -> Result<RegularizationPath, AlgorithmError> {
    let order = check_sparsity_grid(tau_range)?;
    check_design(x, y)?;
    check_penalty("mu", mu)?;
    options.validate()?;

    let mut previous = initial_beta(x.ncols(), warm_start)?;
    let problem = FistaProblem::new(x.view(), y.view(), mu)?;
    let mut path = RegularizationPath::default();
    let mut zero_run = 0;

    for tau in order.by_strength(tau_range) {
        let fit = problem.solve(tau, previous, options);
        path.evaluated += 1;

        if !fit.diagnostic.converged {
            log::debug!(
                "Path solve at tau = {tau:.4e} stopped at the iteration cap ({} iterations).",
                fit.diagnostic.iterations
            );
        }

        let is_null = support(fit.beta.view()).is_empty();
        previous = fit.beta.clone();
        path.tau.push(tau);
        path.coefficients.push(fit.beta);
        path.diagnostics.push(fit.diagnostic);

        if is_null {
            zero_run += 1;
            if zero_run == 2 {
                log::debug!(
                    "Path saturated at tau = {tau:.4e} after {} of {} penalties.",
                    path.evaluated,
                    tau_range.len()
                );
                break;
            }
        } else {
            zero_run = 0;
        }
    }

    while path
        .coefficients
        .last()
        .is_some_and(|beta| support(beta.view()).is_empty())
    {
        path.tau.pop();
        path.coefficients.pop();
        path.diagnostics.pop();
    }

    if order == GridOrder::Decreasing {
        path.reverse();
    }
    Ok(path)
}

/// Range of useful sparsity penalties for `(x, y)`.
///
/// The upper bound `2/n * max|X'y|` is the smallest `tau` whose lasso solution
/// is the null model; the lower bound uses the weakest correlation. `eps`
/// pulls both bounds inwards.
pub fn l1_bounds(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    eps: f64,
) -> Result<(f64, f64), AlgorithmError> {
    check_design(x, y)?;
    if !(eps.is_finite() && eps >= 0.0) {
        return Err(AlgorithmError::InvalidBounds(format!(
            "eps must be finite and non-negative, got {eps}"
        )));
    }

    let scale = 2.0 / x.nrows() as f64;
    let correlations = x.t().dot(&y);
    let (weakest, strongest) = correlations
        .iter()
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &c| {
            (lo.min(c.abs()), hi.max(c.abs()))
        });

    let tau_min = weakest * scale + eps;
    let tau_max = strongest * scale - eps;
    if tau_max <= 0.0 {
        return Err(AlgorithmError::InvalidBounds(format!(
            "eps = {eps} produced a non-positive tau_max ({tau_max:.4e})"
        )));
    }
    if tau_min >= tau_max {
        return Err(AlgorithmError::InvalidBounds(format!(
            "eps = {eps} produced tau_min ({tau_min:.4e}) >= tau_max ({tau_max:.4e})"
        )));
    }
    Ok((tau_min, tau_max))
}

/// Fixed data of one FISTA problem; reused across the penalties of a path.
struct FistaProblem<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    // X'y, only worth caching when the design is tall.
    xty: Option<Array1<f64>>,
    mu: f64,
    sigma: f64,
}

impl<'a> FistaProblem<'a> {
    fn new(x: ArrayView2<'a, f64>, y: ArrayView1<'a, f64>, mu: f64) -> Result<Self, AlgorithmError> {
        let (n, p) = x.dim();
        let xty = (n > p).then(|| x.t().dot(&y));
        let sigma = step_size_sigma(x, mu)?;
        Ok(Self {
            x,
            y,
            xty,
            mu,
            sigma,
        })
    }

    /// `X'(y - X aux)`, the negative gradient direction up to scaling.
    fn residual_correlation(&self, aux: &Array1<f64>) -> Array1<f64> {
        match &self.xty {
            Some(xty) => xty - &self.x.t().dot(&self.x.dot(aux)),
            None => self.x.t().dot(&(&self.y - &self.x.dot(aux))),
        }
    }

    fn proximal_step(
        &self,
        correlation: &Array1<f64>,
        aux: &Array1<f64>,
        tau: f64,
        sigma: f64,
    ) -> Array1<f64> {
        let n = self.x.nrows() as f64;
        let mu_s = self.mu / sigma;
        let value = correlation / (n * sigma) + aux * (1.0 - mu_s);
        // tau_s = tau / (2 sigma) is the half-threshold applied by the operator.
        soft_thresholding(value.view(), tau / sigma)
    }

    fn solve(&self, tau: f64, start: Array1<f64>, options: &SolverOptions) -> SolverFit {
        if self.sigma < f64::EPSILON {
            return SolverFit {
                beta: start,
                diagnostic: ConvergenceDiagnostic {
                    iterations: 0,
                    converged: true,
                },
            };
        }

        let n = self.x.nrows() as f64;
        let mut sigma = self.sigma;
        let mut beta = start;
        let mut aux = beta.clone();
        let mut t = 1.0_f64;

        for iteration in 0..options.max_iter {
            let correlation = self.residual_correlation(&aux);
            let mut beta_next = self.proximal_step(&correlation, &aux, tau, sigma);

            if options.adaptive {
                let step = &aux - &beta_next;
                let step_norm = step.dot(&step);
                if step_norm > 0.0 {
                    let moved = self.x.dot(&step);
                    let curvature = moved.dot(&moved) / n / step_norm;
                    if curvature.is_finite() && curvature > f64::EPSILON {
                        sigma = curvature + self.mu;
                        beta_next = self.proximal_step(&correlation, &aux, tau, sigma);
                    }
                }
            }

            let beta_diff = &beta_next - &beta;
            let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
            aux = &beta_next + &(&beta_diff * ((t - 1.0) / t_next));

            let max_diff = max_abs(beta_diff.view());
            let max_coef = max_abs(beta_next.view());

            t = t_next;
            beta = beta_next;

            // An all-zero iterate counts as converged.
            if max_coef == 0.0 || max_diff / max_coef <= options.tolerance {
                return SolverFit {
                    beta,
                    diagnostic: ConvergenceDiagnostic {
                        iterations: iteration + 1,
                        converged: true,
                    },
                };
            }
        }

        SolverFit {
            beta,
            diagnostic: ConvergenceDiagnostic {
                iterations: options.max_iter,
                converged: false,
            },
        }
    }
}

/// `||G||_2 / n + mu` with `G = X'X`, or `XX'` for wide designs.
fn step_size_sigma(x: ArrayView2<f64>, mu: f64) -> Result<f64, AlgorithmError> {
    let (n, p) = x.dim();
    let gram = if p > n { x.dot(&x.t()) } else { x.t().dot(&x) };
    let eigenvalues = gram
        .eigvalsh(UPLO::Lower)
        .map_err(AlgorithmError::EigendecompositionFailed)?;
    let spectral_norm = eigenvalues.iter().fold(0.0_f64, |acc, &ev| acc.max(ev.abs()));
    Ok(spectral_norm / n as f64 + mu)
}

fn max_abs(v: ArrayView1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |acc, &value| acc.max(value.abs()))
}

fn initial_beta(
    n_features: usize,
    warm_start: Option<ArrayView1<f64>>,
) -> Result<Array1<f64>, AlgorithmError> {
    match warm_start {
        Some(beta) if beta.len() != n_features => Err(AlgorithmError::ShapeMismatch(format!(
            "warm start has {} entries but the design has {} features",
            beta.len(),
            n_features
        ))),
        Some(beta) => Ok(beta.to_owned()),
        None => Ok(Array1::zeros(n_features)),
    }
}

/// Rejects empty or non-finite designs and data/label row mismatches.
pub(crate) fn check_design(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), AlgorithmError> {
    let (n, p) = x.dim();
    if n == 0 || p == 0 {
        return Err(AlgorithmError::ShapeMismatch(format!(
            "design matrix is {n}x{p}; at least one sample and one feature are required"
        )));
    }
    if y.len() != n {
        return Err(AlgorithmError::ShapeMismatch(format!(
            "data has {n} rows but labels have {} entries",
            y.len()
        )));
    }
    if !x.iter().all(|v| v.is_finite()) {
        return Err(AlgorithmError::NonFiniteInput("design matrix"));
    }
    if !y.iter().all(|v| v.is_finite()) {
        return Err(AlgorithmError::NonFiniteInput("label vector"));
    }
    Ok(())
}

pub(crate) fn check_penalty(name: &'static str, value: f64) -> Result<(), AlgorithmError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AlgorithmError::InvalidPenalty { name, value })
    }
}

/// Sparsity grids must be nonempty, positive and strictly monotone.
pub(crate) fn check_sparsity_grid(tau_range: &[f64]) -> Result<GridOrder, AlgorithmError> {
    if tau_range.is_empty() {
        return Err(AlgorithmError::InvalidGrid("tau range is empty".to_string()));
    }
    if let Some(bad) = tau_range.iter().find(|t| !(t.is_finite() && **t > 0.0)) {
        return Err(AlgorithmError::InvalidGrid(format!(
            "tau values must be finite and positive, found {bad}"
        )));
    }
    let order = match tau_range {
        [first, second, ..] if second < first => GridOrder::Decreasing,
        _ => GridOrder::Increasing,
    };
    let out_of_order = |pair: &&[f64]| match order {
        GridOrder::Increasing => pair[1] <= pair[0],
        GridOrder::Decreasing => pair[1] >= pair[0],
    };
    if let Some(pair) = tau_range.windows(2).find(out_of_order) {
        return Err(AlgorithmError::InvalidGrid(format!(
            "tau range must be strictly monotone, found {} followed by {}",
            pair[0], pair[1]
        )));
    }
    Ok(order)
}

/// Ridge-type grids (`mu`, `lambda`) must be nonempty, finite and non-negative.
pub(crate) fn check_ridge_grid(name: &'static str, grid: &[f64]) -> Result<(), AlgorithmError> {
    if grid.is_empty() {
        return Err(AlgorithmError::InvalidGrid(format!("{name} range is empty")));
    }
    if let Some(bad) = grid.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
        return Err(AlgorithmError::InvalidGrid(format!(
            "{name} values must be finite and non-negative, found {bad}"
        )));
    }
    Ok(())
}
