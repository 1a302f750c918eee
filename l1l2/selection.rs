// l1l2/selection.rs

//! # Nested cross-validated model selection
//!
//! The procedure runs in two stages.
//!
//! 1.  **Minimal model** ([`select_minimal_model`]). For every fold the training
//!     slice is normalized, an L1L2 regularization path is computed over the
//!     sparsity grid, and each sparse model is refit by ridge regression on its
//!     selected features for every value of the ridge grid. Train and test errors
//!     are averaged over folds and the `(tau, lambda)` cell with the smallest
//!     test error wins.
//! 2.  **Model cascade** ([`build_model_cascade`]). With `(tau, lambda)` fixed,
//!     the full training set is refit for every value of the correlation penalty
//!     `mu`, producing one coefficient vector and selection mask per `mu`.
//!
//! [`model_selection`] chains both stages.
//!
//! Folds are independent and are evaluated in parallel on the rayon pool. Each
//! worker owns its slices and error buffers; the surfaces are merged once all
//! folds have finished, after truncating every fold to the shortest path.

use crate::algorithms::{
    AlgorithmError, ConvergenceDiagnostic, GridOrder, SolverOptions, check_design, check_penalty,
    check_ridge_grid, check_sparsity_grid, l1l2_path, l1l2_regularization, predict,
    selection_mask, support,
};
use crate::ridge::{RidgeSolver, ridge_regression};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;
use std::collections::HashSet;
use thiserror::Error;

/// Error between true labels and predictions. Must be total: it is also called
/// on the all-zero predictions of the null model.
pub type ErrorFunction = dyn Fn(ArrayView1<f64>, ArrayView1<f64>) -> f64 + Sync;

/// Normalizes a `(train, test)` pair of data blocks using training statistics.
pub type DataNormalizer =
    dyn Fn(ArrayView2<f64>, ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) + Sync;

/// Normalizes a `(train, test)` pair of label vectors using training statistics.
pub type LabelsNormalizer =
    dyn Fn(ArrayView1<f64>, ArrayView1<f64>) -> (Array1<f64>, Array1<f64>) + Sync;

/// Averaged errors indexed by `(tau index, lambda index)`.
pub type ErrorSurface = Array2<f64>;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Solver error: {0}")]
    Algorithm(#[from] AlgorithmError),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Fold {index} is invalid: {reason}")]
    InvalidFold { index: usize, reason: String },

    #[error("At least one cross-validation fold is required.")]
    NoFolds,

    #[error("The minimal-model stage requires an error function.")]
    MissingErrorFunction,

    #[error("Degenerate error surface: {0}")]
    DegenerateErrorSurface(String),
}

/// Collaborators and options shared by both selection stages.
#[derive(Clone, Copy, Default)]
pub struct SelectionConfig<'a> {
    /// Required by [`select_minimal_model`]; optional for the cascade.
    pub error_function: Option<&'a ErrorFunction>,
    pub data_normalizer: Option<&'a DataNormalizer>,
    pub labels_normalizer: Option<&'a LabelsNormalizer>,
    pub solver: SolverOptions,
    /// Return the averaged train and test surfaces of the minimal-model stage.
    pub returns_kcv_errors: bool,
}

impl<'a> SelectionConfig<'a> {
    pub fn new(error_function: &'a ErrorFunction) -> Self {
        Self {
            error_function: Some(error_function),
            ..Self::default()
        }
    }

    pub fn with_data_normalizer(mut self, normalizer: &'a DataNormalizer) -> Self {
        self.data_normalizer = Some(normalizer);
        self
    }

    pub fn with_labels_normalizer(mut self, normalizer: &'a LabelsNormalizer) -> Self {
        self.labels_normalizer = Some(normalizer);
        self
    }

    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_kcv_errors(mut self, enabled: bool) -> Self {
        self.returns_kcv_errors = enabled;
        self
    }
}

/// Train/test row indices of one cross-validation split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Fold {
    pub fn new(train: Vec<usize>, test: Vec<usize>) -> Self {
        Self { train, test }
    }
}

/// Averaged cross-validation errors of the minimal-model stage.
///
/// Rows follow the order of the tau grid and cover only its `cascade_length`
/// weakest penalties: the head of an increasing grid, the tail of a decreasing
/// one.
#[derive(Debug, Clone)]
pub struct KcvErrors {
    pub test: ErrorSurface,
    pub train: ErrorSurface,
}

/// Path statistics of one fold.
#[derive(Debug, Clone)]
pub struct FoldDiagnostics {
    /// Number of nonzero models on the fold's path.
    pub path_length: usize,
    /// Number of penalties solved before saturation.
    pub evaluated: usize,
    /// Kept solves, weakest penalty first.
    pub solves: Vec<ConvergenceDiagnostic>,
}

impl FoldDiagnostics {
    pub fn capped_solves(&self) -> usize {
        self.solves.iter().filter(|d| !d.converged).count()
    }
}

#[derive(Debug, Clone)]
pub struct MinimalModel {
    pub tau_opt: f64,
    pub lambda_opt: f64,
    /// Position of `tau_opt` in the caller's tau grid.
    pub tau_index: usize,
    pub lambda_index: usize,
    /// Averaged test error of the selected cell.
    pub min_test_error: f64,
    /// Number of sparsity penalties kept in the averaged surfaces.
    pub cascade_length: usize,
    pub kcv_errors: Option<KcvErrors>,
    /// One entry per fold, in fold order.
    pub diagnostics: Vec<FoldDiagnostics>,
}

#[derive(Debug, Clone)]
pub struct CascadeErrors {
    pub train: Vec<f64>,
    pub test: Vec<f64>,
}

/// Models refit for every `mu`, all vectors aligned with `mu_range`.
#[derive(Debug, Clone)]
pub struct ModelCascade {
    pub tau: f64,
    pub lambda: f64,
    pub mu_range: Vec<f64>,
    /// Full-length coefficient vectors; unselected features are exactly zero.
    pub coefficients: Vec<Array1<f64>>,
    pub selections: Vec<Array1<bool>>,
    pub errors: Option<CascadeErrors>,
    pub diagnostics: Vec<ConvergenceDiagnostic>,
}

#[derive(Debug, Clone)]
pub struct ModelSelection {
    pub minimal: MinimalModel,
    pub cascade: ModelCascade,
}

/// Selects the `(tau, lambda)` pair with the smallest cross-validated test error.
pub fn select_minimal_model(
    data: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    mu: f64,
    tau_range: &[f64],
    lambda_range: &[f64],
    folds: &[Fold],
    config: &SelectionConfig,
) -> Result<MinimalModel, SelectionError> {
    check_design(data, labels)?;
    check_penalty("mu", mu)?;
    let order = check_sparsity_grid(tau_range)?;
    check_ridge_grid("lambda", lambda_range)?;
    config.solver.validate()?;
    let error_function = config
        .error_function
        .ok_or(SelectionError::MissingErrorFunction)?;
    validate_folds(folds, data.nrows())?;

    log::info!(
        "Selecting the minimal model over {} folds ({} tau x {} lambda values, mu = {mu:.4e}).",
        folds.len(),
        tau_range.len(),
        lambda_range.len()
    );

    let by_strength = order.by_strength(tau_range);
    let problem = InnerProblem {
        data: data.view(),
        labels: labels.view(),
        mu,
        tau_range: &by_strength,
        lambda_range,
        error_function,
        config,
    };
    let outcomes = folds
        .par_iter()
        .map(|fold| problem.evaluate_fold(fold))
        .collect::<Result<Vec<_>, _>>()?;

    for (index, outcome) in outcomes.iter().enumerate() {
        let capped = outcome.diagnostics.capped_solves();
        if capped > 0 {
            log::warn!(
                "Fold {index}: {capped} of {} path solves hit the iteration cap of {}.",
                outcome.diagnostics.evaluated,
                config.solver.max_iter
            );
        }
    }

    let cascade_length = outcomes
        .iter()
        .map(|outcome| outcome.diagnostics.path_length)
        .min()
        .unwrap_or(0);
    if cascade_length == 0 {
        return Err(SelectionError::DegenerateErrorSurface(format!(
            "at least one fold produced the null model for the weakest tau ({:.4e})",
            by_strength[0]
        )));
    }
    if cascade_length < tau_range.len() {
        log::info!(
            "Error surfaces truncated to the {cascade_length} weakest of {} tau values.",
            tau_range.len()
        );
    }

    let mut test = average_surfaces(outcomes.iter().map(|o| &o.test), cascade_length);
    let mut train = average_surfaces(outcomes.iter().map(|o| &o.train), cascade_length);

    // Fold surfaces are in strength order; rows go back to the grid's order.
    let first_row = match order {
        GridOrder::Increasing => 0,
        GridOrder::Decreasing => {
            test.invert_axis(Axis(0));
            train.invert_axis(Axis(0));
            tau_range.len() - cascade_length
        }
    };

    let (row, lambda_index) = argmin_row_major(&test).ok_or_else(|| {
        SelectionError::DegenerateErrorSurface(
            "every averaged test error is NaN".to_string(),
        )
    })?;
    let min_test_error = test[[row, lambda_index]];
    let tau_index = first_row + row;

    log::info!(
        "Selected tau = {:.4e}, lambda = {:.4e} (mean test error {min_test_error:.6}).",
        tau_range[tau_index],
        lambda_range[lambda_index]
    );

    let kcv_errors = config
        .returns_kcv_errors
        .then_some(KcvErrors { test, train });

    Ok(MinimalModel {
        tau_opt: tau_range[tau_index],
        lambda_opt: lambda_range[lambda_index],
        tau_index,
        lambda_index,
        min_test_error,
        cascade_length,
        kcv_errors,
        diagnostics: outcomes.into_iter().map(|o| o.diagnostics).collect(),
    })
}

/// Refits the full training set for every `mu` at fixed `(tau, lambda)`.
#[allow(clippy::too_many_arguments)]
pub fn build_model_cascade(
    data: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    test_data: ArrayView2<f64>,
    test_labels: ArrayView1<f64>,
    tau: f64,
    lambda: f64,
    mu_range: &[f64],
    config: &SelectionConfig,
) -> Result<ModelCascade, SelectionError> {
    check_design(data, labels)?;
    check_design(test_data, test_labels)?;
    if test_data.ncols() != data.ncols() {
        return Err(SelectionError::ShapeMismatch(format!(
            "training data has {} features but test data has {}",
            data.ncols(),
            test_data.ncols()
        )));
    }
    check_penalty("tau", tau)?;
    check_penalty("lambda", lambda)?;
    check_ridge_grid("mu", mu_range)?;
    config.solver.validate()?;

    let split = SplitData::normalized(
        data.to_owned(),
        test_data.to_owned(),
        labels.to_owned(),
        test_labels.to_owned(),
        config,
    )?;
    let n_features = data.ncols();

    let mut cascade = ModelCascade {
        tau,
        lambda,
        mu_range: mu_range.to_vec(),
        coefficients: Vec::with_capacity(mu_range.len()),
        selections: Vec::with_capacity(mu_range.len()),
        errors: config.error_function.map(|_| CascadeErrors {
            train: Vec::with_capacity(mu_range.len()),
            test: Vec::with_capacity(mu_range.len()),
        }),
        diagnostics: Vec::with_capacity(mu_range.len()),
    };

    for &mu in mu_range {
        let fit = l1l2_regularization(
            split.train_x.view(),
            split.train_y.view(),
            mu,
            tau,
            None,
            &config.solver,
        )?;
        if !fit.diagnostic.converged {
            log::warn!(
                "Cascade solve at mu = {mu:.4e} hit the iteration cap of {}.",
                config.solver.max_iter
            );
        }

        let columns = support(fit.beta.view());
        let coefficients = if columns.is_empty() {
            Array1::zeros(n_features)
        } else {
            let weights = ridge_regression(
                split.train_x.select(Axis(1), &columns).view(),
                split.train_y.view(),
                lambda,
            )?;
            scatter(&columns, weights.view(), n_features)
        };
        log::debug!("mu = {mu:.4e}: {} features selected.", columns.len());

        if let (Some(errors), Some(error_function)) =
            (cascade.errors.as_mut(), config.error_function)
        {
            let train_prediction = predict(split.train_x.view(), coefficients.view())?;
            let test_prediction = predict(split.test_x.view(), coefficients.view())?;
            errors
                .train
                .push(error_function(split.train_y.view(), train_prediction.view()));
            errors
                .test
                .push(error_function(split.test_y.view(), test_prediction.view()));
        }

        cascade.selections.push(selection_mask(fit.beta.view()));
        cascade.coefficients.push(coefficients);
        cascade.diagnostics.push(fit.diagnostic);
    }

    Ok(cascade)
}

/// Runs the minimal-model stage at `mu_range[0]`, then the cascade over `mu_range`.
#[allow(clippy::too_many_arguments)]
pub fn model_selection(
    data: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    test_data: ArrayView2<f64>,
    test_labels: ArrayView1<f64>,
    mu_range: &[f64],
    tau_range: &[f64],
    lambda_range: &[f64],
    folds: &[Fold],
    config: &SelectionConfig,
) -> Result<ModelSelection, SelectionError> {
    check_ridge_grid("mu", mu_range)?;

    let minimal = select_minimal_model(
        data,
        labels,
        mu_range[0],
        tau_range,
        lambda_range,
        folds,
        config,
    )?;
    let cascade = build_model_cascade(
        data,
        labels,
        test_data,
        test_labels,
        minimal.tau_opt,
        minimal.lambda_opt,
        mu_range,
        config,
    )?;

    Ok(ModelSelection { minimal, cascade })
}

/// Checks that every fold has nonempty, disjoint, in-bounds train and test sets.
pub fn validate_folds(folds: &[Fold], n_samples: usize) -> Result<(), SelectionError> {
    if folds.is_empty() {
        return Err(SelectionError::NoFolds);
    }
    for (index, fold) in folds.iter().enumerate() {
        let invalid = |reason: String| SelectionError::InvalidFold { index, reason };
        if fold.train.is_empty() {
            return Err(invalid("the training set is empty".to_string()));
        }
        if fold.test.is_empty() {
            return Err(invalid("the test set is empty".to_string()));
        }
        if let Some(&row) = fold
            .train
            .iter()
            .chain(fold.test.iter())
            .find(|&&row| row >= n_samples)
        {
            return Err(invalid(format!(
                "row {row} is out of bounds for {n_samples} samples"
            )));
        }
        let train: HashSet<usize> = fold.train.iter().copied().collect();
        if let Some(&row) = fold.test.iter().find(|row| train.contains(row)) {
            return Err(invalid(format!(
                "row {row} appears in both the training and the test set"
            )));
        }
    }
    Ok(())
}

/// Shared inputs of the per-fold work of the minimal-model stage.
struct InnerProblem<'a> {
    data: ArrayView2<'a, f64>,
    labels: ArrayView1<'a, f64>,
    mu: f64,
    tau_range: &'a [f64],
    lambda_range: &'a [f64],
    error_function: &'a ErrorFunction,
    config: &'a SelectionConfig<'a>,
}

struct FoldOutcome {
    test: ErrorSurface,
    train: ErrorSurface,
    diagnostics: FoldDiagnostics,
}

impl InnerProblem<'_> {
    fn evaluate_fold(&self, fold: &Fold) -> Result<FoldOutcome, SelectionError> {
        let split = SplitData::from_fold(self.data, self.labels, fold, self.config)?;
        let path = l1l2_path(
            split.train_x.view(),
            split.train_y.view(),
            self.mu,
            self.tau_range,
            None,
            &self.config.solver,
        )?;

        let shape = (path.len(), self.lambda_range.len());
        let mut test = Array2::zeros(shape);
        let mut train = Array2::zeros(shape);

        for (j, beta) in path.coefficients.iter().enumerate() {
            let refit = SupportRefit::new(split.train_x.view(), split.train_y.view(), beta.view())?;
            for (k, &lambda) in self.lambda_range.iter().enumerate() {
                let coefficients = refit.coefficients(lambda)?;
                let test_prediction = predict(split.test_x.view(), coefficients.view())?;
                let train_prediction = predict(split.train_x.view(), coefficients.view())?;
                test[[j, k]] = (self.error_function)(split.test_y.view(), test_prediction.view());
                train[[j, k]] = (self.error_function)(split.train_y.view(), train_prediction.view());
            }
        }

        Ok(FoldOutcome {
            test,
            train,
            diagnostics: FoldDiagnostics {
                path_length: path.len(),
                evaluated: path.evaluated,
                solves: path.diagnostics,
            },
        })
    }
}

/// Train/test blocks after normalization.
struct SplitData {
    train_x: Array2<f64>,
    test_x: Array2<f64>,
    train_y: Array1<f64>,
    test_y: Array1<f64>,
}

impl SplitData {
    /// Slices the fold's rows first and normalizes afterwards, so statistics
    /// only ever come from the fold's training rows.
    fn from_fold(
        data: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        fold: &Fold,
        config: &SelectionConfig,
    ) -> Result<Self, SelectionError> {
        Self::normalized(
            data.select(Axis(0), &fold.train),
            data.select(Axis(0), &fold.test),
            labels.select(Axis(0), &fold.train),
            labels.select(Axis(0), &fold.test),
            config,
        )
    }

    fn normalized(
        train_x: Array2<f64>,
        test_x: Array2<f64>,
        train_y: Array1<f64>,
        test_y: Array1<f64>,
        config: &SelectionConfig,
    ) -> Result<Self, SelectionError> {
        let (train_x, test_x) = match config.data_normalizer {
            Some(normalize) => {
                let (train, test) = normalize(train_x.view(), test_x.view());
                if train.dim() != train_x.dim() || test.dim() != test_x.dim() {
                    return Err(SelectionError::ShapeMismatch(
                        "the data normalizer changed the shape of its input".to_string(),
                    ));
                }
                (train, test)
            }
            None => (train_x, test_x),
        };
        let (train_y, test_y) = match config.labels_normalizer {
            Some(normalize) => {
                let (train, test) = normalize(train_y.view(), test_y.view());
                if train.len() != train_y.len() || test.len() != test_y.len() {
                    return Err(SelectionError::ShapeMismatch(
                        "the labels normalizer changed the length of its input".to_string(),
                    ));
                }
                (train, test)
            }
            None => (train_y, test_y),
        };
        Ok(Self {
            train_x,
            test_x,
            train_y,
            test_y,
        })
    }
}

/// Ridge refit restricted to the support of one sparse solution. The gram
/// decomposition is shared by every `lambda` of the grid.
struct SupportRefit {
    columns: Vec<usize>,
    n_features: usize,
    // None for the null model.
    solver: Option<RidgeSolver>,
}

impl SupportRefit {
    fn new(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        beta: ArrayView1<f64>,
    ) -> Result<Self, AlgorithmError> {
        let columns = support(beta);
        let solver = if columns.is_empty() {
            None
        } else {
            Some(RidgeSolver::new(x.select(Axis(1), &columns).view(), y)?)
        };
        Ok(Self {
            columns,
            n_features: x.ncols(),
            solver,
        })
    }

    fn coefficients(&self, lambda: f64) -> Result<Array1<f64>, AlgorithmError> {
        match &self.solver {
            Some(solver) => Ok(scatter(
                &self.columns,
                solver.solve(lambda)?.view(),
                self.n_features,
            )),
            None => Ok(Array1::zeros(self.n_features)),
        }
    }
}

/// Places subset weights at their column positions in a zero vector.
fn scatter(columns: &[usize], weights: ArrayView1<f64>, n_features: usize) -> Array1<f64> {
    let mut full = Array1::zeros(n_features);
    for (&column, &weight) in columns.iter().zip(weights.iter()) {
        full[column] = weight;
    }
    full
}

/// Elementwise mean of the first `rows` rows of every surface.
fn average_surfaces<'s>(
    surfaces: impl Iterator<Item = &'s ErrorSurface>,
    rows: usize,
) -> ErrorSurface {
    let mut count = 0usize;
    let mut total: Option<ErrorSurface> = None;
    for surface in surfaces {
        let head = surface.slice(s![..rows, ..]);
        match total.as_mut() {
            Some(sum) => *sum += &head,
            None => total = Some(head.to_owned()),
        }
        count += 1;
    }
    match total {
        Some(sum) => sum / count as f64,
        None => Array2::zeros((0, 0)),
    }
}

/// First minimum in row-major order; NaN cells are skipped.
fn argmin_row_major(surface: &ErrorSurface) -> Option<(usize, usize)> {
    let mut best: Option<((usize, usize), f64)> = None;
    for (index, &value) in surface.indexed_iter() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if value >= current => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{center, kfold_splits, regression_error};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SUPPORT: [usize; 5] = [3, 11, 17, 26, 38];
    const TRUE_BETA: [f64; 5] = [10.0, -8.0, 6.0, 4.0, -2.0];

    fn orthogonal_design() -> (Array2<f64>, Array1<f64>) {
        let (n, p) = (30, 40);
        let scale = (n as f64).sqrt();
        let mut x = Array2::zeros((n, p));
        let mut truth = Array1::zeros(p);
        for (row, (&column, &value)) in SUPPORT.iter().zip(TRUE_BETA.iter()).enumerate() {
            x[[row, column]] = scale;
            truth[column] = value;
        }
        for column in (0..p).filter(|c| !SUPPORT.contains(c)) {
            for row in 5..n {
                x[[row, column]] = (((row * 7 + column * 13) % 11) as f64 - 5.0) * 0.03;
            }
        }
        let y = x.dot(&truth);
        (x, y)
    }

    fn random_regression(n: usize, p: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x = Array2::from_shape_fn((n, p), |_| rng.r#gen::<f64>() * 2.0 - 1.0);
        let mut truth = Array1::zeros(p);
        for j in 0..p.min(4) {
            truth[j] = 3.0 - j as f64;
        }
        let noise = Array1::from_shape_fn(n, |_| (rng.r#gen::<f64>() - 0.5) * 0.1);
        let y = x.dot(&truth) + noise;
        (x, y)
    }

    /// One constant feature whose per-fold lasso threshold is `2 * mean(y_train)`.
    fn constant_feature_problem() -> (Array2<f64>, Array1<f64>, Vec<Fold>) {
        let x = Array2::ones((6, 1));
        let y = arr1(&[4.0, 4.0, 4.0, 0.0, 0.0, 0.0]);
        let folds = vec![
            Fold::new(vec![0, 1, 2, 3], vec![4, 5]),
            Fold::new(vec![2, 3, 4, 5], vec![0, 1]),
        ];
        (x, y, folds)
    }

    fn solver() -> SolverOptions {
        SolverOptions {
            max_iter: 1000,
            tolerance: 1e-5,
            adaptive: false,
        }
    }

    #[test]
    fn argmin_prefers_the_first_row_major_minimum_and_skips_nan() {
        let surface = arr2(&[[3.0, f64::NAN, 2.0], [1.0, 5.0, 1.0], [1.0, 0.5, 0.5]]);
        assert_eq!(argmin_row_major(&surface), Some((2, 1)));

        let ties = arr2(&[[2.0, 1.0], [1.0, 1.0]]);
        assert_eq!(argmin_row_major(&ties), Some((0, 1)));

        let all_nan = arr2(&[[f64::NAN, f64::NAN]]);
        assert_eq!(argmin_row_major(&all_nan), None);
    }

    #[test]
    fn averaging_truncates_and_sums_before_dividing() {
        let a = arr2(&[[1.0, 2.0], [3.0, 4.0], [9.0, 9.0]]);
        let b = arr2(&[[3.0, 4.0], [5.0, 6.0]]);
        let mean = average_surfaces([&a, &b].into_iter(), 2);
        assert_eq!(mean, arr2(&[[2.0, 3.0], [4.0, 5.0]]));
    }

    #[test]
    fn folds_are_validated() {
        assert!(matches!(validate_folds(&[], 5), Err(SelectionError::NoFolds)));
        let cases = [
            Fold::new(vec![], vec![1]),
            Fold::new(vec![0], vec![]),
            Fold::new(vec![0, 7], vec![1]),
            Fold::new(vec![0, 1], vec![1, 2]),
        ];
        for fold in cases {
            let folds = vec![Fold::new(vec![0, 1], vec![2]), fold];
            assert!(matches!(
                validate_folds(&folds, 5),
                Err(SelectionError::InvalidFold { index: 1, .. })
            ));
        }
        // Folds need not cover every sample.
        assert!(validate_folds(&[Fold::new(vec![0, 1], vec![3])], 5).is_ok());
    }

    #[test]
    fn split_is_taken_before_normalization() {
        let data = arr2(&[[1.0, 10.0], [3.0, 20.0], [100.0, 0.0], [5.0, 30.0]]);
        let labels = arr1(&[1.0, 2.0, 3.0, 4.0]);
        let fold = Fold::new(vec![0, 1, 3], vec![2]);
        let config = SelectionConfig::default().with_data_normalizer(&center);
        let split = SplitData::from_fold(data.view(), labels.view(), &fold, &config).unwrap();

        // Training means are (3, 20); the held-out row never contributes.
        assert_eq!(split.train_x, arr2(&[[-2.0, -10.0], [0.0, 0.0], [2.0, 10.0]]));
        assert_eq!(split.test_x, arr2(&[[97.0, -20.0]]));
        assert_eq!(split.train_y, arr1(&[1.0, 2.0, 4.0]));
        assert_eq!(split.test_y, arr1(&[3.0]));
    }

    #[test]
    fn minimal_model_requires_an_error_function() {
        let (x, y, folds) = constant_feature_problem();
        let config = SelectionConfig::default();
        let result = select_minimal_model(x.view(), y.view(), 0.0, &[0.5], &[0.0], &folds, &config);
        assert!(matches!(result, Err(SelectionError::MissingErrorFunction)));
    }

    #[test]
    fn surfaces_are_truncated_to_the_shortest_fold_path() {
        let (x, y, folds) = constant_feature_problem();
        let config = SelectionConfig::new(&regression_error)
            .with_solver(solver())
            .with_kcv_errors(true);
        let tau_range = [0.5, 1.5, 3.0, 5.0, 7.0];
        let lambda_range = [0.0, 0.1];
        let model =
            select_minimal_model(x.view(), y.view(), 0.0, &tau_range, &lambda_range, &folds, &config)
                .unwrap();

        // Fold 0 trains on mean 3 (threshold 6), fold 1 on mean 1 (threshold 2).
        assert_eq!(model.diagnostics[0].path_length, 4);
        assert_eq!(model.diagnostics[0].evaluated, 5);
        assert_eq!(model.diagnostics[1].path_length, 2);
        assert_eq!(model.diagnostics[1].evaluated, 4);
        assert_eq!(model.cascade_length, 2);

        let kcv = model.kcv_errors.unwrap();
        assert_eq!(kcv.test.dim(), (2, 2));
        assert_eq!(kcv.train.dim(), (2, 2));
        assert!(model.tau_index < 2);
        assert_eq!(model.tau_opt, tau_range[model.tau_index]);
        assert_eq!(model.lambda_opt, lambda_range[model.lambda_index]);
    }

    #[test]
    fn decreasing_grid_keeps_its_order_in_the_surfaces() {
        let (x, y, folds) = constant_feature_problem();
        let config = SelectionConfig::new(&regression_error)
            .with_solver(solver())
            .with_kcv_errors(true);
        let lambda_range = [0.0, 0.1];
        let increasing = [0.5, 1.5, 3.0, 5.0, 7.0];
        let decreasing = [7.0, 5.0, 3.0, 1.5, 0.5];
        let up =
            select_minimal_model(x.view(), y.view(), 0.0, &increasing, &lambda_range, &folds, &config)
                .unwrap();
        let down =
            select_minimal_model(x.view(), y.view(), 0.0, &decreasing, &lambda_range, &folds, &config)
                .unwrap();

        assert_eq!(down.cascade_length, 2);
        assert_eq!(down.diagnostics[0].evaluated, 5);
        assert_eq!(down.diagnostics[1].evaluated, 4);
        let up_test = up.kcv_errors.unwrap().test;
        let down_test = down.kcv_errors.unwrap().test;
        assert_eq!(down_test.row(0), up_test.row(1));
        assert_eq!(down_test.row(1), up_test.row(0));

        // Both kept models select the single feature, so their refits tie and
        // the first row of each grid wins.
        assert_eq!(up.tau_index, 0);
        assert_eq!(down.tau_index, 3);
        assert_eq!(down.tau_opt, 1.5);
        assert_eq!(down.lambda_index, up.lambda_index);
        assert_eq!(down.min_test_error, up.min_test_error);
    }

    #[test]
    fn zero_labels_give_a_degenerate_surface() {
        let (x, _, folds) = constant_feature_problem();
        let y = Array1::zeros(6);
        let config = SelectionConfig::new(&regression_error).with_solver(solver());
        let result = select_minimal_model(x.view(), y.view(), 0.1, &[0.1, 1.0], &[0.0], &folds, &config);
        assert!(matches!(result, Err(SelectionError::DegenerateErrorSurface(_))));
    }

    #[test]
    fn five_fold_selection_hits_the_surface_minimum() {
        let (x, y) = random_regression(50, 12, 42);
        let folds = kfold_splits(50, 5, 7).unwrap();
        let config = SelectionConfig::new(&regression_error)
            .with_solver(solver())
            .with_kcv_errors(true);
        let tau_range = [0.01, 0.05, 0.2, 1.0];
        let lambda_range = [0.0, 0.01, 0.1];
        let model =
            select_minimal_model(x.view(), y.view(), 0.1, &tau_range, &lambda_range, &folds, &config)
                .unwrap();

        let kcv = model.kcv_errors.unwrap();
        assert_eq!(kcv.test.dim(), (model.cascade_length, lambda_range.len()));
        let minimum = kcv.test.iter().copied().fold(f64::INFINITY, f64::min);
        assert_eq!(kcv.test[[model.tau_index, model.lambda_index]], minimum);
        assert_eq!(model.min_test_error, minimum);
        for ((row, column), &value) in kcv.test.indexed_iter() {
            if (row, column) < (model.tau_index, model.lambda_index) {
                assert!(value > minimum);
            }
        }
        assert_eq!(model.diagnostics.len(), 5);
        let shortest = model.diagnostics.iter().map(|d| d.path_length).min().unwrap();
        assert_eq!(model.cascade_length, shortest);
    }

    #[test]
    fn kcv_errors_are_only_returned_on_request() {
        let (x, y) = random_regression(30, 6, 3);
        let folds = kfold_splits(30, 3, 1).unwrap();
        let config = SelectionConfig::new(&regression_error).with_solver(solver());
        let model =
            select_minimal_model(x.view(), y.view(), 0.1, &[0.01, 0.1], &[0.0], &folds, &config)
                .unwrap();
        assert!(model.kcv_errors.is_none());
    }

    #[test]
    fn cascade_follows_the_mu_range() {
        let (x, y) = orthogonal_design();
        let config = SelectionConfig::new(&regression_error).with_solver(solver());
        let mu_range = [0.1, 0.5, 1.0];
        let cascade =
            build_model_cascade(x.view(), y.view(), x.view(), y.view(), 1.0, 0.0, &mu_range, &config)
                .unwrap();

        assert_eq!(cascade.mu_range, mu_range.to_vec());
        assert_eq!(cascade.coefficients.len(), 3);
        assert_eq!(cascade.selections.len(), 3);
        assert_eq!(cascade.diagnostics.len(), 3);
        for (coefficients, mask) in cascade.coefficients.iter().zip(cascade.selections.iter()) {
            assert_eq!(coefficients.len(), 40);
            assert_eq!(mask.len(), 40);
            let selected: Vec<usize> = (0..40).filter(|&j| mask[j]).collect();
            assert_eq!(selected, SUPPORT.to_vec());
            // Unpenalized least squares on orthogonal columns recovers the truth.
            for (&column, &value) in SUPPORT.iter().zip(TRUE_BETA.iter()) {
                assert_abs_diff_eq!(coefficients[column], value, epsilon = 1e-8);
            }
        }
        let errors = cascade.errors.unwrap();
        assert_eq!(errors.train.len(), 3);
        for (&train, &test) in errors.train.iter().zip(errors.test.iter()) {
            assert_abs_diff_eq!(train, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(test, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn cascade_ridge_refit_shrinks_orthogonal_columns() {
        let (x, y) = orthogonal_design();
        let config = SelectionConfig::default().with_solver(solver());
        let cascade =
            build_model_cascade(x.view(), y.view(), x.view(), y.view(), 1.0, 0.5, &[0.1], &config)
                .unwrap();
        assert!(cascade.errors.is_none());
        for (&column, &value) in SUPPORT.iter().zip(TRUE_BETA.iter()) {
            assert_abs_diff_eq!(cascade.coefficients[0][column], value / 1.5, epsilon = 1e-8);
        }
    }

    #[test]
    fn cascade_refits_an_empty_selection_to_the_null_model() {
        let (x, y) = orthogonal_design();
        let config = SelectionConfig::new(&regression_error).with_solver(solver());
        let cascade =
            build_model_cascade(x.view(), y.view(), x.view(), y.view(), 100.0, 0.1, &[0.1], &config)
                .unwrap();
        assert!(cascade.coefficients[0].iter().all(|&c| c == 0.0));
        assert!(cascade.selections[0].iter().all(|&selected| !selected));
        let errors = cascade.errors.unwrap();
        assert_abs_diff_eq!(errors.train[0], y.dot(&y) / 30.0, epsilon = 1e-9);
    }

    #[test]
    fn cascade_rejects_mismatched_test_data() {
        let (x, y) = orthogonal_design();
        let narrow = x.slice(s![.., ..10]).to_owned();
        let config = SelectionConfig::default();
        let result =
            build_model_cascade(x.view(), y.view(), narrow.view(), y.view(), 1.0, 0.0, &[0.1], &config);
        assert!(matches!(result, Err(SelectionError::ShapeMismatch(_))));
    }

    #[test]
    fn model_selection_chains_both_stages() {
        let (x, y) = random_regression(60, 10, 11);
        let (test_x, test_y) = random_regression(20, 10, 12);
        let folds = kfold_splits(60, 5, 3).unwrap();
        let config = SelectionConfig::new(&regression_error).with_solver(solver());
        let mu_range = [0.01, 0.1, 1.0];
        let result = model_selection(
            x.view(),
            y.view(),
            test_x.view(),
            test_y.view(),
            &mu_range,
            &[0.01, 0.05, 0.2],
            &[0.0, 0.1],
            &folds,
            &config,
        )
        .unwrap();

        assert_eq!(result.cascade.tau, result.minimal.tau_opt);
        assert_eq!(result.cascade.lambda, result.minimal.lambda_opt);
        assert_eq!(result.cascade.mu_range, mu_range.to_vec());
        assert_eq!(result.cascade.coefficients.len(), 3);
        assert!(result.cascade.errors.is_some());

        assert!(matches!(
            model_selection(
                x.view(),
                y.view(),
                test_x.view(),
                test_y.view(),
                &[],
                &[0.1],
                &[0.0],
                &folds,
                &config,
            ),
            Err(SelectionError::Algorithm(AlgorithmError::InvalidGrid(_)))
        ));
    }
}
