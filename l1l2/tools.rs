// l1l2/tools.rs

//! Default collaborators for model selection: penalty grids, train/test
//! normalizers, cross-validation splits and error functions.
//!
//! Every normalizer computes its statistics on the training block only and
//! applies them to both blocks. The error functions are total and return zero
//! on empty input, so they can score the null model.

use crate::selection::Fold;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ToolsError {
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid split request: {0}")]
    InvalidSplit(String),
}

/// `count` evenly spaced values from `min` to `max`, both included.
pub fn linear_range(min: f64, max: f64, count: usize) -> Result<Vec<f64>, ToolsError> {
    check_range_request(min, max, count)?;
    if count == 1 {
        return Ok(vec![min]);
    }
    let step = (max - min) / (count - 1) as f64;
    let mut values: Vec<f64> = (0..count).map(|i| min + step * i as f64).collect();
    values[count - 1] = max;
    Ok(values)
}

/// `count` values from `min` to `max` with a constant ratio between neighbours.
pub fn geometric_range(min: f64, max: f64, count: usize) -> Result<Vec<f64>, ToolsError> {
    check_range_request(min, max, count)?;
    if min <= 0.0 || max <= 0.0 {
        return Err(ToolsError::InvalidRange(format!(
            "geometric bounds must be positive, got [{min}, {max}]"
        )));
    }
    if count == 1 {
        return Ok(vec![min]);
    }
    let ratio = (max / min).powf(1.0 / (count - 1) as f64);
    let mut values: Vec<f64> = (0..count).map(|i| min * ratio.powi(i as i32)).collect();
    values[count - 1] = max;
    Ok(values)
}

fn check_range_request(min: f64, max: f64, count: usize) -> Result<(), ToolsError> {
    if count == 0 {
        return Err(ToolsError::InvalidRange(
            "at least one value is required".to_string(),
        ));
    }
    if !(min.is_finite() && max.is_finite()) {
        return Err(ToolsError::InvalidRange(format!(
            "bounds must be finite, got [{min}, {max}]"
        )));
    }
    Ok(())
}

/// Subtracts the training column means from both blocks.
pub fn center(train: ArrayView2<f64>, test: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (mean, _) = column_statistics(train);
    let row = mean.view().insert_axis(Axis(0));
    (&train - &row, &test - &row)
}

/// Centers and scales both blocks by the training column means and sample
/// standard deviations. Constant columns are only centered.
pub fn standardize(train: ArrayView2<f64>, test: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (mean, scale) = column_statistics(train);
    let mean = mean.view().insert_axis(Axis(0));
    let scale = scale.view().insert_axis(Axis(0));
    ((&train - &mean) / &scale, (&test - &mean) / &scale)
}

pub fn center_labels(train: ArrayView1<f64>, test: ArrayView1<f64>) -> (Array1<f64>, Array1<f64>) {
    let (mean, _) = vector_statistics(train);
    (train.mapv(|v| v - mean), test.mapv(|v| v - mean))
}

pub fn standardize_labels(
    train: ArrayView1<f64>,
    test: ArrayView1<f64>,
) -> (Array1<f64>, Array1<f64>) {
    let (mean, scale) = vector_statistics(train);
    (
        train.mapv(|v| (v - mean) / scale),
        test.mapv(|v| (v - mean) / scale),
    )
}

/// Column means and sample standard deviations (`ddof = 1`). Scales that are
/// zero or undefined are replaced by one.
fn column_statistics(block: ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
    let mut mean = Array1::zeros(block.ncols());
    let mut scale = Array1::ones(block.ncols());
    for (j, column) in block.axis_iter(Axis(1)).enumerate() {
        let (m, s) = vector_statistics(column);
        mean[j] = m;
        scale[j] = s;
    }
    (mean, scale)
}

fn vector_statistics(values: ArrayView1<f64>) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 1.0);
    }
    let mean = values.sum() / n as f64;
    if n < 2 {
        return (mean, 1.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let scale = variance.sqrt();
    if scale.is_finite() && scale > f64::EPSILON * mean.abs().max(1.0) {
        (mean, scale)
    } else {
        (mean, 1.0)
    }
}

/// Shuffled k-fold splits of `n_samples` rows.
///
/// The first `n_samples % k` folds hold one extra test row. Test and training
/// indices are sorted within each fold.
pub fn kfold_splits(n_samples: usize, k: usize, seed: u64) -> Result<Vec<Fold>, ToolsError> {
    check_fold_count(n_samples, k)?;
    let mut order: Vec<usize> = (0..n_samples).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut assignment = vec![0usize; n_samples];
    let (base, extra) = (n_samples / k, n_samples % k);
    let mut cursor = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        for &row in &order[cursor..cursor + size] {
            assignment[row] = fold;
        }
        cursor += size;
    }
    Ok(folds_from_assignment(&assignment, k))
}

/// Shuffled k-fold splits that keep the class proportions of `labels` in every
/// fold. Every class needs at least `k` members.
pub fn stratified_kfold_splits(
    labels: ArrayView1<f64>,
    k: usize,
    seed: u64,
) -> Result<Vec<Fold>, ToolsError> {
    check_fold_count(labels.len(), k)?;
    if labels.iter().any(|v| v.is_nan()) {
        return Err(ToolsError::InvalidSplit(
            "labels contain NaN values".to_string(),
        ));
    }

    // Keyed on the bit pattern so every distinct label is its own class.
    let mut classes: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        classes.entry(label.to_bits()).or_default().push(row);
    }
    if let Some((bits, members)) = classes.iter().find(|(_, members)| members.len() < k) {
        return Err(ToolsError::InvalidSplit(format!(
            "class {} has {} members, fewer than the {k} folds requested",
            f64::from_bits(*bits),
            members.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut assignment = vec![0usize; labels.len()];
    let mut offset = 0;
    for members in classes.values_mut() {
        members.shuffle(&mut rng);
        for (position, &row) in members.iter().enumerate() {
            assignment[row] = (offset + position) % k;
        }
        offset += members.len();
    }
    Ok(folds_from_assignment(&assignment, k))
}

fn check_fold_count(n_samples: usize, k: usize) -> Result<(), ToolsError> {
    if k < 2 || k > n_samples {
        return Err(ToolsError::InvalidSplit(format!(
            "{k} folds requested for {n_samples} samples; need 2 <= k <= n"
        )));
    }
    Ok(())
}

fn folds_from_assignment(assignment: &[usize], k: usize) -> Vec<Fold> {
    (0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..assignment.len()).partition(|&row| assignment[row] == fold);
            Fold::new(train, test)
        })
        .collect()
}

/// Mean squared error.
pub fn regression_error(labels: ArrayView1<f64>, predictions: ArrayView1<f64>) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f64 = labels
        .iter()
        .zip(predictions.iter())
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    total / labels.len() as f64
}

/// Fraction of samples whose prediction has a different sign than the label.
pub fn classification_error(labels: ArrayView1<f64>, predictions: ArrayView1<f64>) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let mistakes = labels
        .iter()
        .zip(predictions.iter())
        .filter(|&(&y, &p)| sign(y) != sign(p))
        .count();
    mistakes as f64 / labels.len() as f64
}

/// Sign disagreements weighted by the distance of each label from the label
/// mean, so errors on the minority class cost more.
pub fn balanced_classification_error(
    labels: ArrayView1<f64>,
    predictions: ArrayView1<f64>,
) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let mean = labels.sum() / labels.len() as f64;
    let total: f64 = labels
        .iter()
        .zip(predictions.iter())
        .filter(|&(&y, &p)| sign(y) != sign(p))
        .map(|(&y, _)| (y - mean).abs())
        .sum();
    total / labels.len() as f64
}

fn sign(value: f64) -> i8 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use std::collections::HashSet;

    #[test]
    fn ranges_hit_both_endpoints() {
        assert_eq!(linear_range(0.0, 1.0, 5).unwrap(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linear_range(2.0, 3.0, 1).unwrap(), vec![2.0]);

        let geometric = geometric_range(1e-3, 10.0, 5).unwrap();
        let expected = [1e-3, 1e-2, 1e-1, 1.0, 10.0];
        for (&value, &target) in geometric.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(value, target, epsilon = target * 1e-12);
        }
        assert_eq!(*geometric.last().unwrap(), 10.0);
        for pair in geometric.windows(2) {
            assert_abs_diff_eq!(pair[1] / pair[0], 10.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(linear_range(0.0, 1.0, 0).is_err());
        assert!(linear_range(f64::NAN, 1.0, 3).is_err());
        assert!(geometric_range(0.0, 1.0, 3).is_err());
        assert!(geometric_range(-1.0, 1.0, 3).is_err());
    }

    #[test]
    fn center_uses_training_means_only() {
        let train = arr2(&[[1.0, 2.0], [3.0, 6.0]]);
        let test = arr2(&[[0.0, 0.0]]);
        let (train_c, test_c) = center(train.view(), test.view());
        assert_eq!(train_c, arr2(&[[-1.0, -2.0], [1.0, 2.0]]));
        assert_eq!(test_c, arr2(&[[-2.0, -4.0]]));
    }

    #[test]
    fn standardize_scales_by_sample_deviation_and_keeps_constant_columns() {
        let train = arr2(&[[1.0, 5.0], [3.0, 5.0], [5.0, 5.0]]);
        let test = arr2(&[[7.0, 6.0]]);
        let (train_s, test_s) = standardize(train.view(), test.view());
        // Column 0: mean 3, sample deviation 2. Column 1 is constant.
        assert_eq!(train_s, arr2(&[[-1.0, 0.0], [0.0, 0.0], [1.0, 0.0]]));
        assert_eq!(test_s, arr2(&[[2.0, 1.0]]));
    }

    #[test]
    fn label_normalizers_match_their_matrix_versions() {
        let train = arr1(&[2.0, 4.0, 6.0]);
        let test = arr1(&[8.0]);
        let (train_c, test_c) = center_labels(train.view(), test.view());
        assert_eq!(train_c, arr1(&[-2.0, 0.0, 2.0]));
        assert_eq!(test_c, arr1(&[4.0]));
        let (train_s, test_s) = standardize_labels(train.view(), test.view());
        assert_eq!(train_s, arr1(&[-1.0, 0.0, 1.0]));
        assert_eq!(test_s, arr1(&[2.0]));
    }

    #[test]
    fn kfold_splits_partition_the_samples() {
        let folds = kfold_splits(23, 5, 42).unwrap();
        assert_eq!(folds.len(), 5);
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![5, 5, 5, 4, 4]);

        let mut seen = HashSet::new();
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), 23);
            let train: HashSet<usize> = fold.train.iter().copied().collect();
            assert!(fold.test.iter().all(|row| !train.contains(row)));
            for &row in &fold.test {
                assert!(seen.insert(row));
            }
        }
        assert_eq!(seen.len(), 23);
        assert_eq!(folds, kfold_splits(23, 5, 42).unwrap());
    }

    #[test]
    fn kfold_rejects_bad_fold_counts() {
        assert!(kfold_splits(10, 1, 0).is_err());
        assert!(kfold_splits(3, 4, 0).is_err());
    }

    #[test]
    fn stratified_splits_balance_each_class() {
        let labels = Array1::from_iter((0..30).map(|i| if i % 3 == 0 { -1.0 } else { 1.0 }));
        let folds = stratified_kfold_splits(labels.view(), 5, 9).unwrap();
        assert_eq!(folds.len(), 5);
        for fold in &folds {
            let negatives = fold.test.iter().filter(|&&row| labels[row] < 0.0).count();
            assert_eq!(negatives, 2);
            assert_eq!(fold.test.len(), 6);
        }
        let covered: HashSet<usize> = folds.iter().flat_map(|f| f.test.iter().copied()).collect();
        assert_eq!(covered.len(), 30);
    }

    #[test]
    fn stratified_splits_need_enough_members_per_class() {
        let labels = arr1(&[1.0, 1.0, 1.0, -1.0, 1.0]);
        assert!(matches!(
            stratified_kfold_splits(labels.view(), 2, 0),
            Err(ToolsError::InvalidSplit(_))
        ));
    }

    #[test]
    fn error_functions_score_predictions() {
        let labels = arr1(&[1.0, -1.0, 1.0, 1.0]);
        let predictions = arr1(&[0.5, 0.5, -2.0, 1.0]);
        assert_abs_diff_eq!(
            regression_error(labels.view(), predictions.view()),
            (0.25 + 2.25 + 9.0 + 0.0) / 4.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            classification_error(labels.view(), predictions.view()),
            0.5,
            epsilon = 1e-12
        );
        // Mean 0.5: the minority sample (weight 1.5) outweighs a majority one (0.5).
        assert_abs_diff_eq!(
            balanced_classification_error(labels.view(), predictions.view()),
            (1.5 + 0.5) / 4.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn error_functions_are_total() {
        let empty = Array1::<f64>::zeros(0);
        assert_eq!(regression_error(empty.view(), empty.view()), 0.0);
        assert_eq!(classification_error(empty.view(), empty.view()), 0.0);
        assert_eq!(balanced_classification_error(empty.view(), empty.view()), 0.0);

        let labels = arr1(&[1.0, -1.0]);
        let null_model = Array1::zeros(2);
        assert_eq!(classification_error(labels.view(), null_model.view()), 1.0);
    }
}
