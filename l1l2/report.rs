// l1l2/report.rs

//! Human-readable TOML summary of a model-selection run.

use crate::selection::{ErrorSurface, ModelSelection};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to read or write report file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML report: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize report to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub path_length: usize,
    pub evaluated: usize,
    pub capped_solves: usize,
}

/// One model of the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeEntry {
    pub mu: f64,
    pub iterations: usize,
    pub converged: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub train_error: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub test_error: Option<f64>,
    /// Indices of the selected features.
    pub selected: Vec<usize>,
    /// Full-length refit coefficients.
    pub coefficients: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub tau_opt: f64,
    pub lambda_opt: f64,
    pub tau_index: usize,
    pub lambda_index: usize,
    pub min_test_error: f64,
    pub cascade_length: usize,
    /// Averaged test errors, one row per tau, present when requested.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kcv_test_errors: Option<Vec<Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kcv_train_errors: Option<Vec<Vec<f64>>>,
    pub folds: Vec<FoldReport>,
    pub cascade: Vec<CascadeEntry>,
}

impl SelectionReport {
    pub fn from_selection(selection: &ModelSelection) -> Self {
        let minimal = &selection.minimal;
        let cascade = &selection.cascade;

        let entries = cascade
            .mu_range
            .iter()
            .enumerate()
            .map(|(i, &mu)| CascadeEntry {
                mu,
                iterations: cascade.diagnostics[i].iterations,
                converged: cascade.diagnostics[i].converged,
                train_error: cascade.errors.as_ref().map(|e| e.train[i]),
                test_error: cascade.errors.as_ref().map(|e| e.test[i]),
                selected: selected_features(&cascade.selections[i]),
                coefficients: cascade.coefficients[i].to_vec(),
            })
            .collect();

        Self {
            tau_opt: minimal.tau_opt,
            lambda_opt: minimal.lambda_opt,
            tau_index: minimal.tau_index,
            lambda_index: minimal.lambda_index,
            min_test_error: minimal.min_test_error,
            cascade_length: minimal.cascade_length,
            kcv_test_errors: minimal.kcv_errors.as_ref().map(|e| surface_rows(&e.test)),
            kcv_train_errors: minimal.kcv_errors.as_ref().map(|e| surface_rows(&e.train)),
            folds: minimal
                .diagnostics
                .iter()
                .map(|fold| FoldReport {
                    path_length: fold.path_length,
                    evaluated: fold.evaluated,
                    capped_solves: fold.capped_solves(),
                })
                .collect(),
            cascade: entries,
        }
    }

    pub fn to_toml(&self) -> Result<String, ReportError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let toml_string = self.to_toml()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}

fn selected_features(mask: &Array1<bool>) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(j, &selected)| selected.then_some(j))
        .collect()
}

fn surface_rows(surface: &ErrorSurface) -> Vec<Vec<f64>> {
    surface.outer_iter().map(|row| row.to_vec()).collect()
}
