// l1l2/config.rs

//! TOML run configuration for the command-line front end.
//!
//! ```toml
//! error = "regression"
//! returns_kcv_errors = true
//!
//! [grids]
//! mu = { kind = "values", values = [0.0, 0.1, 1.0] }
//! tau = { kind = "geometric", min = 0.001, max = 1.0, count = 10 }
//! lambda = { kind = "linear", min = 0.0, max = 1.0, count = 5 }
//!
//! [cross_validation]
//! folds = 5
//! seed = 42
//! stratified = false
//!
//! [solver]
//! max_iter = 100000
//! tolerance = 1e-5
//! adaptive = false
//!
//! [normalization]
//! data = "standardize"
//! labels = "center"
//! ```
//!
//! Every section is optional and falls back to its defaults.

use crate::algorithms::SolverOptions;
use crate::selection::{DataNormalizer, ErrorFunction, Fold, LabelsNormalizer, SelectionConfig};
use crate::tools::{self, ToolsError};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid '{name}' grid: {source}")]
    Grid {
        name: &'static str,
        source: ToolsError,
    },
    #[error("Failed to build cross-validation splits: {0}")]
    Splits(#[from] ToolsError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A penalty grid, either listed explicitly or generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GridSpec {
    Values { values: Vec<f64> },
    Linear { min: f64, max: f64, count: usize },
    Geometric { min: f64, max: f64, count: usize },
}

impl GridSpec {
    pub fn resolve(&self) -> Result<Vec<f64>, ToolsError> {
        match self {
            GridSpec::Values { values } if values.is_empty() => Err(ToolsError::InvalidRange(
                "the value list is empty".to_string(),
            )),
            GridSpec::Values { values } => Ok(values.clone()),
            GridSpec::Linear { min, max, count } => tools::linear_range(*min, *max, *count),
            GridSpec::Geometric { min, max, count } => tools::geometric_range(*min, *max, *count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub mu: GridSpec,
    pub tau: GridSpec,
    pub lambda: GridSpec,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            mu: GridSpec::Values { values: vec![0.0] },
            tau: GridSpec::Geometric {
                min: 1e-3,
                max: 1.0,
                count: 10,
            },
            lambda: GridSpec::Geometric {
                min: 1e-3,
                max: 1.0,
                count: 10,
            },
        }
    }
}

/// Grids after generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGrids {
    pub mu: Vec<f64>,
    pub tau: Vec<f64>,
    pub lambda: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    pub folds: usize,
    pub seed: u64,
    /// Keep label proportions in every fold (classification labels).
    pub stratified: bool,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            seed: 0,
            stratified: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationKind {
    #[default]
    None,
    Center,
    Standardize,
}

impl NormalizationKind {
    pub fn data_normalizer(self) -> Option<&'static DataNormalizer> {
        match self {
            NormalizationKind::None => None,
            NormalizationKind::Center => Some(&tools::center as &DataNormalizer),
            NormalizationKind::Standardize => Some(&tools::standardize as &DataNormalizer),
        }
    }

    pub fn labels_normalizer(self) -> Option<&'static LabelsNormalizer> {
        match self {
            NormalizationKind::None => None,
            NormalizationKind::Center => Some(&tools::center_labels as &LabelsNormalizer),
            NormalizationKind::Standardize => {
                Some(&tools::standardize_labels as &LabelsNormalizer)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub data: NormalizationKind,
    pub labels: NormalizationKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    #[default]
    Regression,
    Classification,
    Balanced,
}

impl ErrorKind {
    pub fn function(self) -> &'static ErrorFunction {
        match self {
            ErrorKind::Regression => &tools::regression_error,
            ErrorKind::Classification => &tools::classification_error,
            ErrorKind::Balanced => &tools::balanced_classification_error,
        }
    }
}

/// Everything a `select` run needs besides the data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    // Plain values precede the tables so the struct serializes as valid TOML.
    pub error: ErrorKind,
    pub returns_kcv_errors: bool,
    pub grids: GridConfig,
    pub cross_validation: CrossValidationConfig,
    pub solver: SolverOptions,
    pub normalization: NormalizationConfig,
}

impl RunConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        log::info!("Loaded run configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cross_validation.folds < 2 {
            return Err(ConfigError::Invalid(format!(
                "cross_validation.folds must be at least 2, got {}",
                self.cross_validation.folds
            )));
        }
        self.solver
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.resolve_grids()?;
        Ok(())
    }

    pub fn resolve_grids(&self) -> Result<ResolvedGrids, ConfigError> {
        let resolve = |name: &'static str, spec: &GridSpec| {
            spec.resolve()
                .map_err(|source| ConfigError::Grid { name, source })
        };
        Ok(ResolvedGrids {
            mu: resolve("mu", &self.grids.mu)?,
            tau: resolve("tau", &self.grids.tau)?,
            lambda: resolve("lambda", &self.grids.lambda)?,
        })
    }

    /// Cross-validation splits for `labels` according to `[cross_validation]`.
    pub fn folds(&self, labels: ArrayView1<f64>) -> Result<Vec<Fold>, ConfigError> {
        let cv = &self.cross_validation;
        let folds = if cv.stratified {
            tools::stratified_kfold_splits(labels, cv.folds, cv.seed)?
        } else {
            tools::kfold_splits(labels.len(), cv.folds, cv.seed)?
        };
        Ok(folds)
    }

    pub fn selection_config(&self) -> SelectionConfig<'static> {
        let mut config = SelectionConfig::new(self.error.function())
            .with_solver(self.solver)
            .with_kcv_errors(self.returns_kcv_errors);
        if let Some(normalizer) = self.normalization.data.data_normalizer() {
            config = config.with_data_normalizer(normalizer);
        }
        if let Some(normalizer) = self.normalization.labels.labels_normalizer() {
            config = config.with_labels_normalizer(normalizer);
        }
        config
    }
}
