#![deny(dead_code)]
#![deny(unused_imports)]

//! Elastic-net (L1L2) regularized regression with nested cross-validated
//! model selection.
//!
//! The numerical core lives in [`algorithms`] (soft thresholding, the FISTA
//! solver and its regularization path) and [`ridge`] (the closed-form refit).
//! [`selection`] builds the two-stage model-selection procedure on top of them.
//! [`tools`] carries the default collaborators: penalty ranges, normalizers,
//! fold generators and error functions. [`config`], [`data`] and [`report`]
//! back the command-line front end.

pub mod algorithms;
pub mod config;
pub mod data;
pub mod report;
pub mod ridge;
pub mod selection;
pub mod tools;

pub use algorithms::{
    AlgorithmError, ConvergenceDiagnostic, RegularizationPath, SolverFit, SolverOptions,
    l1l2_path, l1l2_regularization, soft_thresholding,
};
pub use ridge::ridge_regression;
pub use selection::{
    Fold, MinimalModel, ModelCascade, ModelSelection, SelectionConfig, SelectionError,
    build_model_cascade, model_selection, select_minimal_model,
};
