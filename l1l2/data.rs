// l1l2/data.rs

//! # Data loading
//!
//! Reads dense numeric matrices and label vectors from headerless delimited
//! text files. Files ending in `.tsv` are tab-separated, everything else is
//! comma-separated. Cells are trimmed, and every row must have the same number
//! of cells and hold finite numbers only.
//!
//! A label file is a matrix with a single column or a single row.

use ndarray::{Array1, Array2};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to read delimited record: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Cell '{value}' at row {row}, column {column} is not a number.")]
    NotANumber {
        row: usize,
        column: usize,
        value: String,
    },
    #[error("Non-finite value found at row {row}, column {column}. All data must be finite.")]
    NonFiniteValue { row: usize, column: usize },
    #[error("Row {row} has {found} cells, but the first row has {expected}.")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("Failed to shape the parsed values: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[error("The input contains no data rows.")]
    Empty,
    #[error("Label input must be a single column or a single row, found a {rows}x{columns} matrix.")]
    NotAVector { rows: usize, columns: usize },
}

/// Loads a numeric matrix, one sample per row.
pub fn load_matrix(path: &Path) -> Result<Array2<f64>, DataError> {
    let file = File::open(path)?;
    let matrix = read_matrix(file, delimiter_for(path))?;
    log::info!(
        "Loaded {}x{} matrix from {}",
        matrix.nrows(),
        matrix.ncols(),
        path.display()
    );
    Ok(matrix)
}

/// Loads a label vector.
pub fn load_labels(path: &Path) -> Result<Array1<f64>, DataError> {
    let file = File::open(path)?;
    let labels = read_labels(file, delimiter_for(path))?;
    log::info!("Loaded {} labels from {}", labels.len(), path.display());
    Ok(labels)
}

pub fn read_matrix<R: Read>(reader: R, delimiter: u8) -> Result<Array2<f64>, DataError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(delimiter)
        .from_reader(reader);

    let mut values = Vec::new();
    let mut width = None;
    let mut rows = 0;
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let expected = *width.get_or_insert(record.len());
        if record.len() != expected {
            return Err(DataError::RaggedRow {
                row,
                found: record.len(),
                expected,
            });
        }
        for (column, cell) in record.iter().enumerate() {
            let value: f64 = cell.parse().map_err(|_| DataError::NotANumber {
                row,
                column,
                value: cell.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DataError::NonFiniteValue { row, column });
            }
            values.push(value);
        }
        rows += 1;
    }

    let columns = width.ok_or(DataError::Empty)?;
    Ok(Array2::from_shape_vec((rows, columns), values)?)
}

pub fn read_labels<R: Read>(reader: R, delimiter: u8) -> Result<Array1<f64>, DataError> {
    let matrix = read_matrix(reader, delimiter)?;
    let (rows, columns) = matrix.dim();
    if rows != 1 && columns != 1 {
        return Err(DataError::NotAVector { rows, columns });
    }
    Ok(Array1::from_iter(matrix.iter().copied()))
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}
