//! Fixed-length input windows for the sequence model

use crate::data::FeatureTable;
use crate::error::{ForecastError, Result};
use ndarray::{Array1, Array2, Array3};

/// Windows of `length` rows paired with the target of the following row
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceWindows {
    /// Shape `[windows, length, features]`
    pub inputs: Array3<f64>,
    /// Shape `[windows]`
    pub targets: Array1<f64>,
}

impl SequenceWindows {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn sequence_length(&self) -> usize {
        self.inputs.dim().1
    }

    pub fn n_features(&self) -> usize {
        self.inputs.dim().2
    }
}

/// Cuts a feature table into overlapping windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceWindower {
    length: usize,
}

impl SequenceWindower {
    pub fn new(length: usize) -> Result<Self> {
        if length == 0 {
            return Err(ForecastError::InvalidParameter(
                "Window length must be positive".to_string(),
            ));
        }
        Ok(Self { length })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Training windows: window `i` covers rows `[i, i + length)` and its
    /// target is `y[i + length]`.
    ///
    /// A table with `length` rows or fewer yields zero windows.
    pub fn window(&self, table: &FeatureTable, feature_columns: &[String]) -> Result<SequenceWindows> {
        let features = feature_matrix(table, feature_columns)?;
        let target = table.target()?;
        let n = features.nrows();
        let count = n.saturating_sub(self.length);

        let mut inputs = Array3::<f64>::zeros((count, self.length, feature_columns.len()));
        let mut targets = Array1::<f64>::zeros(count);
        for i in 0..count {
            for step in 0..self.length {
                for f in 0..feature_columns.len() {
                    inputs[[i, step, f]] = features[[i + step, f]];
                }
            }
            targets[i] = target[i + self.length];
        }

        Ok(SequenceWindows { inputs, targets })
    }

    /// Serving windows: every run of `length` consecutive rows, so a table
    /// of `n` rows yields `n - length + 1` windows and no targets.
    pub fn rolling(&self, features: &Array2<f64>) -> Array3<f64> {
        let (n, width) = features.dim();
        let count = if n >= self.length { n - self.length + 1 } else { 0 };

        let mut inputs = Array3::<f64>::zeros((count, self.length, width));
        for i in 0..count {
            for step in 0..self.length {
                for f in 0..width {
                    inputs[[i, step, f]] = features[[i + step, f]];
                }
            }
        }
        inputs
    }
}

/// Stack the named columns into a `[rows, columns]` matrix.
pub fn feature_matrix(table: &FeatureTable, feature_columns: &[String]) -> Result<Array2<f64>> {
    let missing: Vec<&str> = feature_columns
        .iter()
        .filter(|name| !table.has_column(name))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(ForecastError::DataValidation(format!(
            "Missing feature columns: {}",
            missing.join(", ")
        )));
    }

    let mut matrix = Array2::<f64>::zeros((table.len(), feature_columns.len()));
    for (f, name) in feature_columns.iter().enumerate() {
        for (row, value) in table.column(name)?.into_iter().enumerate() {
            matrix[[row, f]] = value;
        }
    }
    Ok(matrix)
}
