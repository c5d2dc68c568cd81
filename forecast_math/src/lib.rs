//! # Forecast Math
//!
//! Numeric kernels shared by the forecasting pipeline.
//! This crate provides dense regularized least squares, Fourier seasonal
//! terms and the regression error metrics used to score forecasters.

use thiserror::Error;

pub mod fourier;
pub mod linalg;
pub mod metrics;

pub use metrics::{align_most_recent, RegressionMetrics};

/// Errors that can occur in numeric calculations
#[derive(Error, Debug)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for numeric operations
pub type Result<T> = std::result::Result<T, MathError>;
