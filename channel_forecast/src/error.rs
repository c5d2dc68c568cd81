//! Error types for the channel_forecast crate

use polars::prelude::PolarsError;
use thiserror::Error;

/// Custom error types for the channel_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Input data failed validation (missing columns, empty input, missing dates)
    #[error("Data validation error: {0}")]
    DataValidation(String),

    /// A channel has too little aggregated history to model
    #[error("Insufficient data for channel '{channel}': {rows} rows (minimum {required} required)")]
    InsufficientData {
        channel: String,
        rows: usize,
        required: usize,
    },

    /// A channel is not present in the data or the model root
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// A persisted artifact is missing at load time
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Inputs do not match the configuration an artifact was trained with
    #[error("Configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error raised while fitting or evaluating a model
    #[error("Model error: {0}")]
    Model(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    Polars(String),

    /// Error from JSON encoding or decoding
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from binary artifact encoding or decoding
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ForecastError {
    /// Whether this error belongs to the data-validation class.
    pub fn is_data_validation(&self) -> bool {
        matches!(
            self,
            ForecastError::DataValidation(_)
                | ForecastError::InsufficientData { .. }
                | ForecastError::UnknownChannel(_)
        )
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::Polars(err.to_string())
    }
}

impl From<bincode::Error> for ForecastError {
    fn from(err: bincode::Error) -> Self {
        ForecastError::Serialization(err.to_string())
    }
}

impl From<forecast_math::MathError> for ForecastError {
    fn from(err: forecast_math::MathError) -> Self {
        ForecastError::Model(err.to_string())
    }
}

impl From<csv::Error> for ForecastError {
    fn from(err: csv::Error) -> Self {
        ForecastError::Serialization(err.to_string())
    }
}
