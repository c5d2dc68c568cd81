//! # Channel Forecast Workspace
//!
//! Umbrella crate re-exporting the workspace members.
//!
//! - [`channel_forecast`]: ingestion, models, training and serving
//! - [`forecast_math`]: least squares, Fourier terms and regression metrics
//!
//! ## Example
//!
//! ```
//! use channel_forecast_workspace::forecast_math::RegressionMetrics;
//!
//! let metrics = RegressionMetrics::evaluate(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
//! assert_eq!(metrics.rmse, 0.0);
//! assert_eq!(metrics.r2, 1.0);
//! ```

pub use channel_forecast;
pub use forecast_math;

pub use channel_forecast::{
    ContinuousTrainer, ForecastError, InferenceService, ModelStore, PredictionParams,
    PredictionResult,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexported_versions() {
        assert_eq!(channel_forecast::NAME, "channel_forecast");
        assert!(!channel_forecast::VERSION.is_empty());
    }

    #[test]
    fn test_error_is_reexported() {
        let err = ForecastError::UnknownChannel("Myspace".to_string());
        assert!(err.is_data_validation());
    }
}
