//! Runtime configuration for training and serving
//!
//! Defaults match the production settings of the pipeline; every field can
//! be overridden from the environment with `from_env`, and the binaries
//! layer their command line flags on top of that.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Default directory holding one subdirectory per channel.
pub const DEFAULT_MODEL_ROOT: &str = "ml_models/post_schedule";

/// Minimum aggregated daily rows required for a single channel.
pub const MIN_CHANNEL_ROWS: usize = 30;

/// Settings for [`crate::trainer::ContinuousTrainer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Rows sampled (without replacement) per iteration (FORECAST_BATCH_SIZE)
    pub batch_size: usize,
    /// Total iterations a channel should reach (FORECAST_ITERATIONS)
    pub num_iterations: usize,
    /// Window length fed to the sequence model (FORECAST_SEQUENCE_LENGTH)
    pub sequence_length: usize,
    /// Sequence-model epochs per iteration (FORECAST_EPOCHS)
    pub epochs_per_iteration: usize,
    /// Mini-batch size inside a sequence-model epoch
    pub fit_batch_size: usize,
    /// Fraction of each sampled batch held out for evaluation
    pub test_size: f64,
    /// Fraction of the training windows used for validation loss
    pub validation_split: f64,
    /// Resume from the last completed iteration when state exists (FORECAST_CONTINUOUS)
    pub continuous: bool,
    /// Seed for sampling, weight initialization and dropout (FORECAST_SEED)
    pub seed: u64,
    /// Columns the sequence model reads (FORECAST_SEQUENCE_INPUTS)
    #[serde(default)]
    pub sequence_inputs: SequenceInputs,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            num_iterations: 10,
            sequence_length: 30,
            epochs_per_iteration: 5,
            fit_batch_size: 32,
            test_size: 0.2,
            validation_split: 0.0,
            continuous: true,
            seed: 42,
            sequence_inputs: SequenceInputs::default(),
        }
    }
}

impl TrainerConfig {
    /// Overlay environment variables on the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            batch_size: env_or("FORECAST_BATCH_SIZE", defaults.batch_size)?,
            num_iterations: env_or("FORECAST_ITERATIONS", defaults.num_iterations)?,
            sequence_length: env_or("FORECAST_SEQUENCE_LENGTH", defaults.sequence_length)?,
            epochs_per_iteration: env_or("FORECAST_EPOCHS", defaults.epochs_per_iteration)?,
            continuous: env_or("FORECAST_CONTINUOUS", defaults.continuous)?,
            seed: env_or("FORECAST_SEED", defaults.seed)?,
            sequence_inputs: env_or("FORECAST_SEQUENCE_INPUTS", defaults.sequence_inputs)?,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings describe a runnable training loop.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ForecastError::InvalidParameter(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.sequence_length == 0 {
            return Err(ForecastError::InvalidParameter(
                "sequence_length must be positive".to_string(),
            ));
        }
        if self.fit_batch_size == 0 {
            return Err(ForecastError::InvalidParameter(
                "fit_batch_size must be positive".to_string(),
            ));
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(ForecastError::InvalidParameter(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        Ok(())
    }
}

/// Input columns of the sequence model built by the trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceInputs {
    /// Every scaled regressor column
    #[default]
    Features,
    /// The unscaled target history alone; served with
    /// [`ServingWindows::StatisticalFeedback`]
    Target,
}

impl FromStr for SequenceInputs {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "features" => Ok(SequenceInputs::Features),
            "target" => Ok(SequenceInputs::Target),
            other => Err(ForecastError::InvalidParameter(format!(
                "Unknown sequence input mode: {}",
                other
            ))),
        }
    }
}

/// How the inference service fills sequence-model windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingWindows {
    /// Windows over the scaled future feature rows, matching training
    #[default]
    FeatureRows,
    /// Windows over the statistical model's own predictions. Needs a
    /// single-feature model, as trained with [`SequenceInputs::Target`]
    StatisticalFeedback,
}

impl FromStr for ServingWindows {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "feature_rows" | "features" => Ok(ServingWindows::FeatureRows),
            "statistical_feedback" | "feedback" => Ok(ServingWindows::StatisticalFeedback),
            other => Err(ForecastError::InvalidParameter(format!(
                "Unknown serving window mode: {}",
                other
            ))),
        }
    }
}

/// Settings for [`crate::service::InferenceService`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory scanned for channel subdirectories (FORECAST_MODEL_ROOT)
    pub model_root: PathBuf,
    /// Window construction at serve time (FORECAST_SERVING_WINDOWS)
    pub serving_windows: ServingWindows,
    /// Tracing filter directive (FORECAST_LOG_LEVEL)
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_root: PathBuf::from(DEFAULT_MODEL_ROOT),
            serving_windows: ServingWindows::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Service configuration rooted at `model_root`.
    pub fn new(model_root: impl Into<PathBuf>) -> Self {
        Self {
            model_root: model_root.into(),
            ..Self::default()
        }
    }

    /// Overlay environment variables on the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            model_root: std::env::var("FORECAST_MODEL_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_root),
            serving_windows: env_or("FORECAST_SERVING_WINDOWS", defaults.serving_windows)?,
            log_level: std::env::var("FORECAST_LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

/// Install the global tracing subscriber.
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            ForecastError::InvalidParameter(format!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrainerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_test_size() {
        let config = TrainerConfig {
            test_size: 1.0,
            ..TrainerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serving_windows_parse() {
        assert_eq!(
            "feedback".parse::<ServingWindows>().unwrap(),
            ServingWindows::StatisticalFeedback
        );
        assert!("sideways".parse::<ServingWindows>().is_err());
    }

    #[test]
    fn test_sequence_inputs_parse() {
        assert_eq!("Target".parse::<SequenceInputs>().unwrap(), SequenceInputs::Target);
        assert_eq!(TrainerConfig::default().sequence_inputs, SequenceInputs::Features);
        assert!("both".parse::<SequenceInputs>().is_err());
    }
}
