//! # Channel Forecast
//!
//! Per-channel engagement forecasting with a hybrid ensemble.
//!
//! ## Features
//!
//! - Raw event ingestion, daily aggregation and feature engineering (polars)
//! - Min-max scaling with persisted parameters
//! - Seasonal regression forecaster with trend changepoints, Fourier
//!   seasonality, holidays and extra regressors
//! - LSTM sequence forecaster trained with backpropagation through time and Adam
//! - Linear meta blender stacking the two base forecasts
//! - Continuous, checkpointed training per channel
//! - A read-only inference service over a model root
//!
//! ## Quick Start
//!
//! ```no_run
//! use channel_forecast::config::{ServiceConfig, TrainerConfig};
//! use channel_forecast::service::{InferenceService, PredictionParams};
//! use channel_forecast::store::ModelStore;
//! use channel_forecast::trainer::ContinuousTrainer;
//! use chrono::NaiveDate;
//!
//! # fn main() -> channel_forecast::Result<()> {
//! // Train every channel found in the events file
//! let store = ModelStore::new("ml_models/post_schedule");
//! let mut trainer = ContinuousTrainer::new(TrainerConfig::default(), store)?;
//! let report = trainer.train_all("events.csv")?;
//! println!("trained {:?}, failed {:?}", report.succeeded, report.failed);
//!
//! // Forecast one channel
//! let service = InferenceService::new(ServiceConfig::new("ml_models/post_schedule"));
//! let params = PredictionParams::new(
//!     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
//! );
//! let result = service.predict("Facebook", &params)?;
//! println!("{:?}", result.predictions);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod scaler;
pub mod service;
pub mod store;
pub mod trainer;
pub mod window;

// Re-export commonly used types
pub use crate::data::{get_channels, FeatureEngineer, FeatureTable};
pub use crate::error::{ForecastError, Result};
pub use crate::models::Forecaster;
pub use crate::service::{InferenceService, PredictionParams, PredictionResult};
pub use crate::store::ModelStore;
pub use crate::trainer::{BatchReport, ContinuousTrainer};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
