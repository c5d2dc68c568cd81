//! Serving forecasts from the artifacts under a model root
//!
//! The service is created once and shared; the first request scans the
//! model root and loads every channel. After that it is read-only and can
//! answer concurrent requests.

use crate::config::{ServiceConfig, ServingWindows};
use crate::data::{daily_range, format_date, FeatureTable};
use crate::error::{ForecastError, Result};
use crate::models::blender::MetaBlender;
use crate::models::recurrent::RecurrentForecaster;
use crate::models::seasonal::SeasonalForecaster;
use crate::models::Forecaster;
use crate::scaler::{MissingParamPolicy, Scaler, ScalerParams};
use crate::store::{ChannelArtifacts, ModelStore};
use crate::window::{feature_matrix, SequenceWindower};
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info, warn};

/// Caller-supplied value of one regressor over the horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegressorOverride {
    /// Same value on every day
    Constant(f64),
    /// One value per day of the horizon
    Series(Vec<f64>),
}

impl RegressorOverride {
    fn expand(&self, name: &str, horizon: usize) -> Result<Vec<f64>> {
        match self {
            RegressorOverride::Constant(v) => Ok(vec![*v; horizon]),
            RegressorOverride::Series(values) if values.len() == horizon => Ok(values.clone()),
            RegressorOverride::Series(values) => Err(ForecastError::InvalidParameter(format!(
                "Regressor '{}' has {} values for a {} day horizon",
                name,
                values.len(),
                horizon
            ))),
        }
    }
}

/// A forecast request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionParams {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Feature-space values; regressors not listed use their training means
    #[serde(default)]
    pub regressors: BTreeMap<String, RegressorOverride>,
}

impl PredictionParams {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            regressors: BTreeMap::new(),
        }
    }

    pub fn with_regressor(mut self, name: impl Into<String>, value: RegressorOverride) -> Self {
        self.regressors.insert(name.into(), value);
        self
    }
}

/// A forecast response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predictions: Vec<f64>,
    /// ISO dates, one per prediction
    pub dates: Vec<String>,
    /// Rendered chart; never produced by this crate
    pub plot: Option<String>,
}

/// One channel's loaded artifacts
#[derive(Debug)]
struct LoadedChannel {
    statistical: SeasonalForecaster,
    sequence: RecurrentForecaster,
    blender: MetaBlender,
    scaler: ScalerParams,
}

impl From<ChannelArtifacts> for LoadedChannel {
    fn from(artifacts: ChannelArtifacts) -> Self {
        Self {
            statistical: artifacts.statistical,
            sequence: artifacts.sequence,
            blender: artifacts.blender,
            scaler: artifacts.scaler,
        }
    }
}

#[derive(Debug, Default)]
struct ChannelRegistry {
    loaded: BTreeMap<String, LoadedChannel>,
    /// Channel name to load error
    failed: BTreeMap<String, String>,
}

/// Answers forecast requests for every channel under a model root
#[derive(Debug)]
pub struct InferenceService {
    config: ServiceConfig,
    scaler: Scaler,
    registry: OnceLock<ChannelRegistry>,
    init_lock: Mutex<()>,
}

impl InferenceService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            scaler: Scaler::new(MissingParamPolicy::Reject),
            registry: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    pub fn with_scaler_policy(mut self, policy: MissingParamPolicy) -> Self {
        self.scaler = Scaler::new(policy);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn registry(&self) -> Result<&ChannelRegistry> {
        if let Some(registry) = self.registry.get() {
            return Ok(registry);
        }
        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| ForecastError::Model("Service initialization lock poisoned".to_string()))?;
        if let Some(registry) = self.registry.get() {
            return Ok(registry);
        }
        let registry = self.load_registry()?;
        Ok(self.registry.get_or_init(|| registry))
    }

    fn load_registry(&self) -> Result<ChannelRegistry> {
        let store = ModelStore::new(&self.config.model_root);
        let mut registry = ChannelRegistry::default();
        for channel in store.channels()? {
            match store.load_current(&channel) {
                Ok(artifacts) => {
                    info!(channel = %channel, "Loaded models");
                    registry.loaded.insert(channel, artifacts.into());
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Failed to load models");
                    registry.failed.insert(channel, e.to_string());
                }
            }
        }
        info!(
            root = %self.config.model_root.display(),
            loaded = registry.loaded.len(),
            failed = registry.failed.len(),
            "Model registry initialized"
        );
        Ok(registry)
    }

    /// Channels with a complete artifact set.
    pub fn channels(&self) -> Result<Vec<String>> {
        Ok(self.registry()?.loaded.keys().cloned().collect())
    }

    /// Channels found on disk whose artifacts could not be loaded.
    pub fn failed_channels(&self) -> Result<Vec<String>> {
        Ok(self.registry()?.failed.keys().cloned().collect())
    }

    /// Forecast `channel` over the requested dates.
    pub fn predict(&self, channel: &str, params: &PredictionParams) -> Result<PredictionResult> {
        let registry = self.registry()?;
        let models = match registry.loaded.get(channel) {
            Some(models) => models,
            None => {
                return Err(match registry.failed.get(channel) {
                    Some(reason) => ForecastError::ArtifactNotFound(format!("{}: {}", channel, reason)),
                    None => ForecastError::UnknownChannel(channel.to_string()),
                })
            }
        };

        if params.end_date < params.start_date {
            return Err(ForecastError::InvalidParameter(format!(
                "end_date {} is before start_date {}",
                params.end_date, params.start_date
            )));
        }
        let dates = daily_range(params.start_date, params.end_date);
        let horizon = dates.len();
        info!(channel = %channel, horizon, "Predicting");

        let skeleton = build_skeleton(models, &dates, &params.regressors)?;
        let statistical = models.statistical.predict(&skeleton)?.yhat;

        let (length, _) = models.sequence.input_shape();
        if horizon < length {
            debug!(channel = %channel, horizon, length, "Horizon shorter than sequence, statistical only");
            return Ok(PredictionResult {
                predictions: statistical,
                dates: dates.iter().map(format_date).collect(),
                plot: None,
            });
        }

        let features = self.serving_features(models, &skeleton, &statistical)?;
        let windows = SequenceWindower::new(length)?.rolling(&features);
        let sequence = models.sequence.predict_windows(&windows)?;
        let predictions = models.blender.blend(&statistical[length - 1..], &sequence)?;

        let offset = horizon - predictions.len();
        Ok(PredictionResult {
            predictions,
            dates: dates[offset..].iter().map(format_date).collect(),
            plot: None,
        })
    }

    /// Rows the serving windows are cut from.
    fn serving_features(
        &self,
        models: &LoadedChannel,
        skeleton: &FeatureTable,
        statistical: &[f64],
    ) -> Result<Array2<f64>> {
        let (_, n_features) = models.sequence.input_shape();
        match self.config.serving_windows {
            ServingWindows::FeatureRows => {
                let columns: Vec<String> =
                    models.scaler.columns().into_iter().map(String::from).collect();
                if columns.len() != n_features {
                    return Err(ForecastError::ConfigurationMismatch(format!(
                        "Sequence model expects {} features, scaler has {}",
                        n_features,
                        columns.len()
                    )));
                }
                let scaled = self.scaler.apply(skeleton, &models.scaler)?;
                feature_matrix(&scaled, &columns)
            }
            ServingWindows::StatisticalFeedback => {
                if n_features != 1 {
                    return Err(ForecastError::ConfigurationMismatch(format!(
                        "Statistical feedback windows need a single-feature sequence model, got {}",
                        n_features
                    )));
                }
                Array2::from_shape_vec((statistical.len(), 1), statistical.to_vec())
                    .map_err(|e| ForecastError::Model(e.to_string()))
            }
        }
    }
}

/// Date skeleton with every regressor the channel's models read.
fn build_skeleton(
    models: &LoadedChannel,
    dates: &[NaiveDate],
    overrides: &BTreeMap<String, RegressorOverride>,
) -> Result<FeatureTable> {
    let mut names: BTreeSet<String> = models.statistical.regressor_names().into_iter().collect();
    names.extend(models.scaler.columns().into_iter().map(String::from));

    if let Some(unknown) = overrides.keys().find(|k| !names.contains(*k)) {
        return Err(ForecastError::InvalidParameter(format!(
            "Regressor '{}' is not used by this channel",
            unknown
        )));
    }

    let defaults = models.statistical.regressor_defaults();
    let mut columns = Vec::with_capacity(names.len());
    for name in &names {
        let values = match overrides.get(name) {
            Some(value) => value.expand(name, dates.len())?,
            None => {
                let default = defaults.and_then(|d| d.get(name)).ok_or_else(|| {
                    ForecastError::ConfigurationMismatch(format!(
                        "No value or training default for regressor '{}'",
                        name
                    ))
                })?;
                vec![*default; dates.len()]
            }
        };
        columns.push((name.as_str(), values));
    }
    FeatureTable::from_columns(dates, columns)
}
