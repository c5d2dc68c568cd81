//! Iterative per-channel training with checkpoints
//!
//! Each iteration samples a batch of days, fits both base forecasters and
//! the blender on a temporal split, scores them, writes a checkpoint and
//! promotes it to the channel's current artifact set. A continuous run picks
//! up after the last completed iteration recorded on disk.

use crate::config::{SequenceInputs, TrainerConfig};
use crate::data::{get_channels, FeatureEngineer, FeatureTable, TARGET_COLUMN};
use crate::error::{ForecastError, Result};
use crate::models::blender::MetaBlender;
use crate::models::recurrent::{FitOptions, NetworkConfig, RecurrentForecaster};
use crate::models::seasonal::{SeasonalConfig, SeasonalForecaster};
use crate::models::Forecaster;
use crate::scaler::{MissingParamPolicy, Scaler, ScalerParams};
use crate::store::{ChannelArtifacts, IterationMetrics, ModelStore, TrainingState};
use crate::window::SequenceWindower;
use chrono::Utc;
use forecast_math::{align_most_recent, RegressionMetrics};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{error, info, warn};

/// Where the trainer is in its run for the current channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerPhase {
    Uninitialized,
    Iterating(usize),
    Checkpointed(usize),
    Complete,
}

impl fmt::Display for TrainerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainerPhase::Uninitialized => write!(f, "uninitialized"),
            TrainerPhase::Iterating(i) => write!(f, "iterating({})", i),
            TrainerPhase::Checkpointed(i) => write!(f, "checkpointed({})", i),
            TrainerPhase::Complete => write!(f, "complete"),
        }
    }
}

/// A channel that could not be trained
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelFailure {
    pub channel: String,
    pub error: String,
}

/// Outcome of a multi-channel run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<ChannelFailure>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Everything one iteration produces
struct IterationOutput {
    statistical: SeasonalForecaster,
    blender: MetaBlender,
    metrics: IterationMetrics,
}

/// Drives continuous training for one channel at a time
#[derive(Debug)]
pub struct ContinuousTrainer {
    config: TrainerConfig,
    store: ModelStore,
    engineer: FeatureEngineer,
    scaler: Scaler,
    seasonal: SeasonalConfig,
    network: NetworkConfig,
    phase: TrainerPhase,
}

impl ContinuousTrainer {
    pub fn new(config: TrainerConfig, store: ModelStore) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            engineer: FeatureEngineer::new(),
            scaler: Scaler::new(MissingParamPolicy::Reject),
            seasonal: SeasonalConfig::default(),
            network: NetworkConfig::default(),
            phase: TrainerPhase::Uninitialized,
        })
    }

    /// Replace the network hyperparameters used for fresh sequence models.
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn with_seasonal(mut self, seasonal: SeasonalConfig) -> Self {
        self.seasonal = seasonal;
        self
    }

    pub fn with_engineer(mut self, engineer: FeatureEngineer) -> Self {
        self.engineer = engineer;
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn phase(&self) -> TrainerPhase {
        self.phase
    }

    fn transition(&mut self, channel: &str, phase: TrainerPhase) {
        info!(channel = %channel, from = %self.phase, to = %phase, "Trainer phase change");
        self.phase = phase;
    }

    /// Train every channel found in `data_source`.
    pub fn train_all<P: AsRef<Path>>(&mut self, data_source: P) -> Result<BatchReport> {
        let channels = get_channels(&data_source)?;
        Ok(self.train_channels(data_source, &channels))
    }

    /// Train `channels` one after another; failures are logged and collected.
    pub fn train_channels<P: AsRef<Path>>(&mut self, data_source: P, channels: &[String]) -> BatchReport {
        let mut report = BatchReport::default();
        for channel in channels {
            match self.train_channel(data_source.as_ref(), channel) {
                Ok(state) => {
                    info!(
                        channel = %channel,
                        last_iteration = state.last_iteration,
                        "Channel training finished"
                    );
                    report.succeeded.push(channel.clone());
                }
                Err(e) => {
                    error!(channel = %channel, error = %e, "Channel training failed");
                    report.failed.push(ChannelFailure {
                        channel: channel.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Batch training finished"
        );
        report
    }

    /// Load, aggregate and train a single channel.
    pub fn train_channel<P: AsRef<Path>>(&mut self, data_source: P, channel: &str) -> Result<TrainingState> {
        let table = self.engineer.prepare(data_source, Some(channel))?;
        self.train_table(channel, &table)
    }

    /// Run the remaining iterations for `channel` on an engineered table.
    pub fn train_table(&mut self, channel: &str, table: &FeatureTable) -> Result<TrainingState> {
        self.phase = TrainerPhase::Uninitialized;
        let length = self.config.sequence_length;
        // same order as the stored scaler parameters
        let mut columns = table.feature_columns();
        columns.sort();
        if columns.is_empty() {
            return Err(ForecastError::DataValidation(
                "Feature table has no feature columns".to_string(),
            ));
        }
        let inputs = match self.config.sequence_inputs {
            SequenceInputs::Features => columns.clone(),
            SequenceInputs::Target => vec![TARGET_COLUMN.to_string()],
        };

        let (mut state, previous) = self.resume_point(channel)?;
        let start = state.completed();
        if start >= self.config.num_iterations {
            info!(
                channel = %channel,
                completed = start,
                target = self.config.num_iterations,
                "Nothing left to train"
            );
            self.transition(channel, TrainerPhase::Complete);
            return Ok(state);
        }

        let (mut sequence, params) = match previous {
            Some(artifacts) => {
                let shape = artifacts.sequence.input_shape();
                if shape != (length, inputs.len()) {
                    return Err(ForecastError::ConfigurationMismatch(format!(
                        "Stored sequence model expects {:?}, training provides ({}, {})",
                        shape,
                        length,
                        inputs.len()
                    )));
                }
                // stored parameters are reused verbatim on resume
                if artifacts.scaler.columns() != columns {
                    return Err(ForecastError::ConfigurationMismatch(format!(
                        "Stored scaler covers {:?}, training provides {:?}",
                        artifacts.scaler.columns(),
                        columns
                    )));
                }
                (artifacts.sequence, artifacts.scaler)
            }
            None => {
                if !self.config.continuous {
                    self.store.clear_checkpoints(channel)?;
                }
                let (_, params) = self.scaler.fit(table, &columns)?;
                (
                    RecurrentForecaster::new(length, inputs.len(), self.network.clone())?,
                    params,
                )
            }
        };

        info!(
            channel = %channel,
            rows = table.len(),
            from = start,
            to = self.config.num_iterations,
            "Starting training run"
        );

        for iteration in start..self.config.num_iterations {
            self.transition(channel, TrainerPhase::Iterating(iteration));
            let output = self.run_iteration(channel, iteration, table, &inputs, &params, &mut sequence)?;
            info!(
                channel = %channel,
                iteration,
                prophet = %output.metrics.prophet,
                lstm = %output.metrics.lstm,
                ensemble = %output.metrics.ensemble,
                "Iteration scored"
            );
            state.record(output.metrics);

            let artifacts = ChannelArtifacts {
                statistical: output.statistical,
                sequence,
                blender: output.blender,
                scaler: params.clone(),
            };
            self.store.write_checkpoint(channel, iteration, &artifacts, &state)?;
            self.transition(channel, TrainerPhase::Checkpointed(iteration));
            self.store.promote(channel, iteration)?;
            sequence = artifacts.sequence;
        }

        self.transition(channel, TrainerPhase::Complete);
        Ok(state)
    }

    /// Stored state and artifacts to continue from, when allowed.
    fn resume_point(&self, channel: &str) -> Result<(TrainingState, Option<ChannelArtifacts>)> {
        if !self.config.continuous {
            return Ok((TrainingState::default(), None));
        }
        match self.store.load_state(channel)? {
            Some(state) if state.last_iteration >= 0 => {
                let artifacts = self.store.load_current(channel)?;
                info!(
                    channel = %channel,
                    last_iteration = state.last_iteration,
                    "Resuming from stored state"
                );
                Ok((state, Some(artifacts)))
            }
            _ => Ok((TrainingState::default(), None)),
        }
    }

    fn run_iteration(
        &self,
        channel: &str,
        iteration: usize,
        table: &FeatureTable,
        inputs: &[String],
        params: &ScalerParams,
        sequence: &mut RecurrentForecaster,
    ) -> Result<IterationOutput> {
        let length = self.config.sequence_length;
        let seed = self.config.seed.wrapping_add(iteration as u64);

        let batch = sample_batch(table, self.config.batch_size, seed)?;
        let (train, test) = temporal_split(&batch, self.config.test_size);
        if train.len() <= length || test.len() <= length {
            return Err(ForecastError::InsufficientData {
                channel: channel.to_string(),
                rows: batch.len(),
                required: minimum_batch(length, self.config.test_size),
            });
        }

        let mut statistical = SeasonalForecaster::new(self.seasonal.clone());
        statistical.fit(&train)?;
        let stat_test = statistical.predict(&test)?.yhat;

        let windower = SequenceWindower::new(length)?;
        let train_windows = windower.window(&self.scaler.apply(&train, params)?, inputs)?;
        let test_windows = windower.window(&self.scaler.apply(&test, params)?, inputs)?;
        let options = FitOptions {
            epochs: self.config.epochs_per_iteration,
            batch_size: self.config.fit_batch_size,
            validation_split: self.config.validation_split,
            shuffle: true,
            seed,
        };
        let history = sequence.fit_windows(&train_windows, &options)?;
        let seq_test = sequence.predict_windows(&test_windows.inputs)?;

        let actual = test.target()?;
        let (stat_aligned, seq_aligned) = align_most_recent(&stat_test, &seq_test);
        let (_, actual_aligned) = align_most_recent(stat_aligned, &actual);

        let mut blender = MetaBlender::new();
        blender.fit_series(stat_aligned, seq_aligned, actual_aligned)?;
        let ensemble = blender.blend(stat_aligned, seq_aligned)?;

        if history.final_loss().map_or(false, |l| !l.is_finite()) {
            warn!(channel = %channel, iteration, "Sequence model loss is not finite");
        }

        let metrics = IterationMetrics {
            iteration,
            prophet: RegressionMetrics::evaluate(actual_aligned, stat_aligned)?,
            lstm: RegressionMetrics::evaluate(actual_aligned, seq_aligned)?,
            ensemble: RegressionMetrics::evaluate(actual_aligned, &ensemble)?,
            train_rows: train.len(),
            test_rows: test.len(),
            lstm_loss: history.final_loss(),
            timestamp: Utc::now().to_rfc3339(),
        };
        Ok(IterationOutput {
            statistical,
            blender,
            metrics,
        })
    }
}

/// Up to `batch_size` distinct rows, drawn with `seed` and kept in date order.
pub fn sample_batch(table: &FeatureTable, batch_size: usize, seed: u64) -> Result<FeatureTable> {
    let n = table.len();
    let take = batch_size.min(n);
    if take == n {
        return Ok(table.clone());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices = sample(&mut rng, n, take).into_vec();
    // rows are stored in date order
    indices.sort_unstable();
    table.select_rows(&indices)
}

/// Leading rows for training, the trailing `test_size` fraction for testing.
pub fn temporal_split(table: &FeatureTable, test_size: f64) -> (FeatureTable, FeatureTable) {
    let n = table.len();
    let test_len = ((n as f64) * test_size).ceil() as usize;
    let train_len = n.saturating_sub(test_len);
    (table.slice(0, train_len), table.slice(train_len, n - train_len))
}

/// Smallest batch whose split leaves more than `length` rows on both sides.
fn minimum_batch(length: usize, test_size: f64) -> usize {
    let mut rows = 2 * (length + 1);
    loop {
        let test_len = ((rows as f64) * test_size).ceil() as usize;
        if test_len > length && rows - test_len > length {
            return rows;
        }
        rows += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn table(rows: usize) -> FeatureTable {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates: Vec<NaiveDate> = (0..rows).map(|i| start + Duration::days(i as i64)).collect();
        FeatureTable::from_columns(
            &dates,
            vec![
                ("y", (0..rows).map(|i| i as f64).collect()),
                ("clicks", (0..rows).map(|i| (i % 7) as f64).collect()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_sample_batch_keeps_date_order() {
        let full = table(50);
        let batch = sample_batch(&full, 20, 7).unwrap();
        assert_eq!(batch.len(), 20);
        let dates = batch.dates().unwrap();
        assert!(dates.windows(2).all(|w| w[0] < w[1]));

        let again = sample_batch(&full, 20, 7).unwrap();
        assert_eq!(again.dates().unwrap(), dates);
    }

    #[test]
    fn test_sample_batch_clamps_to_table() {
        let full = table(10);
        assert_eq!(sample_batch(&full, 1000, 1).unwrap().len(), 10);
    }

    #[test]
    fn test_temporal_split() {
        let (train, test) = temporal_split(&table(10), 0.2);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert_eq!(test.target().unwrap(), vec![8.0, 9.0]);
    }

    #[test]
    fn test_minimum_batch() {
        // 26 rows split 20 / 6
        let rows = minimum_batch(5, 0.2);
        assert_eq!(rows, 26);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TrainerPhase::Iterating(3).to_string(), "iterating(3)");
        assert_eq!(TrainerPhase::Complete.to_string(), "complete");
    }
}
