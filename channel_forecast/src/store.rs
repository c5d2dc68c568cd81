//! On-disk layout of per-channel artifacts, training state and checkpoints
//!
//! ```text
//! <root>/<channel>/prophet/{model.json, model.pkl}
//! <root>/<channel>/lstm/{model.bin, config.json}
//! <root>/<channel>/meta_model/{model.bin, config.json}
//! <root>/<channel>/scaler_params.json
//! <root>/<channel>/training_state.json
//! <root>/<channel>/iteration_checkpoints/checkpoint_<i>/...
//! ```
//!
//! A checkpoint is written to a temporary directory and renamed into place.
//! Promotion replaces each artifact of the current set by rename and writes
//! `training_state.json` last, so the recorded `last_iteration` never points
//! at artifacts that were not fully written.

use crate::error::{ForecastError, Result};
use crate::models::blender::MetaBlender;
use crate::models::recurrent::RecurrentForecaster;
use crate::models::seasonal::SeasonalForecaster;
use crate::models::Forecaster;
use crate::scaler::ScalerParams;
use forecast_math::RegressionMetrics;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SCALER_FILE: &str = "scaler_params.json";
pub const STATE_FILE: &str = "training_state.json";
pub const CHECKPOINT_DIR: &str = "iteration_checkpoints";

const CHECKPOINT_PREFIX: &str = "checkpoint_";

/// Scores of one training iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationMetrics {
    pub iteration: usize,
    pub prophet: RegressionMetrics,
    pub lstm: RegressionMetrics,
    pub ensemble: RegressionMetrics,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Final epoch loss of the sequence model
    pub lstm_loss: Option<f64>,
    pub timestamp: String,
}

/// Progress of continuous training for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub metrics: Vec<IterationMetrics>,
    /// `-1` before the first completed iteration
    pub last_iteration: i64,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            metrics: Vec::new(),
            last_iteration: -1,
        }
    }
}

impl TrainingState {
    /// Number of completed iterations.
    pub fn completed(&self) -> usize {
        (self.last_iteration + 1).max(0) as usize
    }

    /// Record a completed iteration.
    pub fn record(&mut self, metrics: IterationMetrics) {
        self.last_iteration = metrics.iteration as i64;
        self.metrics.push(metrics);
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ForecastError::ArtifactNotFound(path.display().to_string()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// The full artifact set of one channel
#[derive(Debug, Clone)]
pub struct ChannelArtifacts {
    pub statistical: SeasonalForecaster,
    pub sequence: RecurrentForecaster,
    pub blender: MetaBlender,
    pub scaler: ScalerParams,
}

impl ChannelArtifacts {
    /// Write every artifact into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        save_model(dir, &self.statistical)?;
        save_model(dir, &self.sequence)?;
        save_model(dir, &self.blender)?;
        self.scaler.save(dir.join(SCALER_FILE))?;
        Ok(())
    }

    /// Read an artifact set written by [`ChannelArtifacts::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(ForecastError::ArtifactNotFound(dir.display().to_string()));
        }
        Ok(Self {
            statistical: load_model(dir)?,
            sequence: load_model(dir)?,
            blender: load_model(dir)?,
            scaler: ScalerParams::load(dir.join(SCALER_FILE))?,
        })
    }
}

/// Saves `model` under `dir/<model.name()>`.
pub fn save_model<M: Forecaster>(dir: &Path, model: &M) -> Result<()> {
    let target = dir.join(model.name());
    fs::create_dir_all(&target)?;
    model.save(&target)
}

pub fn load_model<M: Forecaster>(dir: &Path) -> Result<M> {
    M::load(&dir.join(M::ARTIFACT_DIR))
}

/// Filesystem store rooted at one model directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn channel_dir(&self, channel: &str) -> PathBuf {
        self.root.join(channel)
    }

    pub fn checkpoint_dir(&self, channel: &str, iteration: usize) -> PathBuf {
        self.channel_dir(channel)
            .join(CHECKPOINT_DIR)
            .join(format!("{}{}", CHECKPOINT_PREFIX, iteration))
    }

    /// Channel subdirectories of the root, sorted by name.
    pub fn channels(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut channels = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    channels.push(name.to_string());
                }
            }
        }
        channels.sort();
        Ok(channels)
    }

    /// Training state of a channel, `None` when none was written yet.
    pub fn load_state(&self, channel: &str) -> Result<Option<TrainingState>> {
        let path = self.channel_dir(channel).join(STATE_FILE);
        if path.is_file() {
            TrainingState::load(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// The channel's current artifact set.
    pub fn load_current(&self, channel: &str) -> Result<ChannelArtifacts> {
        ChannelArtifacts::load(&self.channel_dir(channel))
    }

    /// Write checkpoint `iteration` with all artifacts and the state.
    pub fn write_checkpoint(
        &self,
        channel: &str,
        iteration: usize,
        artifacts: &ChannelArtifacts,
        state: &TrainingState,
    ) -> Result<PathBuf> {
        let target = self.checkpoint_dir(channel, iteration);
        let parent = self.channel_dir(channel).join(CHECKPOINT_DIR);
        fs::create_dir_all(&parent)?;

        let staging = parent.join(format!(".{}{}.tmp", CHECKPOINT_PREFIX, iteration));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        artifacts.save(&staging)?;
        state.save(staging.join(STATE_FILE))?;

        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&staging, &target)?;
        debug!(channel = %channel, iteration, path = %target.display(), "Checkpoint written");
        Ok(target)
    }

    /// Checkpoint iterations present on disk, ascending.
    pub fn list_checkpoints(&self, channel: &str) -> Result<Vec<usize>> {
        let parent = self.channel_dir(channel).join(CHECKPOINT_DIR);
        if !parent.is_dir() {
            return Ok(Vec::new());
        }
        let mut iterations = Vec::new();
        for entry in fs::read_dir(parent)? {
            let name = entry?.file_name();
            if let Some(i) = name
                .to_str()
                .and_then(|n| n.strip_prefix(CHECKPOINT_PREFIX))
                .and_then(|n| n.parse::<usize>().ok())
            {
                iterations.push(i);
            }
        }
        iterations.sort_unstable();
        Ok(iterations)
    }

    /// Remove every checkpoint of a channel; returns how many were removed.
    pub fn clear_checkpoints(&self, channel: &str) -> Result<usize> {
        let parent = self.channel_dir(channel).join(CHECKPOINT_DIR);
        if !parent.is_dir() {
            return Ok(0);
        }
        let removed = self.list_checkpoints(channel)?.len();
        fs::remove_dir_all(&parent)?;
        info!(channel = %channel, removed, "Cleared checkpoints");
        Ok(removed)
    }

    pub fn load_checkpoint(&self, channel: &str, iteration: usize) -> Result<(ChannelArtifacts, TrainingState)> {
        let dir = self.checkpoint_dir(channel, iteration);
        let artifacts = ChannelArtifacts::load(&dir)?;
        let state = TrainingState::load(dir.join(STATE_FILE))?;
        Ok((artifacts, state))
    }

    /// Make checkpoint `iteration` the channel's current artifact set.
    pub fn promote(&self, channel: &str, iteration: usize) -> Result<()> {
        let source = self.checkpoint_dir(channel, iteration);
        if !source.is_dir() {
            return Err(ForecastError::ArtifactNotFound(source.display().to_string()));
        }
        let current = self.channel_dir(channel);
        fs::create_dir_all(&current)?;

        for name in [
            SeasonalForecaster::ARTIFACT_DIR,
            RecurrentForecaster::ARTIFACT_DIR,
            MetaBlender::ARTIFACT_DIR,
        ] {
            replace_dir(&source.join(name), &current.join(name))?;
        }
        replace_file(&source.join(SCALER_FILE), &current.join(SCALER_FILE))?;
        replace_file(&source.join(STATE_FILE), &current.join(STATE_FILE))?;

        info!(channel = %channel, iteration, "Promoted checkpoint to current");
        Ok(())
    }
}

fn replace_file(source: &Path, target: &Path) -> Result<()> {
    let staging = staging_path(target);
    fs::copy(source, &staging)?;
    fs::rename(&staging, target)?;
    Ok(())
}

fn replace_dir(source: &Path, target: &Path) -> Result<()> {
    let staging = staging_path(target);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    copy_dir(source, &staging)?;

    let retired = target.with_extension("old");
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    if target.exists() {
        fs::rename(target, &retired)?;
    }
    fs::rename(&staging, target)?;
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    Ok(())
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    target.with_file_name(format!(".{}.tmp", name))
}

fn copy_dir(source: &Path, target: &Path) -> Result<()> {
    if !source.is_dir() {
        return Err(ForecastError::ArtifactNotFound(source.display().to_string()));
    }
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let destination = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &destination)?;
        } else {
            fs::copy(entry.path(), destination)?;
        }
    }
    Ok(())
}
