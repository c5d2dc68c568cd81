//! Forecasting models of the hybrid ensemble
//!
//! The ensemble has two heterogeneous base forecasters, a seasonal
//! regression model and a recurrent network, whose outputs are reconciled
//! by a linear blender. All three share the [`Forecaster`] capability so the
//! trainer and the model store can treat them uniformly.

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::path::Path;

pub mod blender;
pub mod holidays;
pub mod recurrent;
pub mod seasonal;

/// Fit, predict and persist capability shared by every artifact
pub trait Forecaster: Debug + Sized {
    /// Data the model is fitted on
    type TrainInput: ?Sized;
    /// Data a prediction is computed from
    type PredictInput: ?Sized;
    /// Prediction output
    type Prediction;
    /// Summary returned by a fit
    type FitReport;

    /// Directory the artifact files are written to
    const ARTIFACT_DIR: &'static str;

    fn name(&self) -> &'static str {
        Self::ARTIFACT_DIR
    }

    /// Fit on `data`; refitting continues from the current state where the
    /// model supports it.
    fn fit(&mut self, data: &Self::TrainInput) -> Result<Self::FitReport>;

    fn predict(&self, data: &Self::PredictInput) -> Result<Self::Prediction>;

    /// Write all artifact files into `dir`, which must exist.
    fn save(&self, dir: &Path) -> Result<()>;

    /// Read the artifact files written by [`Forecaster::save`].
    fn load(dir: &Path) -> Result<Self>;
}

/// Timestamp recorded in artifact config files
pub(crate) fn artifact_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.to_rfc3339()
}

/// Fail with `ArtifactNotFound` unless `path` exists.
pub(crate) fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(crate::error::ForecastError::ArtifactNotFound(
            path.display().to_string(),
        ))
    }
}
