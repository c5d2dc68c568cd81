//! Linear stacking of the two base forecasters

use super::{artifact_timestamp, require_file, Forecaster};
use crate::error::{ForecastError, Result};
use forecast_math::align_most_recent;
use forecast_math::linalg::solve_spd;
use ndarray::{array, Array1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Binary coefficients file
pub const WEIGHTS_FILE: &str = "model.bin";
/// Coefficients as JSON
pub const CONFIG_FILE: &str = "config.json";

// Keeps the 2x2 system solvable when both bases are identical.
const RIDGE: f64 = 1e-10;

/// Paired base predictions
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasePredictions {
    pub statistical: Vec<f64>,
    pub sequence: Vec<f64>,
}

impl BasePredictions {
    pub fn new(statistical: Vec<f64>, sequence: Vec<f64>) -> Self {
        Self {
            statistical,
            sequence,
        }
    }

    /// Keep the most recent `min(len)` entries of both series.
    pub fn aligned(&self) -> (Vec<f64>, Vec<f64>) {
        let (stat, seq) = align_most_recent(&self.statistical, &self.sequence);
        (stat.to_vec(), seq.to_vec())
    }
}

/// Base predictions with the observed values they should reproduce
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlendTraining {
    pub base: BasePredictions,
    pub actual: Vec<f64>,
}

/// Contents of `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlenderDescription {
    pub coefficients: [f64; 2],
    pub intercept: f64,
    pub timestamp: String,
}

/// `final = intercept + a * statistical + b * sequence`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetaBlender {
    coefficients: [f64; 2],
    intercept: f64,
    fitted: bool,
}

impl MetaBlender {
    pub fn new() -> Self {
        Self::default()
    }

    /// `[statistical, sequence]` weights
    pub fn coefficients(&self) -> [f64; 2] {
        self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Ordinary least squares with intercept on the aligned series.
    ///
    /// All three series are cut to the most recent common length first.
    pub fn fit_series(&mut self, statistical: &[f64], sequence: &[f64], actual: &[f64]) -> Result<()> {
        let (stat, seq) = align_most_recent(statistical, sequence);
        let (stat, actual) = align_most_recent(stat, actual);
        let (seq, _) = align_most_recent(seq, actual);
        let n = actual.len();
        if n < 2 {
            return Err(ForecastError::DataValidation(format!(
                "Blender needs at least 2 aligned observations, got {}",
                n
            )));
        }

        let mean = |v: &[f64]| v.iter().sum::<f64>() / n as f64;
        let (ms, mq, my) = (mean(stat), mean(seq), mean(actual));

        let mut sss = 0.0;
        let mut ssq = 0.0;
        let mut sqq = 0.0;
        let mut sy_s = 0.0;
        let mut sy_q = 0.0;
        for k in 0..n {
            let (ds, dq, dy) = (stat[k] - ms, seq[k] - mq, actual[k] - my);
            sss += ds * ds;
            ssq += ds * dq;
            sqq += dq * dq;
            sy_s += ds * dy;
            sy_q += dq * dy;
        }

        let scale = sss.max(sqq).max(1.0);
        let gram = array![[sss + RIDGE * scale, ssq], [ssq, sqq + RIDGE * scale]];
        let rhs = Array1::from(vec![sy_s, sy_q]);
        let beta = solve_spd(&gram, &rhs)?;

        self.coefficients = [beta[0], beta[1]];
        self.intercept = my - beta[0] * ms - beta[1] * mq;
        self.fitted = true;
        info!(
            rows = n,
            statistical = beta[0],
            sequence = beta[1],
            intercept = self.intercept,
            "Fitted meta blender"
        );
        Ok(())
    }

    /// Blend aligned base predictions.
    pub fn blend(&self, statistical: &[f64], sequence: &[f64]) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(ForecastError::Model("Meta blender has not been fitted".to_string()));
        }
        let (stat, seq) = align_most_recent(statistical, sequence);
        Ok(stat
            .iter()
            .zip(seq.iter())
            .map(|(s, q)| self.intercept + self.coefficients[0] * s + self.coefficients[1] * q)
            .collect())
    }
}

impl Forecaster for MetaBlender {
    type TrainInput = BlendTraining;
    type PredictInput = BasePredictions;
    type Prediction = Vec<f64>;
    type FitReport = ();

    const ARTIFACT_DIR: &'static str = "meta_model";

    fn fit(&mut self, data: &BlendTraining) -> Result<()> {
        self.fit_series(&data.base.statistical, &data.base.sequence, &data.actual)
    }

    fn predict(&self, data: &BasePredictions) -> Result<Vec<f64>> {
        self.blend(&data.statistical, &data.sequence)
    }

    fn save(&self, dir: &Path) -> Result<()> {
        if !self.fitted {
            return Err(ForecastError::Model("Meta blender has not been fitted".to_string()));
        }
        fs::write(dir.join(WEIGHTS_FILE), bincode::serialize(self)?)?;
        let description = BlenderDescription {
            coefficients: self.coefficients,
            intercept: self.intercept,
            timestamp: artifact_timestamp(),
        };
        fs::write(
            dir.join(CONFIG_FILE),
            serde_json::to_string_pretty(&description)?,
        )?;
        Ok(())
    }

    fn load(dir: &Path) -> Result<Self> {
        let weights_path = dir.join(WEIGHTS_FILE);
        require_file(&weights_path)?;
        require_file(&dir.join(CONFIG_FILE))?;
        Ok(bincode::deserialize(&fs::read(&weights_path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_recovers_exact_combination() {
        let stat = [1.0, 2.0, 3.0, 5.0, 8.0];
        let seq = [2.0, 1.0, 4.0, 3.0, 6.0];
        let actual: Vec<f64> = stat
            .iter()
            .zip(seq.iter())
            .map(|(s, q)| 0.5 + 0.3 * s + 0.6 * q)
            .collect();

        let mut blender = MetaBlender::new();
        blender.fit_series(&stat, &seq, &actual).unwrap();
        let [a, b] = blender.coefficients();
        assert_approx_eq!(a, 0.3, 1e-6);
        assert_approx_eq!(b, 0.6, 1e-6);
        assert_approx_eq!(blender.intercept(), 0.5, 1e-6);
    }

    #[test]
    fn test_unfitted_blend_fails() {
        assert!(MetaBlender::new().blend(&[1.0], &[1.0]).is_err());
    }
}
