//! Regression metrics for forecast evaluation

use crate::{MathError, Result};
use serde::{Deserialize, Serialize};

/// Error metrics for one predictor against ground truth
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// Coefficient of determination
    pub r2: f64,
    /// Mean Absolute Percentage Error, in percent
    pub mape: f64,
}

impl RegressionMetrics {
    /// Score `predicted` against `actual`.
    ///
    /// MAPE skips observations whose actual value is zero but still
    /// averages over the full length. R² is 1 for a perfect fit of a
    /// constant series and 0 for any other fit of one.
    pub fn evaluate(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        if actual.len() != predicted.len() || actual.is_empty() {
            return Err(MathError::InvalidInput(format!(
                "Actual ({}) and predicted ({}) must have the same non-zero length",
                actual.len(),
                predicted.len()
            )));
        }

        let n = actual.len() as f64;
        let errors: Vec<f64> = actual
            .iter()
            .zip(predicted.iter())
            .map(|(&a, &p)| a - p)
            .collect();

        let mse = errors.iter().map(|e| e * e).sum::<f64>() / n;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;

        let mean = actual.iter().sum::<f64>() / n;
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
        let ss_res: f64 = errors.iter().map(|e| e * e).sum();
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        let mape = actual
            .iter()
            .zip(errors.iter())
            .filter(|(&a, _)| a != 0.0)
            .map(|(&a, &e)| (e / a).abs())
            .sum::<f64>()
            / n
            * 100.0;

        Ok(Self {
            mse,
            rmse: mse.sqrt(),
            mae,
            r2,
            mape,
        })
    }
}

impl std::fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RMSE: {:.4}, MAE: {:.4}, R²: {:.4}, MAPE: {:.2}%",
            self.rmse, self.mae, self.r2, self.mape
        )
    }
}

/// Truncate two series to their common most recent suffix.
///
/// The longer series is trimmed from the front so both keep their last
/// `min(a.len(), b.len())` observations.
pub fn align_most_recent<'a>(a: &'a [f64], b: &'a [f64]) -> (&'a [f64], &'a [f64]) {
    let len = a.len().min(b.len());
    (&a[a.len() - len..], &b[b.len() - len..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_regression_metrics() {
        let actual = [10.0, 20.0, 30.0, 40.0, 50.0];
        let predicted = [12.0, 18.0, 33.0, 37.0, 52.0];
        let m = RegressionMetrics::evaluate(&actual, &predicted).unwrap();

        assert_approx_eq!(m.mae, 2.4, 1e-9);
        assert_approx_eq!(m.mse, 6.0, 1e-9);
        assert_approx_eq!(m.rmse, 6.0_f64.sqrt(), 1e-9);
        assert_approx_eq!(m.r2, 1.0 - 30.0 / 1000.0, 1e-9);
        assert!(m.mape > 0.0 && m.mape < 15.0);
    }

    #[test]
    fn test_perfect_constant_fit() {
        let m = RegressionMetrics::evaluate(&[3.0, 3.0], &[3.0, 3.0]).unwrap();
        assert_eq!(m.r2, 1.0);
        assert_eq!(m.mse, 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(RegressionMetrics::evaluate(&[1.0], &[1.0, 2.0]).is_err());
        assert!(RegressionMetrics::evaluate(&[], &[]).is_err());
    }

    #[test]
    fn test_align_keeps_most_recent() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [30.0, 40.0, 50.0];
        let (x, y) = align_most_recent(&a, &b);

        assert_eq!(x, &[3.0, 4.0, 5.0]);
        assert_eq!(y, &[30.0, 40.0, 50.0]);

        let (y, x) = align_most_recent(&b, &a);
        assert_eq!(x, &[3.0, 4.0, 5.0]);
        assert_eq!(y, &[30.0, 40.0, 50.0]);
    }
}
