//! Fourier seasonal terms

use crate::{MathError, Result};
use ndarray::Array2;
use std::f64::consts::PI;

/// Build the Fourier basis for one seasonal component.
///
/// Returns a matrix with `2 * order` columns laid out as
/// `[sin(2πkt/P), cos(2πkt/P)]` for `k = 1..=order`, where `t` is measured
/// in days.
pub fn fourier_terms(t_days: &[f64], period: f64, order: usize) -> Result<Array2<f64>> {
    if period <= 0.0 || !period.is_finite() {
        return Err(MathError::InvalidInput(format!(
            "Seasonal period must be positive, got {}",
            period
        )));
    }
    if order == 0 {
        return Err(MathError::InvalidInput(
            "Fourier order must be at least 1".to_string(),
        ));
    }

    let mut terms = Array2::<f64>::zeros((t_days.len(), 2 * order));
    for (row, &t) in t_days.iter().enumerate() {
        for k in 1..=order {
            let angle = 2.0 * PI * k as f64 * t / period;
            terms[[row, 2 * (k - 1)]] = angle.sin();
            terms[[row, 2 * (k - 1) + 1]] = angle.cos();
        }
    }

    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_shape_and_values() {
        let t = [0.0, 1.75, 3.5];
        let terms = fourier_terms(&t, 7.0, 2).unwrap();

        assert_eq!(terms.dim(), (3, 4));
        assert_approx_eq!(terms[[0, 0]], 0.0);
        assert_approx_eq!(terms[[0, 1]], 1.0);
        // quarter period
        assert_approx_eq!(terms[[1, 0]], 1.0, 1e-12);
        // half period, second harmonic completes a cycle
        assert_approx_eq!(terms[[2, 3]], 1.0, 1e-12);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(fourier_terms(&[0.0], 0.0, 3).is_err());
        assert!(fourier_terms(&[0.0], 7.0, 0).is_err());
    }
}
