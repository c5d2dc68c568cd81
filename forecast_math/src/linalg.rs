//! Dense least squares for small design matrices
//!
//! The seasonal model and the blender both reduce to a ridge problem
//! `(XᵀX + diag(λ)) β = Xᵀy` with at most a few dozen columns, so a
//! Cholesky factorization of the normal equations is sufficient.

use crate::{MathError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Jitter added to the diagonal when a factorization fails
const JITTER_STEPS: [f64; 4] = [1e-10, 1e-8, 1e-6, 1e-4];

/// Solve a ridge regression with a per-column penalty.
///
/// `penalties` must have one entry per column of `x`. A penalty of zero
/// leaves the column unregularized.
pub fn ridge_solve(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    penalties: ArrayView1<f64>,
) -> Result<Array1<f64>> {
    let (rows, cols) = x.dim();
    if rows != y.len() {
        return Err(MathError::InvalidInput(format!(
            "Design matrix has {} rows but target has {} values",
            rows,
            y.len()
        )));
    }
    if cols != penalties.len() {
        return Err(MathError::InvalidInput(format!(
            "Design matrix has {} columns but {} penalties were given",
            cols,
            penalties.len()
        )));
    }
    if rows == 0 || cols == 0 {
        return Err(MathError::InsufficientData(
            "Cannot solve an empty least squares problem".to_string(),
        ));
    }

    let mut gram = x.t().dot(&x);
    for (i, penalty) in penalties.iter().enumerate() {
        if *penalty < 0.0 || !penalty.is_finite() {
            return Err(MathError::InvalidInput(format!(
                "Penalty for column {} must be a non-negative finite number",
                i
            )));
        }
        gram[[i, i]] += penalty;
    }
    let rhs = x.t().dot(&y);

    solve_spd(&gram, &rhs)
}

/// Solve `a · z = b` for a symmetric positive (semi-)definite `a`.
///
/// Falls back to increasing diagonal jitter when `a` is singular, which
/// happens with collinear columns such as a constant seasonal term.
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return Err(MathError::InvalidInput(format!(
            "Expected a square system, got {}x{} with rhs of length {}",
            a.nrows(),
            a.ncols(),
            b.len()
        )));
    }

    if let Some(lower) = cholesky(a) {
        return Ok(substitute(&lower, b));
    }

    let scale = (0..n).map(|i| a[[i, i]].abs()).fold(1.0_f64, f64::max);
    for jitter in JITTER_STEPS {
        let mut shifted = a.clone();
        for i in 0..n {
            shifted[[i, i]] += jitter * scale;
        }
        if let Some(lower) = cholesky(&shifted) {
            return Ok(substitute(&lower, b));
        }
    }

    Err(MathError::CalculationError(
        "Normal equations are not positive definite".to_string(),
    ))
}

fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut lower = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= lower[[i, k]] * lower[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                lower[[i, j]] = sum.sqrt();
            } else {
                lower[[i, j]] = sum / lower[[j, j]];
            }
        }
    }

    Some(lower)
}

// Forward then backward substitution with L and Lᵀ.
fn substitute(lower: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = lower.nrows();
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= lower[[i, k]] * z[k];
        }
        z[i] = sum / lower[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= lower[[k, i]] * x[k];
        }
        x[i] = sum / lower[[i, i]];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;

    #[test]
    fn test_exact_linear_fit() {
        // y = 2 + 3x
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![2.0, 5.0, 8.0, 11.0];
        let beta = ridge_solve(x.view(), y.view(), array![0.0, 0.0].view()).unwrap();

        assert_approx_eq!(beta[0], 2.0, 1e-8);
        assert_approx_eq!(beta[1], 3.0, 1e-8);
    }

    #[test]
    fn test_penalty_shrinks_coefficient() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![2.0, 4.0, 6.0];
        let free = ridge_solve(x.view(), y.view(), array![0.0].view()).unwrap();
        let shrunk = ridge_solve(x.view(), y.view(), array![10.0].view()).unwrap();

        assert_approx_eq!(free[0], 2.0, 1e-10);
        assert!(shrunk[0] < free[0]);
    }

    #[test]
    fn test_collinear_columns_still_solve() {
        let x = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let y = array![3.0, 3.0, 3.0];
        let beta = ridge_solve(x.view(), y.view(), array![0.0, 0.0].view()).unwrap();

        assert_approx_eq!(beta[0] + beta[1], 3.0, 1e-4);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0, 3.0];
        assert!(ridge_solve(x.view(), y.view(), array![0.0].view()).is_err());
    }
}
