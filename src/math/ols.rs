//! Least squares solver.
//!
//! The rough parameter estimate solves a small linear regression of the form:
//!
//! ```text
//! minimize Σ (y_i - x_i^T θ)^2
//! ```
//!
//! where `θ = (β, r)` and each row is one discretised transition of the SIR
//! relations. The design matrix is tall (3 rows per time step, 2 columns), so we
//! solve through SVD rather than a square factorisation.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() == 0 || x.nrows() != y.len() {
        return None;
    }
    let svd = x.clone().svd(true, true);

    // Case series mix magnitudes (S ~ 1e6, I ~ 1e1), so retry with looser
    // singular-value cutoffs before giving up.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(theta) = svd.solve(y, tol) {
            if theta.iter().all(|v| v.is_finite()) {
                return Some(theta);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let theta = solve_least_squares(&x, &y).unwrap();
        assert!((theta[0] - 2.0).abs() < 1e-10);
        assert!((theta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn least_squares_rejects_mismatched_rows() {
        let x = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        assert!(solve_least_squares(&x, &y).is_none());
    }
}
