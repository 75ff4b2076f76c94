//! Small dense linear algebra helpers on top of `linfa-linalg`

use crate::structs::{AnalysisError, Result};
use linfa_linalg::cholesky::Cholesky;
use linfa_linalg::eigh::Eigh;
use linfa_linalg::svd::SVD;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Relative cutoff below which a singular value counts as zero
pub const RCOND: f64 = 1e-12;

/// Ordinary least squares solution
#[derive(Debug, Clone)]
pub struct LeastSquares {
    pub params: Array1<f64>,
    /// Pseudo-inverse of `X'X`, the unscaled parameter covariance
    pub xtx_inv: Array2<f64>,
    pub residuals: Array1<f64>,
    /// Numerical rank of the design
    pub rank: usize,
}

impl LeastSquares {
    /// Residual sum of squares
    #[must_use]
    pub fn ssr(&self) -> f64 {
        self.residuals.dot(&self.residuals)
    }
}

/// Minimum-norm solution of `min ||y - X b||` through the SVD pseudo-inverse
///
/// All-zero columns are left out of the decomposition and get a zero
/// parameter and zero variance. Singular values below `RCOND * s_max` count
/// as zero, so collinear columns still fit.
///
/// # Errors
/// Returns `InvalidParameter` on mismatched shapes, `Numeric` if the SVD fails
pub fn least_squares(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<LeastSquares> {
    if x.nrows() != y.len() {
        return Err(AnalysisError::InvalidParameter(format!(
            "design has {} rows but response has {}",
            x.nrows(),
            y.len()
        )));
    }

    let p = x.ncols();
    let kept: Vec<usize> = (0..p)
        .filter(|&j| x.column(j).iter().any(|&v| v != 0.0))
        .collect();

    let mut params = Array1::zeros(p);
    let mut xtx_inv = Array2::zeros((p, p));
    let mut rank = 0;

    if !kept.is_empty() && x.nrows() > 0 {
        let x_kept = x.select(Axis(1), &kept);
        let (u, sigma, vt) = x_kept
            .svd(true, true)
            .map_err(|e| AnalysisError::Numeric(format!("SVD of design failed: {e}")))?;
        let (Some(u), Some(vt)) = (u, vt) else {
            return Err(AnalysisError::Numeric("SVD returned no singular vectors".into()));
        };

        let s_max = sigma.iter().copied().fold(0.0, f64::max);
        let cutoff = RCOND * s_max;
        let inv_sigma = sigma.mapv(|s| if s > cutoff { 1.0 / s } else { 0.0 });
        rank = inv_sigma.iter().filter(|&&s| s > 0.0).count();

        // V diag(1/s), so pinv(X) = V diag(1/s) U' and pinv(X'X) = V diag(1/s^2) V'
        let v_scaled = vt.t().to_owned() * &inv_sigma;
        let kept_params = v_scaled.dot(&u.t().dot(&y));
        let kept_inv = v_scaled.dot(&v_scaled.t());

        for (a, &ja) in kept.iter().enumerate() {
            params[ja] = kept_params[a];
            for (b, &jb) in kept.iter().enumerate() {
                xtx_inv[[ja, jb]] = kept_inv[[a, b]];
            }
        }
    }

    let residuals = &y - &x.dot(&params);

    Ok(LeastSquares {
        params,
        xtx_inv,
        residuals,
        rank,
    })
}

/// Lower Cholesky factor and log-determinant of a covariance matrix
///
/// # Errors
/// Returns `Numeric` if the matrix is not positive definite
pub fn cholesky_log_det(cov: ArrayView2<'_, f64>) -> Result<(Array2<f64>, f64)> {
    let lower = cov
        .cholesky()
        .map_err(|e| AnalysisError::Numeric(format!("covariance is not positive definite: {e}")))?;
    let log_det = 2.0 * lower.diag().iter().map(|d| d.ln()).sum::<f64>();
    Ok((lower, log_det))
}

/// Solve `L z = b` for lower-triangular `L`
#[must_use]
pub fn forward_substitute(lower: &Array2<f64>, b: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = b.len();
    let mut z = Array1::zeros(n);
    for i in 0..n {
        let mut acc = b[i];
        for j in 0..i {
            acc -= lower[[i, j]] * z[j];
        }
        z[i] = acc / lower[[i, i]];
    }
    z
}

/// Square root of the eigenvalue spread of `X'X`
///
/// # Errors
/// Returns `Numeric` if the eigen decomposition fails
pub fn condition_number(x: ArrayView2<'_, f64>) -> Result<f64> {
    let xtx = x.t().dot(&x);
    let (eigvals, _) = xtx
        .eigh()
        .map_err(|e| AnalysisError::Numeric(format!("eigen decomposition failed: {e}")))?;
    let max = eigvals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = eigvals.iter().copied().fold(f64::INFINITY, f64::min);
    Ok((max / min).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_least_squares_exact_line() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![1.0, 3.0, 5.0, 7.0];

        let fit = least_squares(x.view(), y.view()).expect("solve");
        assert_abs_diff_eq!(fit.params[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.params[1], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.ssr(), 0.0, epsilon = 1e-12);
        assert_eq!(fit.rank, 2);
        // (X'X)^-1 of [[4, 6], [6, 14]]
        assert_abs_diff_eq!(fit.xtx_inv[[0, 0]], 0.7, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.xtx_inv[[1, 1]], 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_least_squares_zero_column() {
        let x = array![[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 2.0, 0.0], [1.0, 3.0, 0.0]];
        let y = array![1.0, 3.0, 5.0, 7.0];

        let fit = least_squares(x.view(), y.view()).expect("solve");
        assert_eq!(fit.rank, 2);
        assert_abs_diff_eq!(fit.params[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.params[1], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.params[2], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.xtx_inv[[2, 2]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_least_squares_collinear_columns() {
        // minimum-norm split of the slope across two identical columns
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let y = array![2.0, 4.0, 6.0];

        let fit = least_squares(x.view(), y.view()).expect("solve");
        assert_eq!(fit.rank, 1);
        assert_abs_diff_eq!(fit.params[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.params[1], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.ssr(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_least_squares_shape_mismatch() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0, 3.0];
        assert!(matches!(
            least_squares(x.view(), y.view()),
            Err(AnalysisError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_cholesky_log_det_and_solve() {
        let cov = array![[4.0, 2.0], [2.0, 3.0]];
        let (lower, log_det) = cholesky_log_det(cov.view()).expect("cholesky");
        // det = 12 - 4 = 8
        assert_abs_diff_eq!(log_det, 8.0_f64.ln(), epsilon = 1e-12);

        let b = array![2.0, 4.0];
        let z = forward_substitute(&lower, b.view());
        let back = lower.dot(&z);
        assert_abs_diff_eq!(back[0], b[0], epsilon = 1e-12);
        assert_abs_diff_eq!(back[1], b[1], epsilon = 1e-12);
    }

    #[test]
    fn test_condition_number_identity() {
        let x = array![[1.0, 0.0], [0.0, 1.0]];
        assert_abs_diff_eq!(condition_number(x.view()).expect("cond"), 1.0, epsilon = 1e-9);
    }
}
