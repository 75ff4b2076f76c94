//! Prediction from stored model parameters

use crate::ml::mixture::weighted_log_densities;
use crate::structs::{
    AnalysisError, CentroidModel, FittedModel, LinearModel, MixtureModel, Result,
};
use ndarray::{ArrayView1, ArrayView2, Axis};

/// Applies fitted parameters to new rows
pub trait Predictor {
    type Output;

    /// Number of feature columns the parameters were fitted on
    fn n_features(&self) -> usize;

    /// # Errors
    /// Returns `InvalidParameter` on a column-count mismatch
    fn predict(&self, rows: ArrayView2<'_, f64>) -> Result<Self::Output>;
}

fn check_width(expected: usize, rows: ArrayView2<'_, f64>) -> Result<()> {
    if rows.ncols() == expected {
        Ok(())
    } else {
        Err(AnalysisError::InvalidParameter(format!(
            "model expects {expected} columns, got {}",
            rows.ncols()
        )))
    }
}

fn argmax(values: ArrayView1<'_, f64>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0
}

impl Predictor for MixtureModel {
    type Output = Vec<usize>;

    fn n_features(&self) -> usize {
        self.means.ncols()
    }

    /// Component with the highest posterior
    fn predict(&self, rows: ArrayView2<'_, f64>) -> Result<Vec<usize>> {
        check_width(self.n_features(), rows)?;
        let log_dens = weighted_log_densities(&self.weights, &self.means, &self.covariances, rows)?;
        Ok(log_dens.axis_iter(Axis(0)).map(argmax).collect())
    }
}

impl Predictor for CentroidModel {
    type Output = Vec<usize>;

    fn n_features(&self) -> usize {
        self.centroids.ncols()
    }

    /// Nearest centroid by squared Euclidean distance
    fn predict(&self, rows: ArrayView2<'_, f64>) -> Result<Vec<usize>> {
        check_width(self.n_features(), rows)?;
        Ok(rows
            .axis_iter(Axis(0))
            .map(|row| {
                let neg_dist = self
                    .centroids
                    .axis_iter(Axis(0))
                    .map(|c| -squared_distance(row, c))
                    .collect::<ndarray::Array1<f64>>();
                argmax(neg_dist.view())
            })
            .collect())
    }
}

impl Predictor for LinearModel {
    type Output = Vec<f64>;

    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn predict(&self, rows: ArrayView2<'_, f64>) -> Result<Vec<f64>> {
        check_width(self.n_features(), rows)?;
        Ok(rows
            .dot(&self.coefficients)
            .mapv(|v| v + self.intercept)
            .to_vec())
    }
}

impl FittedModel {
    #[must_use]
    pub fn family(&self) -> &'static str {
        match self {
            Self::Mixture(_) => "mixture",
            Self::Centroid(_) => "centroid",
            Self::Linear(_) => "linear",
        }
    }

    /// Cluster assignment for new rows
    ///
    /// # Errors
    /// Returns `InvalidParameter` for linear models or a column mismatch
    pub fn predict_labels(&self, rows: ArrayView2<'_, f64>) -> Result<Vec<usize>> {
        match self {
            Self::Mixture(m) => m.predict(rows),
            Self::Centroid(m) => m.predict(rows),
            Self::Linear(_) => Err(AnalysisError::InvalidParameter(
                "linear models do not assign clusters".into(),
            )),
        }
    }
}

pub fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3};

    #[test]
    fn test_centroid_predict() {
        let model = CentroidModel {
            centroids: array![[0.0, 0.0], [10.0, 10.0]],
            inertia: 0.0,
        };
        let rows = array![[1.0, -1.0], [9.0, 11.0], [4.0, 4.0]];
        assert_eq!(model.predict(rows.view()).expect("predict"), vec![0, 1, 0]);
    }

    #[test]
    fn test_mixture_predict() {
        let mut covariances = Array3::zeros((2, 1, 1));
        covariances[[0, 0, 0]] = 1.0;
        covariances[[1, 0, 0]] = 1.0;
        let model = MixtureModel {
            weights: array![0.5, 0.5],
            means: array![[0.0], [5.0]],
            covariances,
            log_likelihood: 0.0,
            bic: 0.0,
            aic: 0.0,
        };
        let rows = array![[0.4], [4.2], [2.4]];
        assert_eq!(model.predict(rows.view()).expect("predict"), vec![0, 1, 0]);
    }

    #[test]
    fn test_linear_predict() {
        let model = LinearModel {
            intercept: 1.0,
            coefficients: array![2.0, -1.0],
        };
        let out = model.predict(array![[1.0, 1.0], [0.0, 3.0]].view()).expect("predict");
        assert_abs_diff_eq!(out[0], 2.0);
        assert_abs_diff_eq!(out[1], -2.0);
    }

    #[test]
    fn test_width_mismatch() {
        let model = LinearModel {
            intercept: 0.0,
            coefficients: array![1.0],
        };
        assert!(matches!(
            model.predict(array![[1.0, 2.0]].view()),
            Err(AnalysisError::InvalidParameter(_))
        ));
        assert!(FittedModel::Linear(model)
            .predict_labels(array![[1.0]].view())
            .is_err());
    }
}
