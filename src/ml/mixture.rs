//! Gaussian mixture fitting and information criteria

use crate::ml::linalg::{cholesky_log_det, forward_substitute};
use crate::structs::{AnalysisError, MixtureModel, Result};
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::{GaussianMixtureModel, GmmError, KMeans};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Hyperparameters of one mixture fit
#[derive(Debug, Clone, Copy)]
pub struct MixtureParams {
    pub n_components: usize,
    pub n_init: usize,
    pub max_iter: u64,
    pub reg_covar: f64,
    pub seed: u64,
}

/// Mixture parameters without the fitted criteria
struct Components {
    weights: Array1<f64>,
    means: Array2<f64>,
    covariances: Array3<f64>,
}

/// Fit a full-covariance Gaussian mixture, keeping the best of `n_init` runs
///
/// A fit that has not converged after `max_iter` EM steps is kept with a
/// warning rather than rejected.
///
/// # Errors
/// Returns error if the EM fit fails or the fitted covariances are degenerate
#[allow(clippy::cast_possible_truncation)]
pub fn fit(data: &Array2<f64>, params: &MixtureParams) -> Result<(MixtureModel, Vec<usize>)> {
    let n_samples = data.nrows();
    if params.n_components == 0 || n_samples < params.n_components {
        return Err(AnalysisError::InvalidParameter(format!(
            "Cannot fit {} components with only {n_samples} samples",
            params.n_components
        )));
    }

    let dataset = DatasetBase::from(data.clone());

    let fitted = GaussianMixtureModel::<f64>::params(params.n_components)
        .n_runs(params.n_init as u64)
        .max_n_iterations(params.max_iter)
        .reg_covariance(params.reg_covar)
        .with_rng(Xoshiro256Plus::seed_from_u64(params.seed))
        .fit(&dataset);

    let components = match fitted {
        Ok(gmm) => Components {
            weights: gmm.weights().to_owned(),
            means: gmm.means().to_owned(),
            covariances: gmm.covariances().to_owned(),
        },
        Err(GmmError::NotConverged(_)) => {
            warn!(
                components = params.n_components,
                max_iter = params.max_iter,
                "Gaussian mixture did not converge; keeping the last EM iterate"
            );
            fit_fixed_iterations(data, params)?
        }
        Err(e) => return Err(AnalysisError::Numeric(format!("Gaussian mixture failed: {e}"))),
    };

    let Components {
        weights,
        means,
        covariances,
    } = components;

    let log_dens = weighted_log_densities(&weights, &means, &covariances, data.view())?;
    let labels = log_dens.axis_iter(Axis(0)).map(first_argmax).collect();
    let log_likelihood: f64 = log_dens.axis_iter(Axis(0)).map(log_sum_exp).sum();
    let (bic, aic) =
        information_criteria(log_likelihood, n_samples, params.n_components, data.ncols());

    Ok((
        MixtureModel {
            weights,
            means,
            covariances,
            log_likelihood,
            bic,
            aic,
        },
        labels,
    ))
}

/// Exactly `max_iter` EM steps per run from a K-means start, best final
/// log-likelihood across `n_init` runs
fn fit_fixed_iterations(data: &Array2<f64>, params: &MixtureParams) -> Result<Components> {
    let mut best: Option<(f64, Components)> = None;

    for run in 0..params.n_init.max(1) {
        let seed = params.seed.wrapping_add(run as u64);
        let dataset = DatasetBase::from(data.clone());
        let rng = Xoshiro256Plus::seed_from_u64(seed);
        let kmeans = KMeans::params_with_rng(params.n_components, rng)
            .n_runs(1)
            .max_n_iterations(10)
            .tolerance(1e-3)
            .fit(&dataset)
            .map_err(|e| AnalysisError::Numeric(format!("K-means initialization failed: {e}")))?;
        let labels: Array1<usize> = kmeans.predict(data);

        let mut resp = Array2::zeros((data.nrows(), params.n_components));
        for (i, &label) in labels.iter().enumerate() {
            resp[[i, label]] = 1.0;
        }
        let mut components = m_step(data.view(), &resp, params.reg_covar);

        for _ in 0..params.max_iter {
            let log_dens = weighted_log_densities(
                &components.weights,
                &components.means,
                &components.covariances,
                data.view(),
            )?;
            for (mut row, dens) in resp.axis_iter_mut(Axis(0)).zip(log_dens.axis_iter(Axis(0))) {
                let norm = log_sum_exp(dens);
                row.assign(&dens.mapv(|v| (v - norm).exp()));
            }
            components = m_step(data.view(), &resp, params.reg_covar);
        }

        let log_likelihood = total_log_likelihood(
            &components.weights,
            &components.means,
            &components.covariances,
            data.view(),
        )?;
        debug!(run, log_likelihood, "fixed-iteration mixture run");
        if best.as_ref().map_or(true, |(ll, _)| log_likelihood > *ll) {
            best = Some((log_likelihood, components));
        }
    }

    best.map(|(_, c)| c)
        .ok_or_else(|| AnalysisError::Numeric("no mixture run completed".into()))
}

/// Weights, means and regularized covariances from responsibilities
#[allow(clippy::cast_precision_loss)]
fn m_step(data: ArrayView2<'_, f64>, resp: &Array2<f64>, reg_covar: f64) -> Components {
    let (n, d) = data.dim();
    let k = resp.ncols();
    // keeps empty components away from a zero division
    let nk = resp.sum_axis(Axis(0)) + 10.0 * f64::EPSILON;

    let means = resp.t().dot(&data) / &nk.view().insert_axis(Axis(1));

    let mut covariances = Array3::zeros((k, d, d));
    for c in 0..k {
        let diff = &data - &means.row(c);
        let weighted = &diff * &resp.column(c).insert_axis(Axis(1));
        let mut cov = weighted.t().dot(&diff) / nk[c];
        cov.diag_mut().mapv_inplace(|v| v + reg_covar);
        covariances.index_axis_mut(Axis(0), c).assign(&cov);
    }

    Components {
        weights: nk / n as f64,
        means,
        covariances,
    }
}

fn first_argmax(values: ArrayView1<'_, f64>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// `ln w_k + ln N(x_i | mu_k, Sigma_k)` for every row and component
///
/// # Errors
/// Returns `Numeric` if a covariance is not positive definite
pub fn weighted_log_densities(
    weights: &Array1<f64>,
    means: &Array2<f64>,
    covariances: &Array3<f64>,
    data: ArrayView2<'_, f64>,
) -> Result<Array2<f64>> {
    let (n, d) = data.dim();
    let k = weights.len();
    #[allow(clippy::cast_precision_loss)]
    let norm = d as f64 * (2.0 * PI).ln();

    let mut out = Array2::zeros((n, k));
    for c in 0..k {
        let (lower, log_det) = cholesky_log_det(covariances.index_axis(Axis(0), c))?;
        let mean = means.row(c);
        let log_w = weights[c].ln();
        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            let diff = &row - &mean;
            let z = forward_substitute(&lower, diff.view());
            let maha = z.dot(&z);
            out[[i, c]] = log_w - 0.5 * (norm + log_det + maha);
        }
    }
    Ok(out)
}

/// Sum over rows of the log mixture density
///
/// # Errors
/// Returns `Numeric` if a covariance is not positive definite
pub fn total_log_likelihood(
    weights: &Array1<f64>,
    means: &Array2<f64>,
    covariances: &Array3<f64>,
    data: ArrayView2<'_, f64>,
) -> Result<f64> {
    let log_dens = weighted_log_densities(weights, means, covariances, data)?;
    Ok(log_dens
        .axis_iter(Axis(0))
        .map(log_sum_exp)
        .sum())
}

fn log_sum_exp(values: ArrayView1<'_, f64>) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Free parameters of a full-covariance mixture
#[must_use]
pub fn n_parameters(n_components: usize, n_features: usize) -> usize {
    let cov_params = n_components * n_features * (n_features + 1) / 2;
    let mean_params = n_components * n_features;
    cov_params + mean_params + n_components - 1
}

/// Bayesian and Akaike information criteria, in that order
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn information_criteria(
    log_likelihood: f64,
    n_samples: usize,
    n_components: usize,
    n_features: usize,
) -> (f64, f64) {
    let p = n_parameters(n_components, n_features) as f64;
    let bic = -2.0 * log_likelihood + p * (n_samples as f64).ln();
    let aic = -2.0 * log_likelihood + 2.0 * p;
    (bic, aic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_n_parameters() {
        // 2 components in 2d: cov 2*3 + means 4 + weights 1
        assert_eq!(n_parameters(2, 2), 11);
        assert_eq!(n_parameters(1, 1), 2);
    }

    #[test]
    fn test_standard_normal_log_likelihood() {
        let weights = array![1.0];
        let means = array![[0.0]];
        let covariances = Array3::from_elem((1, 1, 1), 1.0);
        let data = array![[0.0], [1.0]];

        let ll = total_log_likelihood(&weights, &means, &covariances, data.view())
            .expect("log likelihood");
        let expected = -(2.0 * PI).ln() - 0.5;
        assert_abs_diff_eq!(ll, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_information_criteria() {
        let (bic, aic) = information_criteria(-10.0, 100, 1, 1);
        assert_abs_diff_eq!(bic, 20.0 + 2.0 * 100f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(aic, 24.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fit_separated_blobs() {
        let data = array![
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.2],
            [-0.1, 0.0],
            [0.0, -0.2],
            [10.0, 10.1],
            [10.2, 10.0],
            [10.1, 9.8],
            [9.9, 10.0],
            [10.0, 10.2]
        ];
        let params = MixtureParams {
            n_components: 2,
            n_init: 3,
            max_iter: 100,
            reg_covar: 1e-6,
            seed: 42,
        };

        let (model, labels) = fit(&data, &params).expect("fit mixture");
        assert_eq!(labels.len(), 10);
        assert!(labels[..5].iter().all(|&l| l == labels[0]));
        assert!(labels[5..].iter().all(|&l| l == labels[5]));
        assert_ne!(labels[0], labels[5]);
        assert_abs_diff_eq!(model.weights.sum(), 1.0, epsilon = 1e-9);
        assert!(model.bic > model.aic);
    }

    #[test]
    fn test_fit_keeps_unconverged_result() {
        let data = array![
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.2],
            [5.0, 5.1],
            [5.2, 4.9],
            [4.9, 5.0],
            [10.0, 0.1],
            [10.2, 0.3],
            [9.8, 0.0],
            [10.1, 0.2]
        ];
        let params = MixtureParams {
            n_components: 3,
            n_init: 1,
            max_iter: 1,
            reg_covar: 1e-6,
            seed: 42,
        };

        let (model, labels) = fit(&data, &params).expect("keep unconverged fit");
        assert_eq!(labels.len(), 10);
        assert!(labels.iter().all(|&l| l < 3));
        assert_eq!(model.means.dim(), (3, 2));
        assert_abs_diff_eq!(model.weights.sum(), 1.0, epsilon = 1e-9);
        assert!(model.log_likelihood.is_finite());
    }

    #[test]
    fn test_fixed_iterations_separate_blobs() {
        let data = array![
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.2],
            [8.0, 8.1],
            [8.2, 7.9],
            [7.9, 8.0]
        ];
        let params = MixtureParams {
            n_components: 2,
            n_init: 2,
            max_iter: 3,
            reg_covar: 1e-6,
            seed: 7,
        };

        let components = fit_fixed_iterations(&data, &params).expect("em");
        let means = &components.means;
        let low = if means[[0, 0]] < means[[1, 0]] { 0 } else { 1 };
        assert_abs_diff_eq!(means[[low, 0]], 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(means[[1 - low, 0]], 8.033_333, epsilon = 1e-5);
        assert_abs_diff_eq!(components.weights.sum(), 1.0, epsilon = 1e-9);
    }
}
