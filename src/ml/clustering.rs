use crate::ml::crs::{validate_crs, CoordinateConverter, KoreanGridConverter};
use crate::ml::mixture::{self, MixtureParams};
use crate::ml::model::squared_distance;
use crate::ml::output;
use crate::structs::{
    AnalysisError, Artifact, CancelToken, Cell, CentroidModel, Chart, ClusterFamily, ClusterModel,
    FeatureMatrix, FittedModel, Marker, NameMap, ReportItem, Result, ScoreSeries, SelectionMethod,
    Series, SeriesKind, SpatialPoint, Table,
};
use linfa::metrics::SilhouetteScore;
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cluster count used when `fit` runs without a selection step
pub const DEFAULT_K: usize = 2;

/// Candidate counts tried when no range is given
pub const DEFAULT_K_RANGE: std::ops::Range<usize> = 2..10;

pub const DEFAULT_SEED: u64 = 42;

const SELECTION_CENTROID_N_INIT: usize = 30;
const SELECTION_CENTROID_MAX_ITER: u64 = 30;
const SELECTION_MIXTURE_N_INIT: usize = 1;
const SELECTION_MIXTURE_MAX_ITER: u64 = 100;
const SELECTION_REG_COVAR: f64 = 1e-6;

pub const CLUSTER_TABLE_TITLE: &str = "GMM Clustering Table";
pub const SPATIAL_TITLE: &str = "Spatial Clustering Result";

/// Restarts and iteration limits for the final fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub n_init: usize,
    pub max_iter: u64,
    /// Only read by the mixture family
    pub reg_covar: f64,
}

impl FitOptions {
    #[must_use]
    pub fn for_family(family: ClusterFamily) -> Self {
        match family {
            ClusterFamily::Mixture => Self {
                n_init: 10,
                max_iter: 100,
                reg_covar: 1e-6,
            },
            ClusterFamily::Centroid => Self {
                n_init: 100,
                max_iter: 300,
                reg_covar: 1e-6,
            },
        }
    }
}

/// Partitions the rows of one feature matrix
///
/// The engine owns its matrix for the lifetime of a request. The cluster
/// count stays at `DEFAULT_K` until `select_optimal_count` picks one.
#[derive(Debug)]
pub struct ClusteringEngine {
    id: Uuid,
    matrix: FeatureMatrix,
    names: NameMap,
    family: ClusterFamily,
    k_range: Vec<usize>,
    k: usize,
    method: Option<SelectionMethod>,
    scores: ScoreSeries,
    /// Scores of the most recent selection only
    latest: ScoreSeries,
    model: Option<ClusterModel>,
    seed: u64,
    cancel: CancelToken,
}

impl ClusteringEngine {
    #[must_use]
    pub fn new(matrix: FeatureMatrix, names: NameMap, family: ClusterFamily) -> Self {
        let id = Uuid::new_v4();
        info!(
            engine = %id,
            family = ?family,
            rows = matrix.n_samples(),
            features = matrix.n_features(),
            "created clustering engine"
        );
        Self {
            id,
            matrix,
            names,
            family,
            k_range: DEFAULT_K_RANGE.collect(),
            k: DEFAULT_K,
            method: None,
            scores: ScoreSeries::default(),
            latest: ScoreSeries::default(),
            model: None,
            seed: DEFAULT_SEED,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current cluster count
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    #[must_use]
    pub fn scores(&self) -> &ScoreSeries {
        &self.scores
    }

    /// The owned matrix, with labels attached after `fit`
    #[must_use]
    pub fn matrix(&self) -> &FeatureMatrix {
        &self.matrix
    }

    /// Replace the candidate counts with `start..end`
    ///
    /// # Errors
    /// Returns `InvalidParameter` if `start < 2` or the range is empty
    pub fn set_k_range(&mut self, start: usize, end: usize) -> Result<()> {
        let candidates: Vec<usize> = (start..end).collect();
        validate_k_range(&candidates)?;
        self.k_range = candidates;
        Ok(())
    }

    /// Pick the cluster count with `method` over `k_range`
    ///
    /// Without an explicit range the stored one is used. Scores from every
    /// call are appended to the engine's score series; the choice itself only
    /// looks at the candidates of this call.
    ///
    /// # Errors
    /// Returns `NotInitialized` on an empty matrix, `InvalidParameter` for a
    /// method of the other family or a bad range, `Cancelled` if the token
    /// fires between candidate fits
    pub fn select_optimal_count(
        &mut self,
        method: SelectionMethod,
        k_range: Option<&[usize]>,
    ) -> Result<usize> {
        if self.matrix.is_empty() {
            return Err(AnalysisError::NotInitialized(
                "feature matrix is empty".into(),
            ));
        }

        let candidates = match k_range {
            Some(range) => {
                validate_k_range(range)?;
                range.to_vec()
            }
            None => self.k_range.clone(),
        };
        let scored = !matches!(method, SelectionMethod::Fixed(_));
        if let Some(&too_big) = candidates
            .iter()
            .find(|&&k| scored && k > self.matrix.n_samples())
        {
            return Err(AnalysisError::InvalidParameter(format!(
                "cannot form {too_big} clusters from {} rows",
                self.matrix.n_samples()
            )));
        }

        self.matrix.fill_missing_with_zero();
        let data = self.matrix.values.clone();
        let mut latest = ScoreSeries::default();

        let k = match (self.family, method) {
            (_, SelectionMethod::Fixed(k)) => {
                if k == 0 || k > self.matrix.n_samples() {
                    return Err(AnalysisError::InvalidParameter(format!(
                        "fixed cluster count {k} out of range"
                    )));
                }
                k
            }
            (ClusterFamily::Mixture, SelectionMethod::Bic | SelectionMethod::Aic) => {
                let (bic, aic) = self.score_mixtures(&data, &candidates)?;
                let chosen = if method == SelectionMethod::Bic { &bic } else { &aic };
                let k = chosen[first_min(&values(chosen))].0;
                latest.bic = bic;
                latest.aic = aic;
                k
            }
            (ClusterFamily::Centroid, SelectionMethod::Silhouette) => {
                let scores = self.score_centroids(&data, &candidates, silhouette)?;
                let k = scores[first_max(&values(&scores))].0;
                latest.silhouette = scores;
                k
            }
            (ClusterFamily::Centroid, SelectionMethod::Wcss) => {
                if candidates.len() < 2 {
                    return Err(AnalysisError::InvalidParameter(
                        "wcss needs at least two candidate counts".into(),
                    ));
                }
                let scores =
                    self.score_centroids(&data, &candidates, |_, _, model| Ok(model.inertia))?;
                let k = elbow(&scores);
                latest.wcss = scores;
                k
            }
            (family, method) => {
                return Err(AnalysisError::InvalidParameter(format!(
                    "not supported method: {} for {family:?}",
                    method.name()
                )));
            }
        };

        self.scores.bic.extend(latest.bic.iter().copied());
        self.scores.aic.extend(latest.aic.iter().copied());
        self.scores.silhouette.extend(latest.silhouette.iter().copied());
        self.scores.wcss.extend(latest.wcss.iter().copied());
        self.latest = latest;

        self.k = k;
        self.method = Some(method);
        info!(engine = %self.id, k, method = method.name(), "selected cluster count");
        Ok(k)
    }

    /// BIC and AIC of a mixture fit per candidate count
    fn score_mixtures(
        &self,
        data: &Array2<f64>,
        candidates: &[usize],
    ) -> Result<(Vec<(usize, f64)>, Vec<(usize, f64)>)> {
        let mut bic = Vec::with_capacity(candidates.len());
        let mut aic = Vec::with_capacity(candidates.len());

        for &k in candidates {
            self.cancel.check()?;
            let params = MixtureParams {
                n_components: k,
                n_init: SELECTION_MIXTURE_N_INIT,
                max_iter: SELECTION_MIXTURE_MAX_ITER,
                reg_covar: SELECTION_REG_COVAR,
                seed: self.seed,
            };
            let (model, _) = mixture::fit(data, &params)?;
            debug!(engine = %self.id, k, bic = model.bic, aic = model.aic, "scored mixture");
            bic.push((k, model.bic));
            aic.push((k, model.aic));
        }

        Ok((bic, aic))
    }

    fn score_centroids<F>(
        &self,
        data: &Array2<f64>,
        candidates: &[usize],
        score: F,
    ) -> Result<Vec<(usize, f64)>>
    where
        F: Fn(&Array2<f64>, &[usize], &CentroidModel) -> Result<f64>,
    {
        let mut scores = Vec::with_capacity(candidates.len());
        for &k in candidates {
            self.cancel.check()?;
            let (model, labels) = fit_centroids(
                data,
                k,
                SELECTION_CENTROID_N_INIT,
                SELECTION_CENTROID_MAX_ITER,
                self.seed,
            )?;
            let value = score(data, &labels, &model)?;
            debug!(engine = %self.id, k, score = value, "scored partition");
            scores.push((k, value));
        }
        Ok(scores)
    }

    /// Fit the final model with the current cluster count
    ///
    /// Missing values are zero-filled first and the labels are attached to
    /// the owned matrix.
    ///
    /// # Errors
    /// Returns `NotInitialized` on an empty matrix, `Cancelled` if the token
    /// is set, or the underlying fit error
    pub fn fit(&mut self, options: &FitOptions) -> Result<&ClusterModel> {
        if self.matrix.is_empty() {
            return Err(AnalysisError::NotInitialized(
                "feature matrix is empty".into(),
            ));
        }
        self.cancel.check()?;

        self.matrix.fill_missing_with_zero();
        let data = self.matrix.values.clone();

        let (model, labels) = match self.family {
            ClusterFamily::Mixture => {
                let params = MixtureParams {
                    n_components: self.k,
                    n_init: options.n_init,
                    max_iter: options.max_iter,
                    reg_covar: options.reg_covar,
                    seed: self.seed,
                };
                let (model, labels) = mixture::fit(&data, &params)?;
                (FittedModel::Mixture(model), labels)
            }
            ClusterFamily::Centroid => {
                let (model, labels) =
                    fit_centroids(&data, self.k, options.n_init, options.max_iter, self.seed)?;
                (FittedModel::Centroid(model), labels)
            }
        };

        self.matrix.attach_labels(labels.clone())?;

        let fitted = ClusterModel {
            family: self.family,
            k: self.k,
            method: self.method,
            feature_codes: self.matrix.codes.clone(),
            model,
            labels,
            scores: self.scores.clone(),
        };
        info!(
            engine = %self.id,
            k = fitted.k,
            family = fitted.model.family(),
            "fitted clustering model"
        );
        Ok(self.model.insert(fitted))
    }

    /// # Errors
    /// Returns `NotInitialized` before `fit`
    pub fn model(&self) -> Result<&ClusterModel> {
        self.model
            .as_ref()
            .ok_or_else(|| AnalysisError::NotInitialized("model must be fitted first".into()))
    }

    /// Row count per label, ordered by label
    ///
    /// # Errors
    /// Returns `NotInitialized` before `fit`
    pub fn cluster_summary(&self) -> Result<Table> {
        let model = self.model()?;
        let mut table = Table::new(
            CLUSTER_TABLE_TITLE,
            vec!["labels".to_string(), "count".to_string()],
        );
        for (i, (label, count)) in model.sizes().into_iter().enumerate() {
            table.push_row(
                vec![i.to_string()],
                vec![Cell::Int(to_i64(label)), Cell::Int(to_i64(count))],
            );
        }
        Ok(table)
    }

    /// Labelled rows projected into the target grid with the built-in converter
    ///
    /// # Errors
    /// Returns `UnsupportedCrs` for a system outside the allow-list,
    /// `NotInitialized` before `fit`
    pub fn spatial_result(&self, crs: &str) -> Result<Vec<SpatialPoint>> {
        self.spatial_result_with(crs, &KoreanGridConverter)
    }

    /// # Errors
    /// Returns `UnsupportedCrs` for a system outside the allow-list,
    /// `NotInitialized` before `fit`
    pub fn spatial_result_with(
        &self,
        crs: &str,
        converter: &dyn CoordinateConverter,
    ) -> Result<Vec<SpatialPoint>> {
        validate_crs(crs)?;
        let model = self.model()?;

        self.matrix
            .coordinate_pairs()
            .into_iter()
            .zip(&model.labels)
            .map(|((x, y), &label)| {
                let (x, y) = converter.convert(x, y, crs)?;
                Ok(SpatialPoint { x, y, label })
            })
            .collect()
    }

    /// Chart of the scores from the most recent selection
    ///
    /// The marker of the selecting criterion sits on the chosen count. Returns
    /// `None` when no score-based selection has run.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the recorded series is empty
    pub fn k_selection_chart(&self) -> Result<Option<Chart>> {
        let Some(method) = self.method else {
            warn!(engine = %self.id, "no cluster count selection to plot");
            return Ok(None);
        };

        let chart = match method {
            SelectionMethod::Bic | SelectionMethod::Aic => {
                let mut markers = Vec::new();
                for (name, series) in [("BIC", &self.latest.bic), ("AIC", &self.latest.aic)] {
                    let best = if name == method.name() {
                        score_at(series, self.k)?
                    } else {
                        pick(series, first_min)?
                    };
                    markers.push(Marker {
                        label: format!("min {name}"),
                        x: to_f64(best.0),
                        y: best.1,
                    });
                }
                Chart::Xy {
                    title: "Information Criteria".into(),
                    x_label: "Number of clusters".into(),
                    y_label: "Score".into(),
                    series: vec![
                        line_series("BIC", &self.latest.bic, SeriesKind::Line),
                        line_series("AIC", &self.latest.aic, SeriesKind::Line),
                    ],
                    markers,
                }
            }
            SelectionMethod::Silhouette => {
                let best = score_at(&self.latest.silhouette, self.k)?;
                Chart::Xy {
                    title: "Silhouette Score".into(),
                    x_label: "Number of clusters".into(),
                    y_label: "Silhouette".into(),
                    series: vec![line_series(
                        "silhouette",
                        &self.latest.silhouette,
                        SeriesKind::Bar,
                    )],
                    markers: vec![Marker {
                        label: "max".into(),
                        x: to_f64(best.0),
                        y: best.1,
                    }],
                }
            }
            SelectionMethod::Wcss => {
                let (k, y) = score_at(&self.latest.wcss, self.k)?;
                Chart::Xy {
                    title: "Elbow Method".into(),
                    x_label: "Number of clusters".into(),
                    y_label: "WCSS".into(),
                    series: vec![line_series("wcss", &self.latest.wcss, SeriesKind::Line)],
                    markers: vec![Marker {
                        label: "elbow".into(),
                        x: to_f64(k),
                        y,
                    }],
                }
            }
            SelectionMethod::Fixed(_) => {
                debug!(engine = %self.id, "fixed cluster count has no scores");
                return Ok(None);
            }
        };
        Ok(Some(chart))
    }

    /// Scatter of the first two indicators, one series per label
    ///
    /// # Errors
    /// Returns `NotInitialized` before `fit`
    pub fn cluster_chart(&self) -> Result<Chart> {
        let model = self.model()?;
        let title = match self.family {
            ClusterFamily::Mixture => "GMM Plot",
            ClusterFamily::Centroid => "KMeans Plot",
        };
        let points = self.plot_points();

        let series = model
            .sizes()
            .into_iter()
            .map(|(label, _)| Series {
                name: format!("Cluster {label}"),
                kind: SeriesKind::Scatter,
                points: points
                    .iter()
                    .zip(&model.labels)
                    .filter(|(_, &l)| l == label)
                    .map(|(p, _)| *p)
                    .collect(),
            })
            .collect();

        let (x_label, y_label) = self.axis_labels();
        Ok(Chart::Xy {
            title: title.into(),
            x_label,
            y_label,
            series,
            markers: Vec::new(),
        })
    }

    /// Scatter of the raw first two indicators
    ///
    /// # Errors
    /// Returns `NotInitialized` on an empty matrix
    pub fn data_scatter_chart(&self) -> Result<Chart> {
        if self.matrix.is_empty() {
            return Err(AnalysisError::NotInitialized(
                "feature matrix is empty".into(),
            ));
        }
        let (x_label, y_label) = self.axis_labels();
        Ok(Chart::Xy {
            title: "Data Plot".into(),
            x_label,
            y_label,
            series: vec![Series {
                name: "data".into(),
                kind: SeriesKind::Scatter,
                points: self.plot_points(),
            }],
            markers: Vec::new(),
        })
    }

    /// Cluster assignment of new rows with the fitted parameters
    ///
    /// # Errors
    /// Returns `NotInitialized` before `fit`, `InvalidParameter` on a column
    /// mismatch
    pub fn predict(&self, rows: ArrayView2<'_, f64>) -> Result<Vec<usize>> {
        self.model()?.model.predict_labels(rows)
    }

    /// Write the fitted model to `<base_dir>/<engine id>/model.json`
    ///
    /// # Errors
    /// Returns `NotInitialized` before `fit`, or an IO/JSON error
    pub fn save_model(&self, base_dir: &Path) -> Result<PathBuf> {
        let model = self.model()?;
        let dir = output::instance_dir(base_dir, self.id)?;
        output::write_model(&dir, model)
    }

    /// Report items in display order: count table, cluster plot and score chart
    ///
    /// # Errors
    /// Returns `NotInitialized` before `fit`
    pub fn report(&self) -> Result<Vec<ReportItem>> {
        let mut items = vec![
            ReportItem::new(
                CLUSTER_TABLE_TITLE,
                Artifact::Table(self.cluster_summary()?),
            ),
            ReportItem::new("Cluster Plot", Artifact::Chart(self.cluster_chart()?)),
        ];
        if let Some(chart) = self.k_selection_chart()? {
            items.push(ReportItem::new("Cluster Count Selection", Artifact::Chart(chart)));
        }
        Ok(items)
    }

    fn plot_points(&self) -> Vec<[f64; 2]> {
        self.matrix
            .values
            .axis_iter(Axis(0))
            .map(|row| {
                [
                    row.get(0).copied().unwrap_or(0.0),
                    row.get(1).copied().unwrap_or(0.0),
                ]
            })
            .collect()
    }

    fn axis_labels(&self) -> (String, String) {
        let label = |i: usize| {
            self.matrix
                .codes
                .get(i)
                .map_or_else(String::new, |c| self.names.display(c).to_string())
        };
        (label(0), label(1))
    }
}

/// Fit a K-means partition keeping the lowest-inertia of `n_init` runs
///
/// # Errors
/// Returns error if `k` is zero, exceeds the row count, or K-means fails
pub fn fit_centroids(
    data: &Array2<f64>,
    k: usize,
    n_init: usize,
    max_iter: u64,
    seed: u64,
) -> Result<(CentroidModel, Vec<usize>)> {
    let n_samples = data.nrows();

    if n_samples < k {
        return Err(AnalysisError::InvalidParameter(format!(
            "Cannot create {k} clusters with only {n_samples} samples"
        )));
    }

    if k == 0 {
        return Err(AnalysisError::InvalidParameter("k must be at least 1".into()));
    }

    let dataset = DatasetBase::from(data.clone());

    let model = KMeans::params_with_rng(k, Xoshiro256Plus::seed_from_u64(seed))
        .n_runs(n_init.max(1))
        .max_n_iterations(max_iter)
        .tolerance(1e-4)
        .fit(&dataset)
        .map_err(|e| AnalysisError::Numeric(format!("K-means failed: {e}")))?;

    let labels: Array1<usize> = model.predict(data);
    let centroids = model.centroids().to_owned();

    let inertia = data
        .axis_iter(Axis(0))
        .zip(labels.iter())
        .map(|(row, &label)| squared_distance(row, centroids.row(label)))
        .sum();

    Ok((CentroidModel { centroids, inertia }, labels.to_vec()))
}

/// Mean silhouette coefficient of a labelling
fn silhouette(data: &Array2<f64>, labels: &[usize], _: &CentroidModel) -> Result<f64> {
    DatasetBase::new(data.clone(), Array1::from(labels.to_vec()))
        .silhouette_score()
        .map_err(|e| AnalysisError::Numeric(format!("silhouette score failed: {e}")))
}

fn validate_k_range(candidates: &[usize]) -> Result<()> {
    match candidates.iter().min() {
        None => Err(AnalysisError::InvalidParameter(
            "k_range must not be empty".into(),
        )),
        Some(&start) if start < 2 => Err(AnalysisError::InvalidParameter(
            "k_range must start at 2 or higher".into(),
        )),
        Some(_) => Ok(()),
    }
}

/// Index of the smallest value, first occurrence on ties
fn first_min(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &v)| {
            if v < best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0
}

/// Index of the largest value, first occurrence on ties
fn first_max(values: &[f64]) -> usize {
    first_min(&values.iter().map(|v| -v).collect::<Vec<_>>())
}

fn values(series: &[(usize, f64)]) -> Vec<f64> {
    series.iter().map(|s| s.1).collect()
}

/// Count right after the steepest single-step decrease
fn elbow(wcss: &[(usize, f64)]) -> usize {
    let drops: Vec<f64> = wcss.windows(2).map(|w| w[1].1 - w[0].1).collect();
    wcss[first_min(&drops) + 1].0
}

fn pick(series: &[(usize, f64)], by: fn(&[f64]) -> usize) -> Result<(usize, f64)> {
    if series.is_empty() {
        return Err(AnalysisError::InvalidParameter(
            "no selection scores recorded".into(),
        ));
    }
    Ok(series[by(&values(series))])
}

/// The score recorded for count `k`
fn score_at(series: &[(usize, f64)], k: usize) -> Result<(usize, f64)> {
    series
        .iter()
        .find(|s| s.0 == k)
        .copied()
        .ok_or_else(|| AnalysisError::InvalidParameter(format!("no score recorded for k = {k}")))
}

fn line_series(name: &str, scores: &[(usize, f64)], kind: SeriesKind) -> Series {
    Series {
        name: name.into(),
        kind,
        points: scores.iter().map(|&(k, v)| [to_f64(k), v]).collect(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(v: usize) -> f64 {
    v as f64
}

fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
