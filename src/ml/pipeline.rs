//! Analysis pipeline that runs one engine per request

use crate::ml::clustering::{ClusteringEngine, FitOptions, DEFAULT_SEED, SPATIAL_TITLE};
use crate::ml::correlation::CorrelationEngine;
use crate::ml::output::{self, OutputFormat};
use crate::ml::regression::RegressionEngine;
use crate::structs::{
    AnalysisError, Artifact, CancelToken, ClusterFamily, FeatureMatrix, NameMap, ReportItem,
    Result, SelectionMethod, TestSide,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Clustering tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub family: ClusterFamily,
    /// `BIC`, `AIC`, `silhouette`, `wcss` or `fixed`
    pub method: String,
    /// Cluster count used by the `fixed` method
    pub clusters: usize,
    pub k_start: usize,
    pub k_end: usize,
    /// Final-fit restarts; the family default when absent
    pub n_init: Option<usize>,
    pub max_iter: Option<u64>,
    pub reg_covar: f64,
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            family: ClusterFamily::Mixture,
            method: "BIC".into(),
            clusters: 2,
            k_start: 2,
            k_end: 10,
            n_init: None,
            max_iter: None,
            reg_covar: 1e-6,
            seed: DEFAULT_SEED,
        }
    }
}

impl ClusteringConfig {
    /// Options of the final fit, filling gaps from the family defaults
    #[must_use]
    pub fn fit_options(&self) -> FitOptions {
        let defaults = FitOptions::for_family(self.family);
        FitOptions {
            n_init: self.n_init.unwrap_or(defaults.n_init),
            max_iter: self.max_iter.unwrap_or(defaults.max_iter),
            reg_covar: self.reg_covar,
        }
    }

    /// # Errors
    /// Returns `InvalidParameter` for an unknown method name
    pub fn selection_method(&self) -> Result<SelectionMethod> {
        SelectionMethod::parse(&self.method, self.clusters)
    }
}

/// Correlation tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub test_side: TestSide,
    pub annotate: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            test_side: TestSide::TwoSided,
            annotate: true,
        }
    }
}

/// Regression tunables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Indicator code of the dependent variable
    pub dependent: Option<String>,
}

/// Where and how reports are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub save_model: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./rstat_output"),
            format: OutputFormat::Json,
            save_model: true,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub clustering: ClusteringConfig,
    pub correlation: CorrelationConfig,
    pub regression: RegressionConfig,
    pub output: OutputConfig,
}

impl AnalysisConfig {
    /// Load a JSON configuration; missing keys take their defaults
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AnalysisError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// One request's engine behind a common fit/diagnostics interface
pub trait AnalysisEngine {
    /// Identifier of the per-instance artifact directory
    fn id(&self) -> Uuid;

    /// # Errors
    /// Returns the engine's fit error
    fn fit(&mut self) -> Result<()>;

    /// Report items in display order
    ///
    /// # Errors
    /// Returns error if called before a successful `fit`
    fn diagnostics(&self) -> Result<Vec<ReportItem>>;

    /// Persist the fitted model, if the engine has one
    ///
    /// # Errors
    /// Returns error if writing fails
    fn save_model(&self, _base_dir: &Path) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Cluster-count selection, final fit and optional spatial projection
pub struct ClusteringJob {
    engine: ClusteringEngine,
    config: ClusteringConfig,
    spatial_crs: Option<String>,
}

impl ClusteringJob {
    /// # Errors
    /// Returns `InvalidParameter` for a bad cluster-count range
    pub fn new(
        matrix: FeatureMatrix,
        names: NameMap,
        config: ClusteringConfig,
        cancel: CancelToken,
    ) -> Result<Self> {
        let mut engine = ClusteringEngine::new(matrix, names, config.family)
            .with_seed(config.seed)
            .with_cancel_token(cancel);
        engine.set_k_range(config.k_start, config.k_end)?;
        Ok(Self {
            engine,
            config,
            spatial_crs: None,
        })
    }

    /// Emit converted coordinates from `crs` instead of the cluster report
    #[must_use]
    pub fn with_spatial_output(mut self, crs: impl Into<String>) -> Self {
        self.spatial_crs = Some(crs.into());
        self
    }

    #[must_use]
    pub fn engine(&self) -> &ClusteringEngine {
        &self.engine
    }
}

impl AnalysisEngine for ClusteringJob {
    fn id(&self) -> Uuid {
        self.engine.id()
    }

    fn fit(&mut self) -> Result<()> {
        let method = self.config.selection_method()?;
        self.engine.select_optimal_count(method, None)?;
        self.engine.fit(&self.config.fit_options())?;
        Ok(())
    }

    fn diagnostics(&self) -> Result<Vec<ReportItem>> {
        match &self.spatial_crs {
            Some(crs) => Ok(vec![ReportItem::new(
                SPATIAL_TITLE,
                Artifact::Records(self.engine.spatial_result(crs)?),
            )]),
            None => self.engine.report(),
        }
    }

    fn save_model(&self, base_dir: &Path) -> Result<Option<PathBuf>> {
        self.engine.save_model(base_dir).map(Some)
    }
}

pub struct CorrelationJob {
    engine: CorrelationEngine,
    config: CorrelationConfig,
}

impl CorrelationJob {
    #[must_use]
    pub fn new(matrix: FeatureMatrix, names: NameMap, config: CorrelationConfig) -> Self {
        Self {
            engine: CorrelationEngine::new(matrix, names),
            config,
        }
    }
}

impl AnalysisEngine for CorrelationJob {
    fn id(&self) -> Uuid {
        self.engine.id()
    }

    /// Correlation has no fitted state; only the input is checked
    fn fit(&mut self) -> Result<()> {
        self.engine
            .correlation_matrix(self.config.test_side, self.config.annotate)
            .map(|_| ())
    }

    fn diagnostics(&self) -> Result<Vec<ReportItem>> {
        self.engine
            .report(self.config.test_side, self.config.annotate)
    }
}

pub struct RegressionJob {
    engine: RegressionEngine,
}

impl RegressionJob {
    /// # Errors
    /// Returns `Config` without a dependent code, `InvalidParameter` if the
    /// code is not in the matrix
    pub fn new(
        matrix: FeatureMatrix,
        names: NameMap,
        config: &RegressionConfig,
        cancel: CancelToken,
    ) -> Result<Self> {
        let dependent = config
            .dependent
            .as_deref()
            .ok_or_else(|| AnalysisError::Config("regression needs a dependent code".into()))?;
        Ok(Self {
            engine: RegressionEngine::new(matrix, dependent, names)?.with_cancel_token(cancel),
        })
    }
}

impl AnalysisEngine for RegressionJob {
    fn id(&self) -> Uuid {
        self.engine.id()
    }

    fn fit(&mut self) -> Result<()> {
        self.engine.fit().map(|_| ())
    }

    fn diagnostics(&self) -> Result<Vec<ReportItem>> {
        self.engine.report()
    }

    fn save_model(&self, base_dir: &Path) -> Result<Option<PathBuf>> {
        self.engine.save_model(base_dir).map(Some)
    }
}

/// Files produced by one pipeline run
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub dir: PathBuf,
    pub report: PathBuf,
    pub model: Option<PathBuf>,
    pub items: Vec<ReportItem>,
}

/// Fit the engine, collect its report and write it under `<output_dir>/<id>`
///
/// # Errors
/// Returns the first fit, diagnostics or IO error
pub fn run(job: &mut dyn AnalysisEngine, output: &OutputConfig) -> Result<RunOutput> {
    job.fit()?;
    let items = job.diagnostics()?;

    let dir = output::instance_dir(&output.output_dir, job.id())?;
    let report = output::write_report(&dir, &items, output.format)?;
    let model = if output.save_model {
        job.save_model(&output.output_dir)?
    } else {
        None
    };

    info!(
        engine = %job.id(),
        items = items.len(),
        report = %report.display(),
        "wrote analysis report"
    );

    Ok(RunOutput {
        dir,
        report,
        model,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::output::{decode_item, EncodedItem};
    use crate::structs::RowKey;
    use ndarray::Array2;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn matrix() -> FeatureMatrix {
        let mut values = Array2::zeros((20, 3));
        for i in 0..20 {
            let offset = if i < 10 { 0.0 } else { 8.0 };
            let x = f64::from(u8::try_from(i % 10).expect("small"));
            values[[i, 0]] = offset + x * 0.1;
            values[[i, 1]] = offset + (x * 0.7).sin() * 0.3;
            values[[i, 2]] = 2.0 * values[[i, 0]] - values[[i, 1]] + (x * 1.3).cos() * 0.2;
        }
        let keys = (0..20)
            .map(|i| RowKey::new(format!("region{}", i % 5), format!("{}", 2000 + i / 5)))
            .collect();
        FeatureMatrix::new(keys, vec!["A".into(), "B".into(), "Y".into()], values)
            .expect("matrix")
    }

    fn output_config(dir: &TempDir) -> OutputConfig {
        OutputConfig {
            output_dir: dir.path().to_path_buf(),
            ..OutputConfig::default()
        }
    }

    #[test]
    fn test_config_defaults_and_file() {
        let mut file = NamedTempFile::new().expect("create");
        file.write_all(br#"{"clustering": {"family": "centroid", "method": "silhouette"}}"#)
            .expect("write");

        let config = AnalysisConfig::from_file(file.path()).expect("load");
        assert_eq!(config.clustering.family, ClusterFamily::Centroid);
        assert_eq!(config.clustering.k_end, 10);
        assert_eq!(config.clustering.fit_options().n_init, 100);
        assert!(config.correlation.annotate);
        assert_eq!(
            config.clustering.selection_method().expect("method"),
            SelectionMethod::Silhouette
        );
    }

    #[test]
    fn test_correlation_run() {
        let dir = TempDir::new().expect("temp dir");
        let mut job = CorrelationJob::new(matrix(), NameMap::new(), CorrelationConfig::default());
        let out = run(&mut job, &output_config(&dir)).expect("run");

        assert_eq!(out.items.len(), 4);
        assert!(out.report.exists());
        assert!(out.model.is_none());
        assert!(out.dir.ends_with(job.id().to_string()));
    }

    #[test]
    fn test_regression_run() {
        let dir = TempDir::new().expect("temp dir");
        let config = RegressionConfig {
            dependent: Some("Y".into()),
        };
        let mut job =
            RegressionJob::new(matrix(), NameMap::new(), &config, CancelToken::new()).expect("job");
        let out = run(&mut job, &output_config(&dir)).expect("run");

        assert_eq!(out.items.len(), 5);
        assert!(out.model.expect("model path").exists());

        let encoded: Vec<EncodedItem> = output::read_model(&out.report).expect("read");
        let bytes = decode_item(&encoded[0]).expect("decode");
        let artifact: Artifact = serde_json::from_slice(&bytes).expect("artifact");
        assert!(matches!(artifact, Artifact::Table(_)));
    }

    #[test]
    fn test_regression_needs_dependent() {
        let result = RegressionJob::new(
            matrix(),
            NameMap::new(),
            &RegressionConfig::default(),
            CancelToken::new(),
        );
        assert!(matches!(result, Err(AnalysisError::Config(_))));
    }

    #[test]
    fn test_clustering_and_spatial_run() {
        let dir = TempDir::new().expect("temp dir");
        let config = ClusteringConfig {
            family: ClusterFamily::Centroid,
            method: "silhouette".into(),
            k_end: 5,
            n_init: Some(5),
            max_iter: Some(50),
            ..ClusteringConfig::default()
        };

        let mut job = ClusteringJob::new(matrix(), NameMap::new(), config.clone(), CancelToken::new())
            .expect("job");
        let out = run(&mut job, &output_config(&dir)).expect("run");
        assert_eq!(job.engine().k(), 2);
        assert_eq!(out.items.len(), 3);

        let mut spatial = ClusteringJob::new(matrix(), NameMap::new(), config, CancelToken::new())
            .expect("job")
            .with_spatial_output("EPSG:5179");
        let out = run(&mut spatial, &output_config(&dir)).expect("run");
        match &out.items[0].artifact {
            Artifact::Records(points) => assert_eq!(points.len(), 20),
            other => panic!("unexpected artifact: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_run() {
        let dir = TempDir::new().expect("temp dir");
        let token = CancelToken::new();
        token.cancel();
        let mut job =
            ClusteringJob::new(matrix(), NameMap::new(), ClusteringConfig::default(), token)
                .expect("job");
        assert!(matches!(
            run(&mut job, &output_config(&dir)),
            Err(AnalysisError::Cancelled)
        ));
    }
}
