//! Consolidated public types for the rstat crate
//!
//! This module contains all public structs, enums, and traits used across the crate.

use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data not initialized: {0}")]
    NotInitialized(String),

    #[error("Model not fitted: {0}")]
    NotFitted(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported coordinate system: {0}")]
    UnsupportedCrs(String),

    #[error("Numerical error: {0}")]
    Numeric(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

// ============================================================================
// Localized Labels
// ============================================================================

/// Headers of every descriptive statistics table
pub const DESCRIPTIVE_HEADERS: [&str; 8] = [
    "빈도", "평균", "표준편차", "최소값", "25%", "50%", "75%", "최대값",
];

/// Label of the regression constant term
pub const INTERCEPT_LABEL: &str = "(상수)";

/// Internal code of the regression constant term
pub const INTERCEPT_CODE: &str = "Intercept";

pub const ATTRIBUTE_HEADER: &str = "속성";
pub const VALUE_HEADER: &str = "값";
pub const STD_ERROR_OF_ESTIMATE_LABEL: &str = "추정값의 표준오차";

// ============================================================================
// Feature Matrix Types
// ============================================================================

/// Key of one feature matrix row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub region: String,
    pub period: String,
}

impl RowKey {
    #[must_use]
    pub fn new(region: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            period: period.into(),
        }
    }
}

/// Indicator values aligned by (region, period)
///
/// `values` has one row per key and one column per indicator code. Missing
/// cells are NaN until `fill_missing_with_zero` runs.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub keys: Vec<RowKey>,
    pub codes: Vec<String>,
    pub values: Array2<f64>,
    /// Native coordinate pair per row, when the source carries one
    pub coordinates: Option<Vec<(f64, f64)>>,
    /// Cluster label per row, attached after a clustering fit
    pub labels: Option<Vec<usize>>,
}

impl FeatureMatrix {
    /// Get number of samples (rows)
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    /// Get number of features (indicator columns)
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_samples() == 0 || self.n_features() == 0
    }

    /// Get column index by indicator code
    #[must_use]
    pub fn column_index(&self, code: &str) -> Option<usize> {
        self.codes.iter().position(|c| c == code)
    }

    /// Get a feature column by index
    #[must_use]
    pub fn column(&self, index: usize) -> Option<Array1<f64>> {
        if index >= self.n_features() {
            return None;
        }
        Some(self.values.column(index).to_owned())
    }
}

/// Mapping from indicator code to display name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMap(HashMap<String, String>);

impl NameMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Display name of a code, or the code itself when unmapped
    #[must_use]
    pub fn display<'a>(&'a self, code: &'a str) -> &'a str {
        if code == INTERCEPT_CODE {
            return self.0.get(code).map_or(INTERCEPT_LABEL, String::as_str);
        }
        self.0.get(code).map_or(code, String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NameMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Descriptive statistics for a numeric column
#[derive(Debug, Clone)]
pub struct ColumnStats {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator)
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

// ============================================================================
// Table and Chart Types
// ============================================================================

/// One typed table cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    Empty,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Empty => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// Row labels; two levels for keyed tables such as the correlation matrix
    pub index: Vec<String>,
    pub cells: Vec<Cell>,
}

/// Ordered rows and columns of typed values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl Table {
    #[must_use]
    pub fn new(title: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            title: title.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, index: Vec<String>, cells: Vec<Cell>) {
        self.rows.push(TableRow { index, cells });
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Look up a cell by row labels and column header
    #[must_use]
    pub fn get(&self, index: &[&str], column: &str) -> Option<&Cell> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows
            .iter()
            .find(|row| row.index.iter().map(String::as_str).eq(index.iter().copied()))
            .and_then(|row| row.cells.get(col))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Line,
    Scatter,
    Bar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub kind: SeriesKind,
    pub points: Vec<[f64; 2]>,
}

/// Highlighted point drawn over a chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub label: String,
    pub x: f64,
    pub y: f64,
}

/// Figure value handed to the artifact formatter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chart {
    Xy {
        title: String,
        x_label: String,
        y_label: String,
        series: Vec<Series>,
        markers: Vec<Marker>,
    },
    Heatmap {
        title: String,
        labels: Vec<String>,
        values: Vec<Vec<f64>>,
    },
    ScatterMatrix {
        title: String,
        labels: Vec<String>,
        columns: Vec<Vec<f64>>,
    },
}

/// Converted coordinate pair with its cluster label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialPoint {
    #[serde(rename = "x_coord")]
    pub x: f64,
    #[serde(rename = "y_coord")]
    pub y: f64,
    pub label: usize,
}

/// Anything an engine hands to the artifact formatter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Artifact {
    Table(Table),
    Chart(Chart),
    Records(Vec<SpatialPoint>),
}

/// Titled artifact produced by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct ReportItem {
    pub title: String,
    pub artifact: Artifact,
}

impl ReportItem {
    #[must_use]
    pub fn new(title: impl Into<String>, artifact: Artifact) -> Self {
        Self {
            title: title.into(),
            artifact,
        }
    }
}

// ============================================================================
// Model Types
// ============================================================================

/// Clustering model family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterFamily {
    Mixture,
    Centroid,
}

impl FromStr for ClusterFamily {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mixture" | "gmm" => Ok(Self::Mixture),
            "centroid" | "kmeans" | "k-means" => Ok(Self::Centroid),
            other => Err(AnalysisError::InvalidParameter(format!(
                "unknown clustering family: {other}"
            ))),
        }
    }
}

/// How the cluster count is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMethod {
    Bic,
    Aic,
    Silhouette,
    Wcss,
    Fixed(usize),
}

impl SelectionMethod {
    /// Parse a method name; `fixed_size` is used only by `"fixed"`
    ///
    /// # Errors
    /// Returns `InvalidParameter` for unknown names
    pub fn parse(name: &str, fixed_size: usize) -> Result<Self> {
        match name {
            "BIC" => Ok(Self::Bic),
            "AIC" => Ok(Self::Aic),
            "silhouette" => Ok(Self::Silhouette),
            "wcss" => Ok(Self::Wcss),
            "fixed" => Ok(Self::Fixed(fixed_size)),
            other => Err(AnalysisError::InvalidParameter(format!(
                "not supported method: {other}"
            ))),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bic => "BIC",
            Self::Aic => "AIC",
            Self::Silhouette => "silhouette",
            Self::Wcss => "wcss",
            Self::Fixed(_) => "fixed",
        }
    }
}

/// Per-candidate scores recorded by cluster-count selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSeries {
    pub bic: Vec<(usize, f64)>,
    pub aic: Vec<(usize, f64)>,
    pub silhouette: Vec<(usize, f64)>,
    pub wcss: Vec<(usize, f64)>,
}

/// Fitted Gaussian mixture with full covariances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureModel {
    pub weights: Array1<f64>,
    pub means: Array2<f64>,
    pub covariances: Array3<f64>,
    pub log_likelihood: f64,
    pub bic: f64,
    pub aic: f64,
}

/// Fitted K-means partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidModel {
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squared distances
    pub inertia: f64,
}

/// Fitted ordinary least squares model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

/// Fitted model parameters, tagged by family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum FittedModel {
    Mixture(MixtureModel),
    Centroid(CentroidModel),
    Linear(LinearModel),
}

/// Result of a clustering fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    pub family: ClusterFamily,
    pub k: usize,
    pub method: Option<SelectionMethod>,
    pub feature_codes: Vec<String>,
    pub model: FittedModel,
    pub labels: Vec<usize>,
    pub scores: ScoreSeries,
}

impl ClusterModel {
    /// Number of rows per label, ordered by label
    #[must_use]
    pub fn sizes(&self) -> Vec<(usize, usize)> {
        let mut counts = std::collections::BTreeMap::new();
        for &label in &self.labels {
            *counts.entry(label).or_insert(0usize) += 1;
        }
        counts.into_iter().collect()
    }
}

/// Tail of a correlation significance test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestSide {
    #[default]
    TwoSided,
    Less,
    Greater,
}

impl FromStr for TestSide {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "two-sided" => Ok(Self::TwoSided),
            "less" => Ok(Self::Less),
            "greater" => Ok(Self::Greater),
            other => Err(AnalysisError::InvalidParameter(format!(
                "unknown test side: {other}"
            ))),
        }
    }
}

/// Significance tier of a correlation coefficient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Significance {
    /// p < 0.01
    Strong,
    /// 0.01 <= p < 0.05
    Weak,
}

impl Significance {
    #[must_use]
    pub fn from_p_value(p: f64) -> Option<Self> {
        if p < 0.01 {
            Some(Self::Strong)
        } else if p < 0.05 {
            Some(Self::Weak)
        } else {
            None
        }
    }

    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Strong => "**",
            Self::Weak => "*",
        }
    }
}

/// Pairwise Pearson coefficients and p-values
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationResult {
    pub codes: Vec<String>,
    pub names: Vec<String>,
    pub coefficients: Array2<f64>,
    pub p_values: Array2<f64>,
    pub test_side: TestSide,
    pub annotated: bool,
}

/// JSON keeps no NaN or infinity, so these are written as `"NaN"`, `"inf"`
/// and `"-inf"` strings and parsed back on load
pub mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    impl Repr {
        fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
            match self {
                Self::Number(v) => Ok(v),
                Self::Text(s) => s
                    .parse()
                    .map_err(|_| E::custom(format!("not a float: {s}"))),
            }
        }
    }

    /// # Errors
    /// Returns the serializer's error
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    /// # Errors
    /// Returns error on anything but a number or a float string
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Repr::deserialize(deserializer)?.into_f64()
    }

    pub mod option {
        use super::Repr;
        use serde::{Deserialize, Deserializer, Serializer};

        /// # Errors
        /// Returns the serializer's error
        pub fn serialize<S: Serializer>(
            value: &Option<f64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => super::serialize(v, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// # Errors
        /// Returns error on anything but null, a number or a float string
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<f64>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(Repr::into_f64::<D::Error>)
                .transpose()
        }
    }
}

/// One row of the regression coefficient table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub code: String,
    #[serde(with = "float_repr")]
    pub coef: f64,
    #[serde(with = "float_repr")]
    pub std_err: f64,
    #[serde(with = "float_repr")]
    pub t_value: f64,
    #[serde(with = "float_repr")]
    pub df: f64,
    #[serde(with = "float_repr")]
    pub p_value: f64,
    #[serde(with = "float_repr")]
    pub ci_lower: f64,
    #[serde(with = "float_repr")]
    pub ci_upper: f64,
    /// None for the intercept, whose raw column has no spread
    #[serde(with = "float_repr::option")]
    pub standardized: Option<f64>,
    #[serde(with = "float_repr")]
    pub vif: f64,
    #[serde(with = "float_repr")]
    pub tolerance: f64,
}

/// Model-level regression statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatistics {
    pub n_obs: usize,
    #[serde(with = "float_repr")]
    pub df_model: f64,
    #[serde(with = "float_repr")]
    pub df_resid: f64,
    #[serde(with = "float_repr")]
    pub r_squared: f64,
    #[serde(with = "float_repr")]
    pub adj_r_squared: f64,
    #[serde(with = "float_repr")]
    pub f_statistic: f64,
    #[serde(with = "float_repr")]
    pub f_p_value: f64,
    #[serde(with = "float_repr")]
    pub log_likelihood: f64,
    #[serde(with = "float_repr")]
    pub aic: f64,
    #[serde(with = "float_repr")]
    pub bic: f64,
    /// Root mean squared residual
    #[serde(with = "float_repr")]
    pub rmse: f64,
}

/// Residual diagnostics block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualDiagnostics {
    #[serde(with = "float_repr")]
    pub omnibus: f64,
    #[serde(with = "float_repr")]
    pub omnibus_p: f64,
    #[serde(with = "float_repr")]
    pub skew: f64,
    #[serde(with = "float_repr")]
    pub kurtosis: f64,
    #[serde(with = "float_repr")]
    pub durbin_watson: f64,
    #[serde(with = "float_repr")]
    pub jarque_bera: f64,
    #[serde(with = "float_repr")]
    pub jarque_bera_p: f64,
    #[serde(with = "float_repr")]
    pub condition_number: f64,
    #[serde(with = "float_repr")]
    pub df_resid: f64,
    #[serde(with = "float_repr")]
    pub ssr: f64,
}

/// One row of a sequential ANOVA table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnovaRow {
    pub term: String,
    #[serde(with = "float_repr")]
    pub df: f64,
    #[serde(with = "float_repr")]
    pub sum_sq: f64,
    #[serde(with = "float_repr")]
    pub mean_sq: f64,
    #[serde(with = "float_repr::option")]
    pub f_value: Option<f64>,
    #[serde(with = "float_repr::option")]
    pub p_value: Option<f64>,
}

/// Result of a regression fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionModel {
    pub dependent: String,
    pub independents: Vec<String>,
    pub model: LinearModel,
    pub coefficients: Vec<CoefficientRow>,
    pub statistics: ModelStatistics,
    pub residual_diagnostics: ResidualDiagnostics,
    pub anova: Vec<AnovaRow>,
    pub residuals: Vec<f64>,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag checked between expensive fits
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// # Errors
    /// Returns `Cancelled` once the flag is set
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_method_parse() {
        assert_eq!(SelectionMethod::parse("BIC", 2).expect("bic"), SelectionMethod::Bic);
        assert_eq!(
            SelectionMethod::parse("fixed", 4).expect("fixed"),
            SelectionMethod::Fixed(4)
        );
        assert!(matches!(
            SelectionMethod::parse("elbow", 2),
            Err(AnalysisError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_significance_tiers() {
        assert_eq!(Significance::from_p_value(0.001), Some(Significance::Strong));
        assert_eq!(Significance::from_p_value(0.01), Some(Significance::Weak));
        assert_eq!(Significance::from_p_value(0.049), Some(Significance::Weak));
        assert_eq!(Significance::from_p_value(0.05), None);
        assert_eq!(Significance::from_p_value(f64::NAN), None);
    }

    #[test]
    fn test_name_map_fallback() {
        let names: NameMap = [("A01", "Population")].into_iter().collect();
        assert_eq!(names.display("A01"), "Population");
        assert_eq!(names.display("B02"), "B02");
        assert_eq!(names.display(INTERCEPT_CODE), INTERCEPT_LABEL);
    }

    #[test]
    fn test_table_lookup() {
        let mut table = Table::new("t", vec!["a".into(), "b".into()]);
        table.push_row(vec!["x".into(), "y".into()], vec![Cell::Int(1), Cell::Float(2.5)]);
        assert_eq!(table.get(&["x", "y"], "b"), Some(&Cell::Float(2.5)));
        assert_eq!(table.get(&["x"], "b"), None);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.clone().cancel();
        assert!(matches!(token.check(), Err(AnalysisError::Cancelled)));
    }
}
