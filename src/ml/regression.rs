//! Ordinary least squares of one indicator on the others

use crate::ml::linalg::{condition_number, least_squares};
use crate::ml::model::Predictor;
use crate::ml::output;
use crate::ml::stats::{
    describe, durbin_watson, f_sf, jarque_bera, kurtosis, omnibus, sample_std, skewness,
    students_t,
};
use crate::structs::{
    AnalysisError, AnovaRow, Artifact, CancelToken, Cell, CoefficientRow, FeatureMatrix,
    LinearModel, ModelStatistics, NameMap, RegressionModel, ReportItem, ResidualDiagnostics,
    Result, Table, ATTRIBUTE_HEADER, INTERCEPT_CODE, STD_ERROR_OF_ESTIMATE_LABEL, VALUE_HEADER,
};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const OVERVIEW_TITLE: &str = "모형요약표1";
pub const COEFFICIENT_TITLE: &str = "모형요약표2";
pub const RESIDUAL_TITLE: &str = "모형요약표3";
pub const ANOVA_TITLE: &str = "분산분석표";
pub const DESCRIPTIVE_TITLE: &str = "기술통계";

pub const COEFFICIENT_HEADERS: [&str; 11] = [
    "변수명",
    "비표준화계수(B)",
    "표준오차",
    "t",
    "자유도",
    "P>[t]",
    "[0.025",
    "0.975]",
    "표준화계수",
    "VIF",
    "공차",
];

pub const ANOVA_HEADERS: [&str; 5] = ["자유도", "제곱합", "평균제곱", "F-통계량", "PR(>F)"];

/// Row label of the ANOVA residual line
pub const RESIDUAL_TERM: &str = "Residual";

const DESCRIPTIVE_PRECISION: usize = 3;

/// Regression of one dependent indicator on every other indicator
#[derive(Debug)]
pub struct RegressionEngine {
    id: Uuid,
    matrix: FeatureMatrix,
    names: NameMap,
    dependent: String,
    independents: Vec<String>,
    model: Option<RegressionModel>,
    cancel: CancelToken,
}

impl RegressionEngine {
    /// # Errors
    /// Returns `InvalidParameter` if the matrix has columns but none of them
    /// is `dependent`
    pub fn new(matrix: FeatureMatrix, dependent: &str, names: NameMap) -> Result<Self> {
        if !matrix.codes.is_empty() && matrix.column_index(dependent).is_none() {
            return Err(AnalysisError::InvalidParameter(format!(
                "dependent variable '{dependent}' is not in the feature matrix"
            )));
        }

        let independents: Vec<String> = matrix
            .codes
            .iter()
            .filter(|c| *c != dependent)
            .cloned()
            .collect();

        let id = Uuid::new_v4();
        info!(
            engine = %id,
            dependent,
            independents = independents.len(),
            rows = matrix.n_samples(),
            "created regression engine"
        );

        Ok(Self {
            id,
            matrix,
            names,
            dependent: dependent.to_string(),
            independents,
            model: None,
            cancel: CancelToken::new(),
        })
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

    /// Fit `dependent ~ intercept + independents` by least squares
    ///
    /// # Errors
    /// Returns `NotInitialized` on an empty matrix, `InvalidParameter` with no
    /// independents or no residual degrees of freedom, `Numeric` if the
    /// decomposition fails
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(&mut self) -> Result<&RegressionModel> {
        if self.matrix.is_empty() {
            return Err(AnalysisError::NotInitialized(
                "data must be initialized".into(),
            ));
        }
        if self.independents.is_empty() {
            return Err(AnalysisError::InvalidParameter(
                "regression needs at least one independent variable".into(),
            ));
        }
        self.cancel.check()?;

        self.matrix.fill_missing_with_zero();

        let n = self.matrix.n_samples();
        let p = self.independents.len() + 1;
        if n <= p {
            return Err(AnalysisError::InvalidParameter(format!(
                "{n} observations cannot fit {p} parameters"
            )));
        }

        let y = self.dependent_column()?;
        let raw = self.independent_columns()?;
        let design = with_intercept(&raw);

        let fit = least_squares(design.view(), y.view())?;
        let ssr = fit.ssr();
        let residuals = fit.residuals.to_vec();

        if fit.rank < p {
            warn!(
                engine = %self.id,
                rank = fit.rank,
                parameters = p,
                "design is rank deficient; using the minimum-norm solution"
            );
        }

        let n_f = n as f64;
        let df_model = fit.rank.saturating_sub(1) as f64;
        let df_resid = (n - fit.rank) as f64;

        let y_mean = y.mean().unwrap_or(0.0);
        let tss = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>();
        let r_squared = 1.0 - ssr / tss;
        let adj_r_squared = 1.0 - (n_f - 1.0) / df_resid * (1.0 - r_squared);
        let mse_resid = ssr / df_resid;
        let f_statistic = ((tss - ssr) / df_model) / mse_resid;
        let log_likelihood =
            -n_f / 2.0 * (2.0 * PI).ln() - n_f / 2.0 * (ssr / n_f).ln() - n_f / 2.0;

        let statistics = ModelStatistics {
            n_obs: n,
            df_model,
            df_resid,
            r_squared,
            adj_r_squared,
            f_statistic,
            f_p_value: f_sf(f_statistic, df_model, df_resid)?,
            log_likelihood,
            aic: -2.0 * log_likelihood + 2.0 * fit.rank as f64,
            bic: -2.0 * log_likelihood + n_f.ln() * fit.rank as f64,
            rmse: (ssr / n_f).sqrt(),
        };

        let t_dist = students_t(df_resid)?;
        let q = t_dist.inverse_cdf(0.975);
        let vifs = variance_inflation(&design)?;

        let codes = std::iter::once(INTERCEPT_CODE.to_string()).chain(self.independents.clone());
        let coefficients = codes
            .enumerate()
            .map(|(j, code)| {
                let coef = fit.params[j];
                let std_err = (mse_resid * fit.xtx_inv[[j, j]]).sqrt();
                let t_value = coef / std_err;
                let standardized = (j > 0).then(|| {
                    let column = raw.column(j - 1).to_vec();
                    coef / sample_std(&column)
                });
                CoefficientRow {
                    code,
                    coef,
                    std_err,
                    t_value,
                    df: df_resid,
                    p_value: two_sided_p(&t_dist, t_value),
                    ci_lower: coef - q * std_err,
                    ci_upper: coef + q * std_err,
                    standardized,
                    vif: vifs[j],
                    tolerance: 1.0 / vifs[j],
                }
            })
            .collect();

        let (omnibus, omnibus_p) = omnibus(&residuals)?;
        let (jb, jb_p) = jarque_bera(&residuals)?;
        let residual_diagnostics = ResidualDiagnostics {
            omnibus,
            omnibus_p,
            skew: skewness(&residuals),
            kurtosis: kurtosis(&residuals),
            durbin_watson: durbin_watson(&residuals),
            jarque_bera: jb,
            jarque_bera_p: jb_p,
            condition_number: condition_number(design.view())?,
            df_resid,
            ssr,
        };

        let anova = self.sequential_anova(&design, &y, ssr, df_resid)?;

        let model = RegressionModel {
            dependent: self.dependent.clone(),
            independents: self.independents.clone(),
            model: LinearModel {
                intercept: fit.params[0],
                coefficients: fit.params.slice(ndarray::s![1..]).to_owned(),
            },
            coefficients,
            statistics,
            residual_diagnostics,
            anova,
            residuals,
        };

        info!(
            engine = %self.id,
            r_squared = model.statistics.r_squared,
            n_obs = n,
            "fitted regression model"
        );
        Ok(self.model.insert(model))
    }

    fn dependent_column(&self) -> Result<Array1<f64>> {
        self.matrix
            .column_index(&self.dependent)
            .and_then(|i| self.matrix.column(i))
            .ok_or_else(|| {
                AnalysisError::InvalidParameter(format!(
                    "dependent variable '{}' is not in the feature matrix",
                    self.dependent
                ))
            })
    }

    fn independent_columns(&self) -> Result<Array2<f64>> {
        let indices = self
            .independents
            .iter()
            .map(|code| {
                self.matrix.column_index(code).ok_or_else(|| {
                    AnalysisError::InvalidParameter(format!("unknown indicator '{code}'"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.matrix.values.select(Axis(1), &indices))
    }

    /// Type I sums of squares, adding independents in formula order
    #[allow(clippy::cast_precision_loss)]
    fn sequential_anova(
        &self,
        design: &Array2<f64>,
        y: &Array1<f64>,
        ssr_full: f64,
        df_resid: f64,
    ) -> Result<Vec<AnovaRow>> {
        let mse_resid = ssr_full / df_resid;
        let mut rows = Vec::with_capacity(self.independents.len() + 1);

        let y_mean = y.mean().unwrap_or(0.0);
        let mut previous = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>();
        let mut previous_rank = 1;

        for (j, code) in self.independents.iter().enumerate() {
            let columns: Vec<usize> = (0..=j + 1).collect();
            let sub = least_squares(design.select(Axis(1), &columns).view(), y.view())?;
            let ssr = sub.ssr();
            // a column already spanned by earlier terms adds no degrees of freedom
            let df = sub.rank.saturating_sub(previous_rank) as f64;
            let sum_sq = previous - ssr;
            let (mean_sq, f_value) = if df > 0.0 {
                let mean_sq = sum_sq / df;
                (mean_sq, mean_sq / mse_resid)
            } else {
                (f64::NAN, f64::NAN)
            };
            rows.push(AnovaRow {
                term: code.clone(),
                df,
                sum_sq,
                mean_sq,
                f_value: Some(f_value),
                p_value: Some(f_sf(f_value, df, df_resid)?),
            });
            previous = ssr;
            previous_rank = sub.rank;
        }

        rows.push(AnovaRow {
            term: RESIDUAL_TERM.to_string(),
            df: df_resid,
            sum_sq: ssr_full,
            mean_sq: mse_resid,
            f_value: None,
            p_value: None,
        });
        debug!(engine = %self.id, terms = rows.len(), "computed anova");
        Ok(rows)
    }

    /// # Errors
    /// Returns `NotFitted` before `fit`
    pub fn model(&self) -> Result<&RegressionModel> {
        self.model
            .as_ref()
            .ok_or_else(|| AnalysisError::NotFitted("model must be fitted first".into()))
    }

    /// Model-level statistics as attribute/value pairs
    ///
    /// # Errors
    /// Returns `NotFitted` before `fit`
    pub fn model_summary_overview(&self) -> Result<Table> {
        let model = self.model()?;
        let s = &model.statistics;
        let rows = [
            ("Dep. Variable", Cell::Text(self.names.display(&model.dependent).to_string())),
            ("Model", Cell::Text("OLS".into())),
            ("Method", Cell::Text("Least Squares".into())),
            ("No. Observations", Cell::Int(to_i64(s.n_obs))),
            ("Df Residuals", Cell::Float(s.df_resid)),
            ("Df Model", Cell::Float(s.df_model)),
            ("Covariance Type", Cell::Text("nonrobust".into())),
            ("R-squared", Cell::Float(s.r_squared)),
            ("Adj. R-squared", Cell::Float(s.adj_r_squared)),
            ("F-statistic", Cell::Float(s.f_statistic)),
            ("Prob (F-statistic)", Cell::Float(s.f_p_value)),
            ("Log-Likelihood", Cell::Float(s.log_likelihood)),
            ("AIC", Cell::Float(s.aic)),
            ("BIC", Cell::Float(s.bic)),
            (STD_ERROR_OF_ESTIMATE_LABEL, Cell::Float(s.rmse)),
        ];
        Ok(attribute_table(OVERVIEW_TITLE, rows))
    }

    /// Estimates, inference, standardized coefficients and collinearity
    ///
    /// # Errors
    /// Returns `NotFitted` before `fit`
    pub fn coefficient_table(&self) -> Result<Table> {
        let model = self.model()?;
        let mut table = Table::new(
            COEFFICIENT_TITLE,
            COEFFICIENT_HEADERS[1..]
                .iter()
                .map(|h| (*h).to_string())
                .collect(),
        );
        for row in &model.coefficients {
            table.push_row(
                vec![self.names.display(&row.code).to_string()],
                vec![
                    Cell::Float(row.coef),
                    Cell::Float(row.std_err),
                    Cell::Float(row.t_value),
                    Cell::Float(row.df),
                    Cell::Float(row.p_value),
                    Cell::Float(row.ci_lower),
                    Cell::Float(row.ci_upper),
                    row.standardized.map_or(Cell::Empty, Cell::Float),
                    Cell::Float(row.vif),
                    Cell::Float(row.tolerance),
                ],
            );
        }
        Ok(table)
    }

    /// Residual normality, autocorrelation and conditioning
    ///
    /// # Errors
    /// Returns `NotFitted` before `fit`
    pub fn residual_table(&self) -> Result<Table> {
        let d = &self.model()?.residual_diagnostics;
        let rows = [
            ("Omnibus", Cell::Float(d.omnibus)),
            ("Prob(Omnibus)", Cell::Float(d.omnibus_p)),
            ("Skew", Cell::Float(d.skew)),
            ("Kurtosis", Cell::Float(d.kurtosis)),
            ("Durbin-Watson", Cell::Float(d.durbin_watson)),
            ("Jarque-Bera (JB)", Cell::Float(d.jarque_bera)),
            ("Prob(JB)", Cell::Float(d.jarque_bera_p)),
            ("Cond. No.", Cell::Float(d.condition_number)),
            ("Df Residuals", Cell::Float(d.df_resid)),
            ("Sum of Squared Residuals", Cell::Float(d.ssr)),
        ];
        Ok(attribute_table(RESIDUAL_TITLE, rows))
    }

    /// # Errors
    /// Returns `NotFitted` before `fit`
    pub fn anova_table(&self) -> Result<Table> {
        let model = self.model()?;
        let mut table = Table::new(
            ANOVA_TITLE,
            ANOVA_HEADERS.iter().map(|h| (*h).to_string()).collect(),
        );
        for row in &model.anova {
            table.push_row(
                vec![self.names.display(&row.term).to_string()],
                vec![
                    Cell::Float(row.df),
                    Cell::Float(row.sum_sq),
                    Cell::Float(row.mean_sq),
                    row.f_value.map_or(Cell::Empty, Cell::Float),
                    row.p_value.map_or(Cell::Empty, Cell::Float),
                ],
            );
        }
        Ok(table)
    }

    /// # Errors
    /// Returns `NotInitialized` on an empty matrix
    pub fn descriptive_statistics(&self) -> Result<Table> {
        describe(
            &self.matrix,
            &self.names,
            DESCRIPTIVE_PRECISION,
            DESCRIPTIVE_TITLE,
        )
    }

    /// # Errors
    /// Returns `NotFitted` before `fit`
    pub fn residuals(&self) -> Result<&[f64]> {
        Ok(&self.model()?.residuals)
    }

    /// Predicted dependent values for rows of independents, in formula order
    ///
    /// # Errors
    /// Returns `NotFitted` before `fit`, `InvalidParameter` on a column mismatch
    pub fn predict(&self, rows: ArrayView2<'_, f64>) -> Result<Vec<f64>> {
        self.model()?.model.predict(rows)
    }

    /// Write the fitted model to `<base_dir>/<engine id>/model.json`
    ///
    /// # Errors
    /// Returns `NotFitted` before `fit`, or an IO/JSON error
    pub fn save_model(&self, base_dir: &Path) -> Result<PathBuf> {
        let model = self.model()?;
        let dir = output::instance_dir(base_dir, self.id)?;
        output::write_model(&dir, model)
    }

    /// The three summary tables, ANOVA and descriptive statistics
    ///
    /// # Errors
    /// Returns `NotFitted` before `fit`
    pub fn report(&self) -> Result<Vec<ReportItem>> {
        Ok(vec![
            ReportItem::new(OVERVIEW_TITLE, Artifact::Table(self.model_summary_overview()?)),
            ReportItem::new(COEFFICIENT_TITLE, Artifact::Table(self.coefficient_table()?)),
            ReportItem::new(RESIDUAL_TITLE, Artifact::Table(self.residual_table()?)),
            ReportItem::new(ANOVA_TITLE, Artifact::Table(self.anova_table()?)),
            ReportItem::new(DESCRIPTIVE_TITLE, Artifact::Table(self.descriptive_statistics()?)),
        ])
    }
}

fn with_intercept(raw: &Array2<f64>) -> Array2<f64> {
    let (n, m) = raw.dim();
    Array2::from_shape_fn((n, m + 1), |(r, c)| if c == 0 { 1.0 } else { raw[[r, c - 1]] })
}

/// VIF of every design column against the remaining columns
///
/// The auxiliary R² is centered when the remaining columns include a
/// constant and uncentered otherwise.
fn variance_inflation(design: &Array2<f64>) -> Result<Vec<f64>> {
    let p = design.ncols();
    (0..p)
        .map(|i| {
            let others: Vec<usize> = (0..p).filter(|&j| j != i).collect();
            let exog = design.select(Axis(1), &others);
            let target = design.column(i);
            let ssr = least_squares(exog.view(), target)?.ssr();

            let has_constant = exog.columns().into_iter().any(|c| {
                let first = c[0];
                first != 0.0 && c.iter().all(|&v| v == first)
            });
            let total = if has_constant {
                let mean = target.mean().unwrap_or(0.0);
                target.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            } else {
                target.dot(&target)
            };
            let r_squared = 1.0 - ssr / total;
            Ok(1.0 / (1.0 - r_squared))
        })
        .collect()
}

fn two_sided_p(t_dist: &StudentsT, t_value: f64) -> f64 {
    if t_value.is_nan() {
        return f64::NAN;
    }
    (2.0 * t_dist.sf(t_value.abs())).min(1.0)
}

fn attribute_table<const N: usize>(title: &str, rows: [(&str, Cell); N]) -> Table {
    let mut table = Table::new(
        title,
        vec![ATTRIBUTE_HEADER.to_string(), VALUE_HEADER.to_string()],
    );
    for (i, (name, value)) in rows.into_iter().enumerate() {
        table.push_row(vec![i.to_string()], vec![Cell::Text(name.to_string()), value]);
    }
    table
}

fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{RowKey, INTERCEPT_LABEL};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::TempDir;

    fn matrix(codes: &[&str], values: Array2<f64>) -> FeatureMatrix {
        let keys = (0..values.nrows())
            .map(|i| RowKey::new(format!("r{i}"), "2021"))
            .collect();
        FeatureMatrix::new(keys, codes.iter().map(|c| (*c).to_string()).collect(), values)
            .expect("matrix")
    }

    fn simple() -> RegressionEngine {
        let values = array![[1.0, 2.0], [2.0, 4.0], [3.0, 5.0], [4.0, 4.0], [5.0, 5.0]];
        let names: NameMap = [("X", "소득"), ("Y", "소비")].into_iter().collect();
        RegressionEngine::new(matrix(&["X", "Y"], values), "Y", names).expect("engine")
    }

    fn two_predictors() -> RegressionEngine {
        // x1 and x2 are centered and orthogonal
        let values = array![
            [-1.0, -1.0, 1.2],
            [-1.0, 1.0, 0.1],
            [1.0, -1.0, 5.3],
            [1.0, 1.0, 3.9],
            [-1.0, -1.0, 0.8],
            [-1.0, 1.0, -0.2],
            [1.0, -1.0, 4.6],
            [1.0, 1.0, 4.1],
        ];
        RegressionEngine::new(matrix(&["A", "B", "Y"], values), "Y", NameMap::new())
            .expect("engine")
    }

    #[test]
    fn test_simple_regression_statistics() {
        let mut engine = simple();
        let model = engine.fit().expect("fit");

        // y = 2.2 + 0.6 x, SSR = 2.4, TSS = 6
        assert_abs_diff_eq!(model.model.intercept, 2.2, epsilon = 1e-9);
        assert_abs_diff_eq!(model.model.coefficients[0], 0.6, epsilon = 1e-9);
        let s = &model.statistics;
        assert_abs_diff_eq!(s.r_squared, 0.6, epsilon = 1e-9);
        assert_abs_diff_eq!(s.adj_r_squared, 1.0 - 4.0 / 3.0 * 0.4, epsilon = 1e-9);
        assert_abs_diff_eq!(s.f_statistic, 4.5, epsilon = 1e-9);
        assert_abs_diff_eq!(s.df_resid, 3.0);
        assert_abs_diff_eq!(s.rmse, (2.4_f64 / 5.0).sqrt(), epsilon = 1e-9);

        let slope = &model.coefficients[1];
        assert_abs_diff_eq!(slope.std_err, 0.08_f64.sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(slope.t_value, 0.6 / 0.08_f64.sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(slope.p_value, s.f_p_value, epsilon = 1e-9);
        assert!(slope.ci_lower < 0.6 && slope.ci_upper > 0.6);
    }

    #[test]
    fn test_residuals_sum_to_zero() {
        let mut engine = two_predictors();
        engine.fit().expect("fit");
        let total: f64 = engine.residuals().expect("residuals").iter().sum();
        assert_abs_diff_eq!(total, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_standardized_coefficient() {
        let mut engine = simple();
        let model = engine.fit().expect("fit");
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let expected = model.coefficients[1].coef / sample_std(&x);
        assert_abs_diff_eq!(
            model.coefficients[1].standardized.expect("standardized"),
            expected,
            epsilon = 1e-12
        );
        assert!(model.coefficients[0].standardized.is_none());
    }

    #[test]
    fn test_vif_of_orthogonal_columns() {
        let mut engine = two_predictors();
        let model = engine.fit().expect("fit");
        for row in &model.coefficients {
            assert_abs_diff_eq!(row.vif, 1.0, epsilon = 1e-9);
            assert_abs_diff_eq!(row.tolerance, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_anova_decomposition() {
        let mut engine = simple();
        engine.fit().expect("fit");
        let model = engine.model().expect("model");

        assert_eq!(model.anova.len(), 2);
        assert_abs_diff_eq!(model.anova[0].sum_sq, 3.6, epsilon = 1e-9);
        assert_abs_diff_eq!(model.anova[0].f_value.expect("f"), 4.5, epsilon = 1e-9);
        assert_abs_diff_eq!(model.anova[1].sum_sq, 2.4, epsilon = 1e-9);
        assert!(model.anova[1].f_value.is_none());

        let table = engine.anova_table().expect("anova");
        assert_eq!(table.columns, ANOVA_HEADERS.to_vec());
        assert_eq!(table.rows[0].index, vec!["소득"]);
        assert_eq!(table.get(&[RESIDUAL_TERM], "F-통계량"), Some(&Cell::Empty));
    }

    #[test]
    fn test_summary_tables() {
        let mut engine = simple();
        engine.fit().expect("fit");

        let overview = engine.model_summary_overview().expect("overview");
        assert_eq!(overview.columns, vec![ATTRIBUTE_HEADER, VALUE_HEADER]);
        assert_eq!(overview.rows[0].cells[1], Cell::Text("소비".into()));
        let last = overview.rows.last().expect("row");
        assert_eq!(last.cells[0], Cell::Text(STD_ERROR_OF_ESTIMATE_LABEL.into()));

        let coefficients = engine.coefficient_table().expect("coefficients");
        assert_eq!(coefficients.columns.len(), COEFFICIENT_HEADERS.len() - 1);
        assert_eq!(coefficients.rows[0].index, vec![INTERCEPT_LABEL]);
        assert_eq!(coefficients.get(&[INTERCEPT_LABEL], "표준화계수"), Some(&Cell::Empty));

        let residual = engine.residual_table().expect("residual");
        assert_eq!(residual.n_rows(), 10);
        assert_eq!(engine.report().expect("report").len(), 5);
    }

    #[test]
    fn test_predict() {
        let mut engine = simple();
        engine.fit().expect("fit");
        let out = engine.predict(array![[10.0]].view()).expect("predict");
        assert_abs_diff_eq!(out[0], 8.2, epsilon = 1e-9);
    }

    #[test]
    fn test_not_fitted() {
        let engine = simple();
        assert!(matches!(engine.coefficient_table(), Err(AnalysisError::NotFitted(_))));
        assert!(matches!(engine.anova_table(), Err(AnalysisError::NotFitted(_))));
        assert!(matches!(engine.residual_table(), Err(AnalysisError::NotFitted(_))));
        assert!(matches!(
            engine.model_summary_overview(),
            Err(AnalysisError::NotFitted(_))
        ));
        assert!(engine.descriptive_statistics().is_ok());
    }

    #[test]
    fn test_missing_dependent() {
        let values = array![[1.0, 2.0], [2.0, 3.0]];
        let result = RegressionEngine::new(matrix(&["X", "Y"], values), "Z", NameMap::new());
        assert!(matches!(result, Err(AnalysisError::InvalidParameter(_))));
    }

    #[test]
    fn test_empty_matrix() {
        let empty = matrix(&["X", "Y"], Array2::zeros((0, 2)));
        let mut engine = RegressionEngine::new(empty, "Y", NameMap::new()).expect("engine");
        assert!(matches!(engine.fit(), Err(AnalysisError::NotInitialized(_))));

        let mut engine =
            RegressionEngine::new(FeatureMatrix::empty(), "Y", NameMap::new()).expect("engine");
        assert!(matches!(engine.fit(), Err(AnalysisError::NotInitialized(_))));
    }

    #[test]
    fn test_too_few_rows() {
        let values = array![[1.0, 2.0, 3.0], [2.0, 1.0, 4.0], [3.0, 5.0, 1.0]];
        let mut engine =
            RegressionEngine::new(matrix(&["A", "B", "Y"], values), "Y", NameMap::new())
                .expect("engine");
        assert!(matches!(engine.fit(), Err(AnalysisError::InvalidParameter(_))));
    }

    #[test]
    fn test_save_model_keeps_undefined_diagnostics() {
        // five residuals leave the omnibus statistic undefined
        let dir = TempDir::new().expect("temp dir");
        let mut engine = simple();
        let fitted = engine.fit().expect("fit").clone();
        assert!(fitted.residual_diagnostics.omnibus.is_nan());

        let path = engine.save_model(dir.path()).expect("save");
        let restored: RegressionModel = output::read_model(&path).expect("read");

        assert_eq!(restored.dependent, "Y");
        assert_eq!(restored.independents, vec!["X"]);
        assert!(restored.residual_diagnostics.omnibus.is_nan());
        assert!(restored.residual_diagnostics.omnibus_p.is_nan());
        assert_abs_diff_eq!(restored.model.intercept, 2.2, epsilon = 1e-9);
        assert_abs_diff_eq!(
            restored.statistics.r_squared,
            fitted.statistics.r_squared,
            epsilon = 1e-12
        );
        assert!(restored.coefficients[0].standardized.is_none());
        assert_abs_diff_eq!(
            restored.coefficients[1].standardized.expect("standardized"),
            fitted.coefficients[1].standardized.expect("standardized"),
            epsilon = 1e-12
        );
        assert!(restored.anova[1].f_value.is_none());
    }

    #[test]
    fn test_save_model() {
        let dir = TempDir::new().expect("temp dir");
        let mut engine = two_predictors();
        engine.fit().expect("fit");
        let path = engine.save_model(dir.path()).expect("save");
        let restored: RegressionModel = output::read_model(&path).expect("read");
        assert_eq!(restored.dependent, "Y");
        assert_eq!(restored.coefficients.len(), 3);
        assert_eq!(restored.independents, vec!["A", "B"]);
        assert!(restored.residual_diagnostics.omnibus.is_finite());
    }

    #[test]
    fn test_all_missing_independent() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [2.0, 4.0, 5.0, 4.0, 5.0, 7.0];
        let values = Array2::from_shape_fn((6, 3), |(r, c)| match c {
            0 => a[r],
            1 => f64::NAN,
            _ => y[r],
        });
        let mut engine =
            RegressionEngine::new(matrix(&["A", "B", "Y"], values), "Y", NameMap::new())
                .expect("engine");
        let model = engine.fit().expect("fit with an empty indicator").clone();

        let reduced = Array2::from_shape_fn((6, 2), |(r, c)| if c == 0 { a[r] } else { y[r] });
        let mut baseline =
            RegressionEngine::new(matrix(&["A", "Y"], reduced), "Y", NameMap::new())
                .expect("engine");
        let expected = baseline.fit().expect("fit");

        assert_abs_diff_eq!(model.model.intercept, expected.model.intercept, epsilon = 1e-9);
        assert_abs_diff_eq!(
            model.coefficients[1].coef,
            expected.coefficients[1].coef,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            model.coefficients[1].std_err,
            expected.coefficients[1].std_err,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(model.statistics.df_model, 1.0);
        assert_abs_diff_eq!(model.statistics.df_resid, 4.0);
        assert_abs_diff_eq!(
            model.statistics.r_squared,
            expected.statistics.r_squared,
            epsilon = 1e-9
        );

        let empty = &model.coefficients[2];
        assert_abs_diff_eq!(empty.coef, 0.0, epsilon = 1e-12);
        assert!(empty.t_value.is_nan());
        assert!(empty.p_value.is_nan());
        assert!(empty.vif.is_nan());
        assert_abs_diff_eq!(model.coefficients[1].vif, 1.0, epsilon = 1e-9);

        assert_abs_diff_eq!(model.anova[0].df, 1.0);
        assert_abs_diff_eq!(model.anova[1].df, 0.0);
        assert!(model.anova[1].f_value.expect("f").is_nan());
        assert_abs_diff_eq!(model.anova[2].df, 4.0);
    }
}
