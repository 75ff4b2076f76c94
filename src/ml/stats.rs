use crate::structs::{
    AnalysisError, Cell, ColumnStats, FeatureMatrix, NameMap, Result, Table, TestSide,
    DESCRIPTIVE_HEADERS,
};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, StudentsT};

impl ColumnStats {
    /// Calculate statistics for a vector of values
    ///
    /// # Errors
    /// Returns error if values is empty
    #[allow(clippy::cast_precision_loss)]
    pub fn calculate(name: &str, values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(AnalysisError::NotInitialized(
                "Cannot calculate stats for empty data".into(),
            ));
        }

        let count = values.len();
        let mean = mean(values);
        let std_dev = sample_std(values);

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let min = sorted[0];
        let max = sorted[count - 1];

        let q1 = percentile(&sorted, 25.0);
        let median = percentile(&sorted, 50.0);
        let q3 = percentile(&sorted, 75.0);

        Ok(Self {
            name: name.to_string(),
            count,
            mean,
            std_dev,
            min,
            max,
            q1,
            median,
            q3,
        })
    }

    /// Values in header order, count first
    #[allow(clippy::cast_precision_loss)]
    fn ordered(&self) -> [f64; 8] {
        [
            self.count as f64,
            self.mean,
            self.std_dev,
            self.min,
            self.q1,
            self.median,
            self.q3,
            self.max,
        ]
    }
}

/// Per-column descriptive statistics, formatted to `precision` decimals
///
/// # Errors
/// Returns `NotInitialized` if the matrix is empty
pub fn describe(
    matrix: &FeatureMatrix,
    names: &NameMap,
    precision: usize,
    title: &str,
) -> Result<Table> {
    if matrix.is_empty() {
        return Err(AnalysisError::NotInitialized(
            "data must be initialized".into(),
        ));
    }

    let mut table = Table::new(
        title,
        DESCRIPTIVE_HEADERS.iter().map(|h| (*h).to_string()).collect(),
    );

    for (i, code) in matrix.codes.iter().enumerate() {
        let column = matrix.values.column(i).to_vec();
        let stats = ColumnStats::calculate(code, &column)?;
        let cells = stats
            .ordered()
            .iter()
            .map(|v| Cell::Text(format!("{v:.precision$}")))
            .collect();
        table.push_row(vec![names.display(&stats.name).to_string()], cells);
    }

    Ok(table)
}

/// Calculate percentile using linear interpolation
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let k = (p / 100.0) * (sorted.len() - 1) as f64;
    let f = k.floor() as usize;
    let c = k.ceil() as usize;

    if f == c {
        sorted[f]
    } else {
        let d0 = sorted[f] * (c as f64 - k);
        let d1 = sorted[c] * (k - f as f64);
        d0 + d1
    }
}

#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with an `n - 1` denominator
#[allow(clippy::cast_precision_loss)]
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|x| (x - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Pearson correlation coefficient; NaN when either input has no spread
///
/// # Errors
/// Returns error if vectors have different lengths or fewer than 2 values
pub fn pearson(x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() != y.len() {
        return Err(AnalysisError::InvalidParameter(
            "Vectors must have same length".into(),
        ));
    }
    if x.len() < 2 {
        return Err(AnalysisError::InvalidParameter(
            "Need at least 2 values for correlation".into(),
        ));
    }

    let mean_x = mean(x);
    let mean_y = mean(y);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;

    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return Ok(f64::NAN);
    }

    Ok((cov / denom).clamp(-1.0, 1.0))
}

/// P-value of a Pearson coefficient `r` over `n` observations
///
/// # Errors
/// Returns error if `n < 2` or the t distribution cannot be built
#[allow(clippy::cast_precision_loss)]
pub fn correlation_p_value(r: f64, n: usize, side: TestSide) -> Result<f64> {
    if n < 2 {
        return Err(AnalysisError::InvalidParameter(
            "Need at least 2 values for correlation".into(),
        ));
    }
    if r.is_nan() {
        return Ok(f64::NAN);
    }
    if n == 2 {
        return Ok(1.0);
    }

    if r.abs() >= 1.0 {
        let p = match side {
            TestSide::TwoSided => 0.0,
            TestSide::Greater => {
                if r > 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
            TestSide::Less => {
                if r < 0.0 {
                    0.0
                } else {
                    1.0
                }
            }
        };
        return Ok(p);
    }

    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();
    let dist = students_t(df)?;

    Ok(match side {
        TestSide::TwoSided => (2.0 * dist.sf(t.abs())).min(1.0),
        TestSide::Greater => dist.sf(t),
        TestSide::Less => dist.cdf(t),
    })
}

/// Standard Student t distribution with `df` degrees of freedom
///
/// # Errors
/// Returns `Numeric` if `df` is not positive
pub fn students_t(df: f64) -> Result<StudentsT> {
    StudentsT::new(0.0, 1.0, df)
        .map_err(|e| AnalysisError::Numeric(format!("Failed to create t-distribution: {e}")))
}

/// Upper tail of a chi-squared distribution with `df` degrees of freedom
///
/// # Errors
/// Returns `Numeric` if `df` is not positive
pub fn chi2_sf(x: f64, df: f64) -> Result<f64> {
    if x.is_nan() {
        return Ok(f64::NAN);
    }
    let dist = ChiSquared::new(df)
        .map_err(|e| AnalysisError::Numeric(format!("Failed to create chi-squared: {e}")))?;
    Ok(dist.sf(x))
}

/// Upper tail of an F distribution
///
/// NaN when the statistic is NaN or the numerator has no degrees of freedom,
/// as for a term spanned by earlier ones.
///
/// # Errors
/// Returns `Numeric` if the distribution cannot be built
pub fn f_sf(x: f64, df_num: f64, df_den: f64) -> Result<f64> {
    if x.is_nan() || df_num == 0.0 {
        return Ok(f64::NAN);
    }
    let dist = FisherSnedecor::new(df_num, df_den)
        .map_err(|e| AnalysisError::Numeric(format!("Failed to create F-distribution: {e}")))?;
    Ok(dist.sf(x))
}

/// Central moments m2, m3 and m4 with `n` denominators
#[allow(clippy::cast_precision_loss)]
fn central_moments(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    let m = mean(values);
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in values {
        let d = v - m;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    (m2 / n, m3 / n, m4 / n)
}

/// Biased sample skewness
pub fn skewness(values: &[f64]) -> f64 {
    let (m2, m3, _) = central_moments(values);
    m3 / m2.powf(1.5)
}

/// Biased sample kurtosis (normal distribution = 3)
pub fn kurtosis(values: &[f64]) -> f64 {
    let (m2, _, m4) = central_moments(values);
    m4 / (m2 * m2)
}

/// D'Agostino skewness z-score; NaN below 8 observations
#[allow(clippy::cast_precision_loss)]
fn skew_z(values: &[f64]) -> f64 {
    if values.len() < 8 {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let b2 = skewness(values);
    let y = b2 * (((n + 1.0) * (n + 3.0)) / (6.0 * (n - 2.0))).sqrt();
    let beta2 = (3.0 * (n * n + 27.0 * n - 70.0) * (n + 1.0) * (n + 3.0))
        / ((n - 2.0) * (n + 5.0) * (n + 7.0) * (n + 9.0));
    let w2 = -1.0 + (2.0 * (beta2 - 1.0)).sqrt();
    let delta = 1.0 / (0.5 * w2.ln()).sqrt();
    let alpha = (2.0 / (w2 - 1.0)).sqrt();
    let y = if y == 0.0 { 1.0 } else { y };
    delta * (y / alpha + ((y / alpha).powi(2) + 1.0).sqrt()).ln()
}

/// Anscombe-Glynn kurtosis z-score; NaN below 5 observations
#[allow(clippy::cast_precision_loss)]
fn kurtosis_z(values: &[f64]) -> f64 {
    if values.len() < 5 {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let b2 = kurtosis(values);
    let e = 3.0 * (n - 1.0) / (n + 1.0);
    let var_b2 = 24.0 * n * (n - 2.0) * (n - 3.0)
        / ((n + 1.0) * (n + 1.0) * (n + 3.0) * (n + 5.0));
    let x = (b2 - e) / var_b2.sqrt();
    let sqrt_beta1 = 6.0 * (n * n - 5.0 * n + 2.0) / ((n + 7.0) * (n + 9.0))
        * ((6.0 * (n + 3.0) * (n + 5.0)) / (n * (n - 2.0) * (n - 3.0))).sqrt();
    let a = 6.0
        + 8.0 / sqrt_beta1 * (2.0 / sqrt_beta1 + (1.0 + 4.0 / (sqrt_beta1 * sqrt_beta1)).sqrt());
    let term1 = 1.0 - 2.0 / (9.0 * a);
    let denom = 1.0 + x * (2.0 / (a - 4.0)).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    let term2 = denom.signum() * ((1.0 - 2.0 / a) / denom.abs()).cbrt();
    (term1 - term2) / (2.0 / (9.0 * a)).sqrt()
}

/// D'Agostino-Pearson omnibus normality test: statistic and p-value
///
/// # Errors
/// Returns `Numeric` if the chi-squared distribution cannot be built
pub fn omnibus(values: &[f64]) -> Result<(f64, f64)> {
    let k2 = skew_z(values).powi(2) + kurtosis_z(values).powi(2);
    Ok((k2, chi2_sf(k2, 2.0)?))
}

/// Jarque-Bera normality test: statistic and p-value
///
/// # Errors
/// Returns `Numeric` if the chi-squared distribution cannot be built
#[allow(clippy::cast_precision_loss)]
pub fn jarque_bera(values: &[f64]) -> Result<(f64, f64)> {
    let n = values.len() as f64;
    let s = skewness(values);
    let k = kurtosis(values);
    let jb = n / 6.0 * (s * s + (k - 3.0).powi(2) / 4.0);
    Ok((jb, chi2_sf(jb, 2.0)?))
}

/// Durbin-Watson statistic of a residual series
pub fn durbin_watson(residuals: &[f64]) -> f64 {
    let diff: f64 = residuals.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    let ss: f64 = residuals.iter().map(|r| r * r).sum();
    diff / ss
}
