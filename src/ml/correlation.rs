//! Pairwise Pearson correlation with significance tiers

use crate::ml::stats::{correlation_p_value, describe, pearson};
use crate::structs::{
    AnalysisError, Artifact, Cell, Chart, CorrelationResult, FeatureMatrix, NameMap, ReportItem,
    Result, Significance, Table, TestSide,
};
use ndarray::Array2;
use tracing::{debug, info};
use uuid::Uuid;

pub const MATRIX_TITLE: &str = "상관계수매트릭스";
pub const HEATMAP_TITLE: &str = "상관계수 히트맵";
pub const PAIR_PLOT_TITLE: &str = "산점도행렬";
pub const DESCRIPTIVE_TITLE: &str = "기술통계";

/// Second-level row labels of the correlation table
pub const COEFFICIENT_ROW: &str = "pearsonr";
pub const P_VALUE_ROW: &str = "pvalue";

const DESCRIPTIVE_PRECISION: usize = 0;

/// Correlation analysis over one feature matrix
#[derive(Debug)]
pub struct CorrelationEngine {
    id: Uuid,
    matrix: FeatureMatrix,
    names: NameMap,
}

impl CorrelationEngine {
    /// Takes ownership of the matrix and zero-fills its missing cells
    #[must_use]
    pub fn new(mut matrix: FeatureMatrix, names: NameMap) -> Self {
        matrix.fill_missing_with_zero();
        let id = Uuid::new_v4();
        info!(
            engine = %id,
            rows = matrix.n_samples(),
            features = matrix.n_features(),
            "created correlation engine"
        );
        Self { id, matrix, names }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn ensure_data(&self) -> Result<()> {
        if self.matrix.is_empty() {
            return Err(AnalysisError::NotInitialized(
                "data must be initialized".into(),
            ));
        }
        Ok(())
    }

    fn display_names(&self) -> Vec<String> {
        self.matrix
            .codes
            .iter()
            .map(|c| self.names.display(c).to_string())
            .collect()
    }

    /// Coefficient and p-value for every ordered pair of columns
    ///
    /// The diagonal is fixed at a coefficient of 1 and its p-value is that of
    /// a perfect positive correlation under `side`. A column without spread
    /// correlates as NaN with every other column.
    ///
    /// # Errors
    /// Returns `NotInitialized` on an empty matrix and `InvalidParameter` with
    /// fewer than two rows
    pub fn correlation_matrix(&self, side: TestSide, annotate: bool) -> Result<CorrelationResult> {
        self.ensure_data()?;

        let n = self.matrix.n_features();
        let rows = self.matrix.n_samples();
        let columns: Vec<Vec<f64>> = self
            .matrix
            .values
            .columns()
            .into_iter()
            .map(|c| c.to_vec())
            .collect();

        let mut coefficients = Array2::from_elem((n, n), f64::NAN);
        let mut p_values = Array2::from_elem((n, n), f64::NAN);

        for i in 0..n {
            coefficients[[i, i]] = 1.0;
            p_values[[i, i]] = correlation_p_value(1.0, rows, side)?;
            for j in (i + 1)..n {
                let r = pearson(&columns[i], &columns[j])?;
                let p = correlation_p_value(r, rows, side)?;
                coefficients[[i, j]] = r;
                coefficients[[j, i]] = r;
                p_values[[i, j]] = p;
                p_values[[j, i]] = p;
            }
        }

        debug!(engine = %self.id, side = ?side, annotate, "computed correlation matrix");

        Ok(CorrelationResult {
            codes: self.matrix.codes.clone(),
            names: self.display_names(),
            coefficients,
            p_values,
            test_side: side,
            annotated: annotate,
        })
    }

    /// Count, mean, spread and quartiles per column, rounded to integers
    ///
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
    /// Returns `NotInitialized` on an empty matrix
    pub fn heatmap(&self, result: &CorrelationResult) -> Result<Chart> {
        self.ensure_data()?;
        Ok(Chart::Heatmap {
            title: HEATMAP_TITLE.into(),
            labels: result.names.clone(),
            values: result
                .coefficients
                .rows()
                .into_iter()
                .map(|r| r.to_vec())
                .collect(),
        })
    }

    /// Scatter matrix over every pair of columns
    ///
    /// # Errors
    /// Returns `NotInitialized` on an empty matrix
    pub fn pair_plot(&self) -> Result<Chart> {
        self.ensure_data()?;
        Ok(Chart::ScatterMatrix {
            title: PAIR_PLOT_TITLE.into(),
            labels: self.display_names(),
            columns: self
                .matrix
                .values
                .columns()
                .into_iter()
                .map(|c| c.to_vec())
                .collect(),
        })
    }

    /// Scatter matrix, correlation table, heatmap and descriptive statistics
    ///
    /// # Errors
    /// Returns `NotInitialized` on an empty matrix
    pub fn report(&self, side: TestSide, annotate: bool) -> Result<Vec<ReportItem>> {
        let result = self.correlation_matrix(side, annotate)?;
        Ok(vec![
            ReportItem::new(PAIR_PLOT_TITLE, Artifact::Chart(self.pair_plot()?)),
            ReportItem::new(MATRIX_TITLE, Artifact::Table(result.to_table())),
            ReportItem::new(HEATMAP_TITLE, Artifact::Chart(self.heatmap(&result)?)),
            ReportItem::new(DESCRIPTIVE_TITLE, Artifact::Table(self.descriptive_statistics()?)),
        ])
    }
}

impl CorrelationResult {
    /// Coefficient between two indicator codes
    #[must_use]
    pub fn coefficient(&self, a: &str, b: &str) -> Option<f64> {
        let (i, j) = self.position(a, b)?;
        Some(self.coefficients[[i, j]])
    }

    #[must_use]
    pub fn p_value(&self, a: &str, b: &str) -> Option<f64> {
        let (i, j) = self.position(a, b)?;
        Some(self.p_values[[i, j]])
    }

    fn position(&self, a: &str, b: &str) -> Option<(usize, usize)> {
        let i = self.codes.iter().position(|c| c == a)?;
        let j = self.codes.iter().position(|c| c == b)?;
        Some((i, j))
    }

    /// Tagged text of a coefficient, if annotation is on and it is significant
    #[must_use]
    pub fn annotation(&self, i: usize, j: usize) -> Option<String> {
        if !self.annotated {
            return None;
        }
        let tier = Significance::from_p_value(self.p_values[[i, j]])?;
        Some(format!("{:.4}{}", self.coefficients[[i, j]], tier.tag()))
    }

    /// Two rows per column, coefficient then p-value, keyed by display name
    #[must_use]
    pub fn to_table(&self) -> Table {
        let mut table = Table::new(MATRIX_TITLE, self.names.clone());
        for (i, name) in self.names.iter().enumerate() {
            let coefficients = (0..self.names.len())
                .map(|j| {
                    self.annotation(i, j)
                        .map_or(Cell::Float(self.coefficients[[i, j]]), Cell::Text)
                })
                .collect();
            let p_values = self
                .p_values
                .row(i)
                .iter()
                .map(|&p| Cell::Float(p))
                .collect();
            table.push_row(vec![name.clone(), COEFFICIENT_ROW.into()], coefficients);
            table.push_row(vec![name.clone(), P_VALUE_ROW.into()], p_values);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::RowKey;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn engine() -> CorrelationEngine {
        let values = array![
            [1.0, 2.1, 5.0, 3.0],
            [2.0, 3.9, 1.0, 3.0],
            [3.0, 6.2, 4.0, 3.0],
            [4.0, 8.1, 2.0, 3.0],
            [5.0, 9.8, 5.0, 3.0],
            [6.0, 12.2, 1.0, 3.0],
            [7.0, 13.9, 3.0, 3.0],
            [8.0, 16.1, f64::NAN, 3.0],
        ];
        let keys = (0..8)
            .map(|i| RowKey::new("서울", format!("{}", 2015 + i)))
            .collect();
        let matrix = FeatureMatrix::new(
            keys,
            vec!["A".into(), "B".into(), "C".into(), "D".into()],
            values,
        )
        .expect("matrix");
        let names: NameMap = [("A", "인구"), ("B", "가구")].into_iter().collect();
        CorrelationEngine::new(matrix, names)
    }

    #[test]
    fn test_matrix_is_symmetric() {
        let result = engine()
            .correlation_matrix(TestSide::TwoSided, true)
            .expect("correlate");

        for i in 0..4 {
            assert_abs_diff_eq!(result.coefficients[[i, i]], 1.0);
        }
        // D has no spread, so its off-diagonal cells are NaN
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(
                    result.coefficients[[i, j]],
                    result.coefficients[[j, i]],
                    epsilon = 1e-12
                );
                assert_abs_diff_eq!(
                    result.p_values[[i, j]],
                    result.p_values[[j, i]],
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_tagged_iff_significant() {
        let result = engine()
            .correlation_matrix(TestSide::TwoSided, true)
            .expect("correlate");

        for i in 0..4 {
            for j in 0..4 {
                let p = result.p_values[[i, j]];
                assert_eq!(result.annotation(i, j).is_some(), p < 0.05, "cell ({i}, {j})");
            }
        }

        let tagged = result.annotation(0, 1).expect("tagged");
        assert!(tagged.ends_with("**"));
    }

    #[test]
    fn test_no_annotation_when_disabled() {
        let result = engine()
            .correlation_matrix(TestSide::TwoSided, false)
            .expect("correlate");
        assert!(result.annotation(0, 1).is_none());
        let table = result.to_table();
        assert!(matches!(
            table.get(&["인구", COEFFICIENT_ROW], "가구"),
            Some(Cell::Float(_))
        ));
    }

    #[test]
    fn test_constant_column_is_nan() {
        let result = engine()
            .correlation_matrix(TestSide::TwoSided, true)
            .expect("correlate");
        assert!(result.coefficient("A", "D").expect("pair").is_nan());
        assert!(result.p_value("D", "C").expect("pair").is_nan());
        assert!(result.annotation(0, 3).is_none());
    }

    #[test]
    fn test_one_sided_tails() {
        let engine = engine();
        let greater = engine
            .correlation_matrix(TestSide::Greater, false)
            .expect("greater");
        let less = engine.correlation_matrix(TestSide::Less, false).expect("less");

        assert_abs_diff_eq!(
            greater.p_value("A", "C").expect("pair") + less.p_value("A", "C").expect("pair"),
            1.0,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(less.p_value("A", "A").expect("diag"), 1.0);
    }

    #[test]
    fn test_table_layout() {
        let table = engine()
            .correlation_matrix(TestSide::TwoSided, true)
            .expect("correlate")
            .to_table();

        assert_eq!(table.title, MATRIX_TITLE);
        assert_eq!(table.columns, vec!["인구", "가구", "C", "D"]);
        assert_eq!(table.n_rows(), 8);
        assert_eq!(table.rows[0].index, vec!["인구", COEFFICIENT_ROW]);
        assert_eq!(table.rows[1].index, vec!["인구", P_VALUE_ROW]);
    }

    #[test]
    fn test_descriptive_statistics() {
        let table = engine().descriptive_statistics().expect("describe");
        assert_eq!(table.n_rows(), 4);
        assert_eq!(table.get(&["인구"], "빈도"), Some(&Cell::Text("8".into())));
        assert_eq!(table.get(&["D"], "표준편차"), Some(&Cell::Text("0".into())));
    }

    #[test]
    fn test_charts() {
        let engine = engine();
        let result = engine
            .correlation_matrix(TestSide::TwoSided, false)
            .expect("correlate");
        match engine.heatmap(&result).expect("heatmap") {
            Chart::Heatmap { labels, values, .. } => {
                assert_eq!(labels[1], "가구");
                assert_eq!(values.len(), 4);
            }
            other => panic!("unexpected chart: {other:?}"),
        }
        assert_eq!(engine.report(TestSide::TwoSided, true).expect("report").len(), 4);
    }

    #[test]
    fn test_empty_matrix() {
        let engine = CorrelationEngine::new(FeatureMatrix::empty(), NameMap::new());
        assert!(matches!(
            engine.correlation_matrix(TestSide::TwoSided, true),
            Err(AnalysisError::NotInitialized(_))
        ));
        assert!(matches!(
            engine.descriptive_statistics(),
            Err(AnalysisError::NotInitialized(_))
        ));
        assert!(matches!(engine.pair_plot(), Err(AnalysisError::NotInitialized(_))));
    }
}
