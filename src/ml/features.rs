use crate::csv_reader::CsvData;
use crate::structs::{AnalysisError, FeatureMatrix, Result, RowKey};
use ndarray::{Array2, Axis};
use std::collections::HashSet;

/// Upper bound on indicator codes per request
pub const MAX_INDICATORS: usize = 10;

const REGION_COLUMN: &str = "region";
const PERIOD_COLUMN: &str = "period";
const X_COLUMN: &str = "x_coord";
const Y_COLUMN: &str = "y_coord";

impl FeatureMatrix {
    /// Build a matrix from keys, unique indicator codes and a value grid
    ///
    /// # Errors
    /// Returns `InvalidParameter` on duplicate codes or mismatched shapes
    pub fn new(keys: Vec<RowKey>, codes: Vec<String>, values: Array2<f64>) -> Result<Self> {
        let mut seen = HashSet::new();
        if let Some(dup) = codes.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(AnalysisError::InvalidParameter(format!(
                "duplicate indicator code: {dup}"
            )));
        }

        if values.nrows() != keys.len() || values.ncols() != codes.len() {
            return Err(AnalysisError::InvalidParameter(format!(
                "value grid is {}x{} but there are {} keys and {} codes",
                values.nrows(),
                values.ncols(),
                keys.len(),
                codes.len()
            )));
        }

        Ok(Self {
            keys,
            codes,
            values,
            coordinates: None,
            labels: None,
        })
    }

    /// A matrix with no rows and no columns
    #[must_use]
    pub fn empty() -> Self {
        Self {
            keys: Vec::new(),
            codes: Vec::new(),
            values: Array2::zeros((0, 0)),
            coordinates: None,
            labels: None,
        }
    }

    /// Attach native coordinates, one pair per row
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the count does not match the rows
    pub fn with_coordinates(mut self, coordinates: Vec<(f64, f64)>) -> Result<Self> {
        if coordinates.len() != self.n_samples() {
            return Err(AnalysisError::InvalidParameter(format!(
                "{} coordinate pairs for {} rows",
                coordinates.len(),
                self.n_samples()
            )));
        }
        self.coordinates = Some(coordinates);
        Ok(self)
    }

    /// Extract a matrix from a wide CSV
    ///
    /// The file starts with `region` and `period` key columns; optional
    /// `x_coord`/`y_coord` columns carry coordinates and every other column is
    /// an indicator code. Empty or non-numeric cells become missing values.
    ///
    /// # Errors
    /// Returns error if key columns are absent, no indicator column is found,
    /// or more than `MAX_INDICATORS` codes are present
    pub fn from_csv(csv: &CsvData) -> Result<Self> {
        let region_idx = csv.column_index(REGION_COLUMN).ok_or_else(|| {
            AnalysisError::Config(format!("missing '{REGION_COLUMN}' column"))
        })?;
        let period_idx = csv.column_index(PERIOD_COLUMN).ok_or_else(|| {
            AnalysisError::Config(format!("missing '{PERIOD_COLUMN}' column"))
        })?;
        let coord_idx = csv.column_index(X_COLUMN).zip(csv.column_index(Y_COLUMN));

        let indicator_cols: Vec<usize> = (0..csv.col_count())
            .filter(|&i| i != region_idx && i != period_idx)
            .filter(|&i| coord_idx.map_or(true, |(x, y)| i != x && i != y))
            .collect();

        if indicator_cols.is_empty() {
            return Err(AnalysisError::Config("No indicator columns found".into()));
        }
        if indicator_cols.len() > MAX_INDICATORS {
            return Err(AnalysisError::InvalidParameter(format!(
                "at most {MAX_INDICATORS} indicators per analysis, got {}",
                indicator_cols.len()
            )));
        }

        let codes: Vec<String> = indicator_cols
            .iter()
            .map(|&i| csv.headers[i].clone())
            .collect();

        let keys: Vec<RowKey> = (0..csv.row_count())
            .map(|r| RowKey::new(csv.cell(r, region_idx), csv.cell(r, period_idx)))
            .collect();

        let values = Array2::from_shape_fn((csv.row_count(), indicator_cols.len()), |(r, c)| {
            parse_cell(csv.cell(r, indicator_cols[c]))
        });

        let matrix = Self::new(keys, codes, values)?;

        match coord_idx {
            Some((x, y)) => {
                let coordinates = (0..csv.row_count())
                    .map(|r| {
                        (
                            parse_cell(csv.cell(r, x)),
                            parse_cell(csv.cell(r, y)),
                        )
                    })
                    .collect();
                matrix.with_coordinates(coordinates)
            }
            None => Ok(matrix),
        }
    }

    /// Replace every missing value with zero; runs before every fit
    pub fn fill_missing_with_zero(&mut self) {
        self.values
            .mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });
    }

    /// Store cluster labels as an extra per-row column
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the count does not match the rows
    pub fn attach_labels(&mut self, labels: Vec<usize>) -> Result<()> {
        if labels.len() != self.n_samples() {
            return Err(AnalysisError::InvalidParameter(format!(
                "{} labels for {} rows",
                labels.len(),
                self.n_samples()
            )));
        }
        self.labels = Some(labels);
        Ok(())
    }

    /// Native coordinates of each row
    ///
    /// Falls back to the first two indicator columns when the source has no
    /// dedicated coordinate columns.
    #[must_use]
    pub fn coordinate_pairs(&self) -> Vec<(f64, f64)> {
        if let Some(coords) = &self.coordinates {
            return coords.clone();
        }
        self.values
            .axis_iter(Axis(0))
            .map(|row| {
                (
                    row.get(0).copied().unwrap_or(0.0),
                    row.get(1).copied().unwrap_or(0.0),
                )
            })
            .collect()
    }
}

fn parse_cell(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> CsvData {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(content.as_bytes()).expect("write content");
        CsvData::from_file(file.path(), false).expect("parse csv")
    }

    #[test]
    fn test_feature_extraction() {
        let csv = create_test_csv(
            "region,period,A01,B02\nAndong,2020,1.0,10.0\nGumi,2020,2.0,\nPohang,2020,3.0,30.0",
        );
        let features = FeatureMatrix::from_csv(&csv).expect("extract features");

        assert_eq!(features.n_samples(), 3);
        assert_eq!(features.codes, vec!["A01", "B02"]);
        assert_eq!(features.keys[1], RowKey::new("Gumi", "2020"));
        assert!(features.values[[1, 1]].is_nan());
        assert!(features.coordinates.is_none());
    }

    #[test]
    fn test_coordinate_columns() {
        let csv = create_test_csv(
            "region,period,x_coord,y_coord,A01\nAndong,2020,200000,550000,1.0\nGumi,2020,201000,551000,2.0",
        );
        let features = FeatureMatrix::from_csv(&csv).expect("extract features");

        assert_eq!(features.codes, vec!["A01"]);
        assert_eq!(
            features.coordinate_pairs(),
            vec![(200_000.0, 550_000.0), (201_000.0, 551_000.0)]
        );
    }

    #[test]
    fn test_missing_key_column() {
        let csv = create_test_csv("name,A01\na,1.0");
        assert!(matches!(
            FeatureMatrix::from_csv(&csv),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn test_indicator_limit() {
        let header: Vec<String> = (0..11).map(|i| format!("C{i:02}")).collect();
        let values = vec!["1.0"; 11].join(",");
        let csv = create_test_csv(&format!(
            "region,period,{}\nAndong,2020,{values}",
            header.join(",")
        ));
        assert!(matches!(
            FeatureMatrix::from_csv(&csv),
            Err(AnalysisError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_duplicate_codes_rejected() {
        let result = FeatureMatrix::new(
            vec![RowKey::new("a", "1")],
            vec!["A01".into(), "A01".into()],
            array![[1.0, 2.0]],
        );
        assert!(matches!(result, Err(AnalysisError::InvalidParameter(_))));
    }

    #[test]
    fn test_fill_missing_with_zero() {
        let mut features = FeatureMatrix::new(
            vec![RowKey::new("a", "1"), RowKey::new("b", "1")],
            vec!["A01".into(), "B02".into()],
            array![[1.0, f64::NAN], [f64::NAN, 4.0]],
        )
        .expect("build matrix");

        features.fill_missing_with_zero();
        assert_eq!(features.values, array![[1.0, 0.0], [0.0, 4.0]]);
    }

    #[test]
    fn test_attach_labels_checks_length() {
        let mut features = FeatureMatrix::new(
            vec![RowKey::new("a", "1")],
            vec!["A01".into()],
            array![[1.0]],
        )
        .expect("build matrix");

        assert!(features.attach_labels(vec![0, 1]).is_err());
        features.attach_labels(vec![0]).expect("attach");
        assert_eq!(features.labels, Some(vec![0]));
    }
}
