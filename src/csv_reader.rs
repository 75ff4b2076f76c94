use crate::structs::{AnalysisError, NameMap, Result};
use csv::ReaderBuilder;
use std::path::Path;

/// Represents a parsed CSV/TSV file with headers and rows
#[derive(Debug, Clone)]
pub struct CsvData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvData {
    /// Parse a CSV or TSV file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not valid CSV
    pub fn from_file(path: &Path, is_tsv: bool) -> Result<Self> {
        let delimiter = if is_tsv { b'\t' } else { b',' };

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|s| s.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let row: Vec<String> = record.iter().map(|s| s.trim().to_string()).collect();
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// Get number of rows
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Get number of columns
    #[must_use]
    pub fn col_count(&self) -> usize {
        self.headers.len()
    }

    /// Get column index by name
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Get a cell, treating short rows as empty
    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map_or("", String::as_str)
    }
}

/// Load a `code,name` mapping file
///
/// # Errors
/// Returns error if the file cannot be parsed or has fewer than two columns
pub fn load_name_map(path: &Path, is_tsv: bool) -> Result<NameMap> {
    let data = CsvData::from_file(path, is_tsv)?;
    if data.col_count() < 2 {
        return Err(AnalysisError::Config(format!(
            "name map {} needs code and name columns",
            path.display()
        )));
    }

    Ok(data
        .rows
        .iter()
        .filter_map(|row| match (row.first(), row.get(1)) {
            (Some(code), Some(name)) if !code.is_empty() => Some((code.clone(), name.clone())),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_tsv() {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(b"region\tperiod\tA01\nAndong\t2020\t1.5\n")
            .expect("write content");

        let data = CsvData::from_file(file.path(), true).expect("parse tsv");
        assert_eq!(data.headers, vec!["region", "period", "A01"]);
        assert_eq!(data.row_count(), 1);
        assert_eq!(data.cell(0, 2), "1.5");
        assert_eq!(data.cell(0, 7), "");
    }

    #[test]
    fn test_load_name_map() {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all("code,name\nA01,인구수\nB02,사업체수\n".as_bytes())
            .expect("write content");

        let names = load_name_map(file.path(), false).expect("load names");
        assert_eq!(names.len(), 2);
        assert_eq!(names.display("A01"), "인구수");
    }

    #[test]
    fn test_name_map_needs_two_columns() {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(b"code\nA01\n").expect("write content");

        assert!(matches!(
            load_name_map(file.path(), false),
            Err(AnalysisError::Config(_))
        ));
    }
}
