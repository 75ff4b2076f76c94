//! Artifact formatters and report/model file writers

use crate::structs::{AnalysisError, Artifact, ReportItem, Result, Table};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const REPORT_FILE: &str = "report.json";
pub const MODEL_FILE: &str = "model.json";

/// Renders one artifact into transportable bytes
pub trait ArtifactFormatter {
    /// MIME type of the rendered bytes
    fn media_type(&self, artifact: &Artifact) -> &'static str;

    /// # Errors
    /// Returns error if the artifact cannot be serialized in this format
    fn render(&self, artifact: &Artifact) -> Result<Vec<u8>>;
}

/// Pretty-printed JSON of the artifact value
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl ArtifactFormatter for JsonFormatter {
    fn media_type(&self, _: &Artifact) -> &'static str {
        "application/json"
    }

    fn render(&self, artifact: &Artifact) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(artifact)?)
    }
}

/// CSV for tables and records; charts fall back to JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFormatter;

impl ArtifactFormatter for CsvFormatter {
    fn media_type(&self, artifact: &Artifact) -> &'static str {
        match artifact {
            Artifact::Chart(_) => "application/json",
            Artifact::Table(_) | Artifact::Records(_) => "text/csv",
        }
    }

    fn render(&self, artifact: &Artifact) -> Result<Vec<u8>> {
        match artifact {
            Artifact::Table(table) => table_to_csv(table),
            Artifact::Records(records) => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                for record in records {
                    writer.serialize(record)?;
                }
                into_bytes(writer)
            }
            Artifact::Chart(_) => JsonFormatter.render(artifact),
        }
    }
}

/// Wraps another formatter and base64-encodes its output
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Formatter<F>(pub F);

impl<F: ArtifactFormatter> Base64Formatter<F> {
    /// Encoded text of the inner rendering
    ///
    /// # Errors
    /// Returns error if the inner formatter fails
    pub fn encode(&self, artifact: &Artifact) -> Result<String> {
        Ok(STANDARD.encode(self.0.render(artifact)?))
    }
}

impl<F: ArtifactFormatter> ArtifactFormatter for Base64Formatter<F> {
    fn media_type(&self, artifact: &Artifact) -> &'static str {
        self.0.media_type(artifact)
    }

    fn render(&self, artifact: &Artifact) -> Result<Vec<u8>> {
        Ok(self.encode(artifact)?.into_bytes())
    }
}

fn table_to_csv(table: &Table) -> Result<Vec<u8>> {
    let depth = table.rows.iter().map(|r| r.index.len()).max().unwrap_or(0);

    let mut writer = csv::Writer::from_writer(Vec::new());
    let header = std::iter::repeat(String::new())
        .take(depth)
        .chain(table.columns.iter().cloned());
    writer.write_record(header)?;

    for row in &table.rows {
        let index = (0..depth).map(|i| row.index.get(i).cloned().unwrap_or_default());
        writer.write_record(index.chain(row.cells.iter().map(ToString::to_string)))?;
    }
    into_bytes(writer)
}

fn into_bytes(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| AnalysisError::Io(e.into_error()))
}

/// Output format selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    #[must_use]
    pub fn formatter(self) -> Box<dyn ArtifactFormatter> {
        match self {
            Self::Json => Box::new(JsonFormatter),
            Self::Csv => Box::new(CsvFormatter),
        }
    }
}

/// One report entry as written to `report.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedItem {
    pub title: String,
    pub media_type: String,
    /// Base64 of the rendered artifact
    pub data: String,
}

/// Render and base64-encode every item
///
/// # Errors
/// Returns error if any artifact fails to render
pub fn encode_items(
    items: &[ReportItem],
    formatter: &dyn ArtifactFormatter,
) -> Result<Vec<EncodedItem>> {
    items
        .iter()
        .map(|item| {
            Ok(EncodedItem {
                title: item.title.clone(),
                media_type: formatter.media_type(&item.artifact).to_string(),
                data: STANDARD.encode(formatter.render(&item.artifact)?),
            })
        })
        .collect()
}

/// Decode the bytes of one encoded item
///
/// # Errors
/// Returns `Config` if the payload is not valid base64
pub fn decode_item(item: &EncodedItem) -> Result<Vec<u8>> {
    STANDARD
        .decode(&item.data)
        .map_err(|e| AnalysisError::Config(format!("invalid base64 in '{}': {e}", item.title)))
}

/// Write `report.json` into `dir`
///
/// # Errors
/// Returns error if rendering or writing fails
pub fn write_report(dir: &Path, items: &[ReportItem], format: OutputFormat) -> Result<PathBuf> {
    let encoded = encode_items(items, format.formatter().as_ref())?;
    let path = dir.join(REPORT_FILE);
    fs::write(&path, serde_json::to_string_pretty(&encoded)?)?;
    Ok(path)
}

/// Create `<base>/<id>` and return it
///
/// # Errors
/// Returns error if the directory cannot be created
pub fn instance_dir(base: &Path, id: Uuid) -> Result<PathBuf> {
    let dir = base.join(id.to_string());
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Serialize a fitted model to `<dir>/model.json`
///
/// # Errors
/// Returns error if serialization or writing fails
pub fn write_model<T: Serialize>(dir: &Path, model: &T) -> Result<PathBuf> {
    let path = dir.join(MODEL_FILE);
    fs::write(&path, serde_json::to_string_pretty(model)?)?;
    Ok(path)
}

/// # Errors
/// Returns error if the file cannot be read or parsed
pub fn read_model<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
