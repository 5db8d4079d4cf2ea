//! The output sink: one JSON file and one CSV file per harvest, plus an
//! optional run manifest.
//!
//! Record JSON carries no timestamp, so identical harvests produce identical
//! bytes. The manifest is where the run time goes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use harvester_core::{HarvestResult, HarvestSummary, RawRecord};
use serde::Serialize;

use crate::persist::{AtomicFileWriter, PersistError};

/// Column order used when a run does not configure one.
pub const DEFAULT_CSV_FIELDS: [&str; 5] = ["school_name", "url", "name", "job_title", "email"];

/// Produces the `generated_utc` value stamped into manifests.
pub type Clock = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("serializing json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("writing csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("output name {0:?} is used by more than one harvest")]
    NameClash(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
    pub summary: Option<PathBuf>,
}

pub trait OutputSink: Send + Sync {
    /// Writes one harvest's records under `base_name`.
    fn write(&self, result: &HarvestResult, base_name: &str) -> Result<OutputPaths, ExportError>;

    /// Writes records merged from several harvests; no manifest.
    fn write_combined(
        &self,
        records: &[RawRecord],
        base_name: &str,
    ) -> Result<OutputPaths, ExportError>;
}

#[derive(Serialize)]
struct Manifest<'a> {
    generated_utc: &'a str,
    json: &'a str,
    csv: &'a str,
    summary: &'a HarvestSummary,
}

/// Writes `{base}.json`, `{base}.csv` and, when a clock is set,
/// `{base}.summary.json` into one directory.
#[derive(Clone)]
pub struct FileOutputSink {
    writer: AtomicFileWriter,
    csv_fields: Vec<String>,
    clock: Option<Clock>,
}

impl FileOutputSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
            csv_fields: DEFAULT_CSV_FIELDS.iter().map(|f| f.to_string()).collect(),
            clock: None,
        }
    }

    pub fn with_csv_fields(mut self, fields: Vec<String>) -> Self {
        self.csv_fields = fields;
        self
    }

    pub fn with_manifest(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn dir(&self) -> &Path {
        self.writer.dir()
    }

    pub fn csv_fields(&self) -> &[String] {
        &self.csv_fields
    }

    /// Both buffers are rendered before either file is replaced, so a
    /// rendering error never leaves a new JSON beside a stale CSV.
    fn render_pair(&self, records: &[RawRecord]) -> Result<(Vec<u8>, Vec<u8>), ExportError> {
        let mut json = serde_json::to_vec_pretty(records)?;
        json.push(b'\n');
        let csv = records_to_csv(records, &self.csv_fields)?;
        Ok((json, csv))
    }

    fn write_pair(&self, records: &[RawRecord], base_name: &str) -> Result<(PathBuf, PathBuf), ExportError> {
        let (json, csv) = self.render_pair(records)?;
        let json_path = self.writer.write(&format!("{base_name}.json"), &json)?;
        let csv_path = self.writer.write(&format!("{base_name}.csv"), &csv)?;
        Ok((json_path, csv_path))
    }
}

impl OutputSink for FileOutputSink {
    fn write(&self, result: &HarvestResult, base_name: &str) -> Result<OutputPaths, ExportError> {
        let (json, csv) = self.write_pair(&result.records, base_name)?;
        let summary = match &self.clock {
            Some(clock) => {
                let generated_utc = clock();
                let json_name = file_name(&json);
                let csv_name = file_name(&csv);
                let manifest = Manifest {
                    generated_utc: &generated_utc,
                    json: &json_name,
                    csv: &csv_name,
                    summary: &result.summary,
                };
                let mut bytes = serde_json::to_vec_pretty(&manifest)?;
                bytes.push(b'\n');
                Some(
                    self.writer
                        .write(&format!("{base_name}.summary.json"), &bytes)?,
                )
            }
            None => None,
        };
        Ok(OutputPaths { json, csv, summary })
    }

    fn write_combined(
        &self,
        records: &[RawRecord],
        base_name: &str,
    ) -> Result<OutputPaths, ExportError> {
        let (json, csv) = self.write_pair(records, base_name)?;
        Ok(OutputPaths {
            json,
            csv,
            summary: None,
        })
    }
}

/// Header row of `fields`, then one row per record; absent fields are empty.
pub fn records_to_csv(records: &[RawRecord], fields: &[String]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    for record in records {
        writer.write_record(fields.iter().map(|f| record.value_or_empty(f)))?;
    }
    writer
        .into_inner()
        .map_err(|err| ExportError::Csv(csv::Error::from(err.into_error())))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
