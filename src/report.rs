//! Shutdown reports.
//!
//! A sink receives the completed-connection history exactly once, when the
//! coordinator shuts down. `CsvReport` writes a spreadsheet-friendly file
//! with one row per connection in completion order.

use crate::error::ReportError;
use crate::record::ConnectionRecord;
use chrono::{DateTime, Local, SecondsFormat};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const HEADER: &str = "host,bytes_transferred,request_count,connections_at_close,closed_at";

/// Destination for the shutdown history.
pub trait ReportSink {
    fn generate(
        &mut self,
        timestamp: &DateTime<Local>,
        history: &[ConnectionRecord],
    ) -> Result<(), ReportError>;
}

/// Writes `report-<timestamp>.csv` into a directory.
#[derive(Debug, Clone)]
pub struct CsvReport {
    dir: PathBuf,
}

impl CsvReport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the report generated for `timestamp`.
    pub fn path_for(&self, timestamp: &DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("report-{}.csv", timestamp.format("%Y%m%d-%H%M%S")))
    }
}

impl ReportSink for CsvReport {
    fn generate(
        &mut self,
        timestamp: &DateTime<Local>,
        history: &[ConnectionRecord],
    ) -> Result<(), ReportError> {
        let path = self.path_for(timestamp);
        write_csv(&path, history).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), rows = history.len(), "Report written");
        Ok(())
    }
}

fn write_csv(path: &Path, history: &[ConnectionRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{HEADER}")?;

    for record in history {
        writeln!(
            out,
            "{},{},{},{},{}",
            escape(&record.host_name),
            record.bytes_transferred,
            record.request_count,
            record.connections_at_close,
            record.closed_at.to_rfc3339_opts(SecondsFormat::Millis, false),
        )?;
    }

    out.flush()
}

/// Quote a field if it contains a separator, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
