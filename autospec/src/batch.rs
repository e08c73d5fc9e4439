//! Catalogue-wide run with per-row isolation.
//!
//! A failing row is logged and recorded in the [`RunReport`]; the batch moves
//! on. Only fatal (configuration) errors abort the run.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use strum_macros::Display;
use tracing::{error, info, warn};

use crate::catalog::CatalogRow;
use crate::error::{Error, Result};
use crate::output::{SOFTWARE, SourceWriter};
use crate::pipeline::{ProcessingContext, RowDiagnostics, SourceRequest, process_source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RowStatus {
    Ok,
    Failed,
}

/// Outcome of one catalogue row.
#[derive(Debug, Clone, Serialize)]
pub struct RowReport {
    pub line: Option<usize>,
    pub id: String,
    pub status: RowStatus,
    /// Error message of a failed row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<RowDiagnostics>,
}

impl RowReport {
    fn failed(line: Option<usize>, id: String, err: &Error, elapsed_secs: f64) -> Self {
        Self {
            line,
            id,
            status: RowStatus::Failed,
            message: Some(err.to_string()),
            elapsed_secs,
            output: None,
            truncated: false,
            diagnostics: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub software: String,
    pub version: String,
    pub rows: Vec<RowReport>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            software: SOFTWARE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            rows: Vec::new(),
        }
    }
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.status == RowStatus::Ok)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.rows.len() - self.succeeded()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::output(path, anyhow::Error::new(e)))?;
        std::fs::write(path, json).map_err(|e| Error::output(path, anyhow::Error::new(e)))
    }
}

/// Process every row and hand finished sources to `writer`.
pub fn run_batch(
    ctx: &ProcessingContext,
    rows: &[Result<CatalogRow>],
    writer: &dyn SourceWriter,
) -> Result<RunReport> {
    let started = Instant::now();
    let mut report = RunReport::default();
    info!(rows = rows.len(), "Starting extraction");

    for row in rows {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                let line = match err {
                    Error::Catalog { line, .. } => Some(*line),
                    _ => None,
                };
                warn!(error = %err, "Skipping catalogue line");
                report
                    .rows
                    .push(RowReport::failed(line, String::new(), err, 0.0));
                continue;
            }
        };

        let row_started = Instant::now();
        let request = SourceRequest::from_row(row, &ctx.config);
        let outcome = process_source(ctx, &request).and_then(|processed| {
            let path = writer.write(&processed.source)?;
            Ok((processed, path))
        });
        let elapsed_secs = row_started.elapsed().as_secs_f64();

        match outcome {
            Ok((processed, path)) => {
                info!(
                    id = %row.id,
                    output = %path.display(),
                    elapsed_secs,
                    "Source extracted"
                );
                report.rows.push(RowReport {
                    line: Some(row.line),
                    id: row.id.clone(),
                    status: RowStatus::Ok,
                    message: None,
                    elapsed_secs,
                    output: Some(path),
                    truncated: processed.source.truncated,
                    diagnostics: Some(processed.diagnostics),
                });
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!(id = %row.id, line = row.line, error = %err, "Source failed");
                report.rows.push(RowReport::failed(
                    Some(row.line),
                    row.id.clone(),
                    &err,
                    elapsed_secs,
                ));
            }
        }
    }

    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Extraction finished"
    );
    Ok(report)
}
