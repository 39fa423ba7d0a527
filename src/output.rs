//! Reporting sink for validation results.
//!
//! Each poll cycle produces one [`ValidationReport`]; the scheduler hands it
//! to a [`ReportSink`]. A sink failure is an operational error for that
//! cycle only — the next cycle reports again.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use tracing::debug;

use crate::rules::RuleViolation;

/// The findings of one poll cycle for one source.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub violations: Vec<RuleViolation>,
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(&self, report: &ValidationReport) -> Result<()>;
}

/// Appends one CSV row per violation, creating the file with headers on
/// first write.
pub struct CsvSink {
    path: PathBuf,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    source_id: &'a str,
    timestamp: DateTime<Utc>,
    code: &'static str,
    severity: crate::rules::Severity,
    title: &'static str,
    trip_id: Option<&'a str>,
    stop_sequence: Option<u32>,
    stop_id: Option<&'a str>,
    detail: &'a str,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append_rows(&self, report: &ValidationReport) -> Result<()> {
        let file_exists = Path::new(&self.path).exists();
        debug!(path = %self.path.display(), file_exists, "Appending report rows");

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;

        let mut writer = WriterBuilder::new()
            .has_headers(!file_exists) // IMPORTANT when appending
            .from_writer(file);

        for violation in &report.violations {
            writer.serialize(CsvRow {
                source_id: &report.source_id,
                timestamp: report.timestamp,
                code: violation.code.as_str(),
                severity: violation.severity,
                title: violation.code.title(),
                trip_id: violation.trip_id.as_deref(),
                stop_sequence: violation.stop_sequence,
                stop_id: violation.stop_id.as_deref(),
                detail: &violation.detail,
            })?;
        }
        writer.flush()?;

        Ok(())
    }
}

#[async_trait]
impl ReportSink for CsvSink {
    async fn publish(&self, report: &ValidationReport) -> Result<()> {
        self.append_rows(report)
    }
}

/// Logs a one-line summary of a report.
pub fn log_summary(report: &ValidationReport) {
    let counts = crate::rules::count_by_code(&report.violations);
    let mut summary: Vec<String> = counts
        .iter()
        .map(|(code, count)| format!("{code}x{count}"))
        .collect();
    summary.sort();
    tracing::info!(
        source_id = %report.source_id,
        violations = report.violations.len(),
        codes = %summary.join(","),
        "Validation report"
    );
}
