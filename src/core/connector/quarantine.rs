//! Quarantine of rejected rows
//!
//! Layout: `{quarantine_dir}/{run_id}/{safe_site}/{file_name}` holds a CSV
//! snapshot of the rejected rows, and `{file_name}.error.json` next to it
//! holds the per-row violations.
//!
//! Entries are never replaced. A second write for the same batch in the same
//! run lands under `{stem}-2.csv`, `{stem}-3.csv` and so on.

use crate::core::validation::rules::as_text;
use crate::core::validation::{Contract, Violation};
use crate::domain::{Batch, BridgeError, Result, Row, RunId};
use chrono::{DateTime, Utc};
use csv::{Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A row routed to quarantine and why
#[derive(Debug, Clone)]
pub struct RejectedRow<'a> {
    pub row: &'a Row,
    pub violations: Vec<Violation>,
}

impl RejectedRow<'_> {
    /// Rule codes joined with `;`
    pub fn reason(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.code.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// One row in the error report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRowReport {
    pub row_id: i64,
    pub reason: String,
    pub violations: Vec<Violation>,
}

/// Content of `{file}.error.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineReport {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub batch_id: String,
    pub site: String,
    pub file_name: String,
    pub rows_count: usize,
    pub rows: Vec<RejectedRowReport>,
}

/// Where a quarantine write landed
#[derive(Debug, Clone)]
pub struct QuarantineEntry {
    pub snapshot: PathBuf,
    pub report: PathBuf,
}

/// Quarantine tree rooted at the configured directory
#[derive(Debug, Clone)]
pub struct Quarantine {
    root: PathBuf,
}

impl Quarantine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder a run's rejects for one site are written to
    pub fn dir_for(&self, run_id: &RunId, batch: &Batch) -> PathBuf {
        self.root.join(run_id.as_str()).join(batch.safe_site())
    }

    /// Writes the snapshot and the error report for a batch's rejected rows
    pub fn write(
        &self,
        run_id: &RunId,
        batch: &Batch,
        contract: &Contract,
        rejected: &[RejectedRow<'_>],
    ) -> Result<QuarantineEntry> {
        let file_name = batch.file_name();
        let dir = self.dir_for(run_id, batch);
        fs::create_dir_all(&dir)?;

        let snapshot = write_new_snapshot(&dir, &file_name, &snapshot_csv(contract, rejected)?)?;
        let report_path = report_path_for(&snapshot);

        let report = QuarantineReport {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            batch_id: batch.batch_id.to_string(),
            site: batch.key.site.clone(),
            file_name,
            rows_count: rejected.len(),
            rows: rejected
                .iter()
                .map(|r| RejectedRowReport {
                    row_id: r.row.id.value(),
                    reason: r.reason(),
                    violations: r.violations.clone(),
                })
                .collect(),
        };
        write_new(&report_path, &serde_json::to_vec_pretty(&report)?).map_err(|e| {
            BridgeError::Io(format!("Failed to write {}: {e}", report_path.display()))
        })?;

        tracing::warn!(
            batch_id = %batch.batch_id,
            rows = rejected.len(),
            path = %snapshot.display(),
            "Rows quarantined"
        );

        Ok(QuarantineEntry {
            snapshot,
            report: report_path,
        })
    }
}

/// Candidate name for the `n`th entry of a batch; the first keeps the plain name
fn numbered(file_name: &str, n: usize) -> String {
    if n <= 1 {
        return file_name.to_string();
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{n}.{ext}"),
        None => format!("{file_name}-{n}"),
    }
}

fn report_path_for(snapshot: &Path) -> PathBuf {
    let name = snapshot
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    snapshot.with_file_name(format!("{name}.error.json"))
}

/// Creates `path`, failing with `AlreadyExists` rather than replacing it
fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Claims the first free snapshot name whose report name is free as well
fn write_new_snapshot(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    for n in 1..=9999 {
        let snapshot = dir.join(numbered(file_name, n));
        if report_path_for(&snapshot).exists() {
            continue;
        }
        match write_new(&snapshot, bytes) {
            Ok(()) => return Ok(snapshot),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(BridgeError::Io(format!(
                    "Failed to write {}: {e}",
                    snapshot.display()
                )))
            }
        }
    }
    Err(BridgeError::Io(format!(
        "No free quarantine name for {file_name} in {}",
        dir.display()
    )))
}

/// Raw payload snapshot: row id, contract fields, then the error reason
fn snapshot_csv(contract: &Contract, rejected: &[RejectedRow<'_>]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let mut header = vec!["row_id"];
    header.extend(contract.field_names());
    header.push("error_reason");
    writer.write_record(&header)?;

    for rejected in rejected {
        let payload = contract.payload_of(rejected.row);
        let mut record = vec![rejected.row.id.to_string()];
        record.extend(contract.fields().iter().map(|f| {
            payload
                .get(&f.name)
                .and_then(as_text)
                .unwrap_or_default()
        }));
        record.push(rejected.reason());
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| crate::domain::BridgeError::Render(e.to_string()))
}

/// Reads an error report back
pub fn read_report(path: &Path) -> Result<QuarantineReport> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
