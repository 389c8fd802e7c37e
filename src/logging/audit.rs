//! Audit journal for pipeline events
//!
//! Every batch outcome and every failure is appended as one JSON line to
//! `{audit_dir}/events-{YYYYMMDD}.jsonl`, next to the archive and quarantine
//! trees. The journal is append-only; nothing in labelbridge rewrites it.

use crate::domain::context::ResultExt;
use crate::domain::errors::BridgeError;
use crate::domain::ids::{BatchId, RunId};
use crate::domain::result::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Journal event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    RunStarted,
    RunCompleted,
    RunFailed,
    BatchCreated,
    ClaimConflict,
    ValidationFailed,
    BatchCopied,
    CopyFailed,
    AlreadyDelivered,
    BatchArchived,
    BatchQuarantined,
}

/// Journal severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl AuditEvent {
    /// Severity an event is journaled with
    pub fn level(&self) -> AuditLevel {
        match self {
            AuditEvent::RunFailed | AuditEvent::CopyFailed => AuditLevel::Error,
            AuditEvent::ClaimConflict
            | AuditEvent::ValidationFailed
            | AuditEvent::BatchQuarantined
            | AuditEvent::AlreadyDelivered => AuditLevel::Warn,
            _ => AuditLevel::Info,
        }
    }
}

/// One journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub event: AuditEvent,
    pub run_id: String,
    #[serde(default)]
    pub batch_id: String,
    #[serde(default)]
    pub file_name: String,
    pub message: String,
}

/// Append-only JSON-lines journal
#[derive(Debug, Clone)]
pub struct AuditJournal {
    dir: PathBuf,
    run_id: RunId,
    enabled: bool,
}

impl AuditJournal {
    /// Opens the journal directory, creating it if needed
    pub fn open(dir: impl Into<PathBuf>, run_id: RunId) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create audit directory {}", dir.display()))?;
        Ok(Self {
            dir,
            run_id,
            enabled: true,
        })
    }

    /// A journal that drops every entry, used for dry runs
    pub fn disabled(run_id: RunId) -> Self {
        Self {
            dir: PathBuf::new(),
            run_id,
            enabled: false,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Path of the journal file for a given day
    pub fn file_for(&self, day: NaiveDate) -> PathBuf {
        journal_file(&self.dir, day)
    }

    /// Appends one entry
    pub fn record(
        &self,
        event: AuditEvent,
        batch_id: Option<&BatchId>,
        file_name: Option<&str>,
        message: impl Into<String>,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let entry = AuditEntry {
            timestamp: Utc::now(),
            level: event.level(),
            event,
            run_id: self.run_id.to_string(),
            batch_id: batch_id.map(ToString::to_string).unwrap_or_default(),
            file_name: file_name.unwrap_or_default().to_string(),
            message: message.into(),
        };

        let path = self.file_for(entry.timestamp.date_naive());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit journal {}", path.display()))?;

        let json_line = serde_json::to_string(&entry)?;
        writeln!(file, "{json_line}")
            .with_context(|| format!("Failed to write audit journal {}", path.display()))?;

        Ok(())
    }

    /// Appends one entry; a journal write failure is logged and swallowed
    ///
    /// Batch processing must not fail because the journal disk is full.
    pub fn emit(
        &self,
        event: AuditEvent,
        batch_id: Option<&BatchId>,
        file_name: Option<&str>,
        message: impl Into<String>,
    ) {
        if let Err(e) = self.record(event, batch_id, file_name, message) {
            tracing::warn!(error = %e, event = ?event, "Failed to append audit entry");
        }
    }
}

fn journal_file(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("events-{}.jsonl", day.format("%Y%m%d")))
}

/// Reads every entry journaled on a given day
pub fn read_entries(dir: impl AsRef<Path>, day: NaiveDate) -> Result<Vec<AuditEntry>> {
    let path = journal_file(dir.as_ref(), day);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read audit journal {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<AuditEntry>(line).map_err(BridgeError::from))
        .collect()
}
