//! Archive of delivered files
//!
//! Layout: `{archive_dir}/{YYYYMMDD}/{run_id}/{file_name}` plus
//! `{file_name}.manifest.json`. Archived files are made read-only and an
//! existing archive entry is never rewritten.

use crate::core::connector::write_atomic;
use crate::domain::context::ResultExt;
use crate::domain::{Batch, DeliveryRecord, Result, RunId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Content of `{file}.manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub batch_id: String,
    pub site: String,
    pub batch_date: NaiveDate,
    pub file_name: String,
    pub target_path: String,
    pub row_ids: Vec<i64>,
    pub rows_delivered: usize,
    pub byte_size: u64,
    pub checksum: String,
    pub run_id: String,
    pub delivered_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveManifest {
    pub fn new(batch: &Batch, record: &DeliveryRecord, rows_delivered: usize) -> Self {
        Self {
            batch_id: batch.batch_id.to_string(),
            site: batch.key.site.clone(),
            batch_date: batch.key.batch_date,
            file_name: record.file_name.clone(),
            target_path: record.target_path.clone(),
            row_ids: batch.row_ids.iter().map(|id| id.value()).collect(),
            rows_delivered,
            byte_size: record.byte_size,
            checksum: record.checksum.clone(),
            run_id: record.run_id.to_string(),
            delivered_at: record.recorded_at,
            archived_at: Utc::now(),
        }
    }
}

/// Archive tree rooted at the configured directory
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, day: NaiveDate, run_id: &RunId) -> PathBuf {
        self.root
            .join(day.format("%Y%m%d").to_string())
            .join(run_id.as_str())
    }

    /// Stores a delivered file and its manifest
    ///
    /// Returns the archived file path. Files already present are kept as is.
    pub fn store(
        &self,
        day: NaiveDate,
        run_id: &RunId,
        bytes: &[u8],
        manifest: &ArchiveManifest,
    ) -> Result<PathBuf> {
        let dir = self.dir_for(day, run_id);
        let file = dir.join(&manifest.file_name);
        let manifest_path = dir.join(format!("{}.manifest.json", manifest.file_name));

        if !file.exists() {
            write_atomic(&file, bytes)?;
            make_read_only(&file)?;
        }
        if !manifest_path.exists() {
            write_atomic(&manifest_path, &serde_json::to_vec_pretty(manifest)?)?;
            make_read_only(&manifest_path)?;
        }

        Ok(file)
    }
}

fn make_read_only(path: &Path) -> Result<()> {
    let mut permissions = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("Failed to make {} read-only", path.display()))
}
