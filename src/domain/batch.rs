//! Batch model
//!
//! A batch is the set of rows one selector run claimed for one grouping key.
//! Membership is fixed when the batch is formed; only its state moves.

use crate::domain::ids::{safe_name, BatchId, GroupingKey, RowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of the site part of a delivered file name
pub const SAFE_SITE_LEN: usize = 30;

/// Maximum length of the batch part of a delivered file name
pub const SAFE_BATCH_LEN: usize = 40;

/// Batch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Claimed by the selector, waiting for the connector
    Staged,
    /// File handed to the watch folder
    Delivered,
    /// Artifact copied to the archive
    Archived,
    /// Every row was rejected
    Failed,
}

impl BatchState {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Staged => "staged",
            BatchState::Delivered => "delivered",
            BatchState::Archived => "archived",
            BatchState::Failed => "failed",
        }
    }

    /// Whether the connector still has work to do for this batch
    pub fn is_pending(&self) -> bool {
        matches!(self, BatchState::Staged)
    }
}

impl Default for BatchState {
    fn default() -> Self {
        Self::Staged
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staged" => Ok(BatchState::Staged),
            "delivered" => Ok(BatchState::Delivered),
            "archived" => Ok(BatchState::Archived),
            "failed" => Ok(BatchState::Failed),
            other => Err(format!("Unknown batch state: {other}")),
        }
    }
}

/// A claimed group of rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,

    /// Grouping key every member row shares
    pub key: GroupingKey,

    /// Member rows in claim order
    pub row_ids: Vec<RowId>,

    pub selected_at: DateTime<Utc>,

    pub state: BatchState,
}

impl Batch {
    /// Creates a freshly staged batch
    pub fn staged(batch_id: BatchId, key: GroupingKey, row_ids: Vec<RowId>) -> Self {
        Self {
            batch_id,
            key,
            row_ids,
            selected_at: Utc::now(),
            state: BatchState::Staged,
        }
    }

    /// Number of member rows
    pub fn row_count(&self) -> usize {
        self.row_ids.len()
    }

    /// Site component used in file and folder names
    pub fn safe_site(&self) -> String {
        safe_name(&self.key.site, "site", SAFE_SITE_LEN)
    }

    /// Name of the delivered CSV file
    ///
    /// Derived only from the batch, so a rerun produces the same name and an
    /// existing file in the watch folder is recognised.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.csv",
            self.safe_site(),
            safe_name(self.batch_id.as_str(), "batch", SAFE_BATCH_LEN)
        )
    }
}

/// Filter for listing batches
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub state: Option<BatchState>,
    pub site: Option<String>,
}

impl BatchFilter {
    /// Whether a batch passes the filter
    pub fn matches(&self, batch: &Batch) -> bool {
        self.state.map_or(true, |s| s == batch.state)
            && self.site.as_deref().map_or(true, |s| s == batch.key.site)
    }
}

/// Row and batch totals per state, for the status command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub rows_ready: u64,
    pub rows_selected: u64,
    pub rows_delivered: u64,
    pub rows_failed: u64,
    pub batches_staged: u64,
    pub batches_delivered: u64,
    pub batches_archived: u64,
    pub batches_failed: u64,
}
