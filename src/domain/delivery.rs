//! Delivery record model
//!
//! One record per batch. It doubles as the delivery lease: a run moves it to
//! `retrying` before touching the watch folder and to `delivered` or `failed`
//! once the sink call settles.

use crate::domain::ids::{BatchId, RunId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The file is in the watch folder
    Delivered,
    /// A run is currently delivering (lease held)
    Retrying,
    /// Retries were exhausted; the next run may try again
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Retrying => "retrying",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(DeliveryOutcome::Delivered),
            "retrying" => Ok(DeliveryOutcome::Retrying),
            "failed" => Ok(DeliveryOutcome::Failed),
            other => Err(format!("Unknown delivery outcome: {other}")),
        }
    }
}

/// Audit and idempotence record for one batch file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub batch_id: BatchId,

    /// Final file name in the watch folder
    pub file_name: String,

    /// Full path the file was (or will be) renamed to
    pub target_path: String,

    /// Size of the rendered CSV in bytes
    pub byte_size: u64,

    /// SHA-256 of the rendered CSV, hex encoded
    pub checksum: String,

    /// Sink attempts made by the run that wrote this record
    pub attempts: u32,

    /// Run that wrote this record
    pub run_id: RunId,

    pub recorded_at: DateTime<Utc>,

    pub outcome: DeliveryOutcome,
}

impl DeliveryRecord {
    /// Creates a lease record for a delivery that is about to start
    pub fn lease(
        batch_id: BatchId,
        file_name: impl Into<String>,
        target_path: impl Into<String>,
        byte_size: u64,
        checksum: impl Into<String>,
        run_id: RunId,
    ) -> Self {
        Self {
            batch_id,
            file_name: file_name.into(),
            target_path: target_path.into(),
            byte_size,
            checksum: checksum.into(),
            attempts: 0,
            run_id,
            recorded_at: Utc::now(),
            outcome: DeliveryOutcome::Retrying,
        }
    }

    /// Settles the record with its final outcome
    pub fn settle(mut self, outcome: DeliveryOutcome, attempts: u32) -> Self {
        self.outcome = outcome;
        self.attempts = attempts;
        self.recorded_at = Utc::now();
        self
    }

    /// Whether a `retrying` lease was left behind by a run that died
    pub fn is_stale(&self, lease_timeout: Duration, now: DateTime<Utc>) -> bool {
        self.outcome == DeliveryOutcome::Retrying && now - self.recorded_at > lease_timeout
    }

    /// Whether a new run may take over the record
    ///
    /// Returns `Err(outcome)` describing the blocking state otherwise.
    pub fn can_take_over(
        &self,
        lease_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), DeliveryOutcome> {
        match self.outcome {
            DeliveryOutcome::Failed => Ok(()),
            DeliveryOutcome::Retrying if self.is_stale(lease_timeout, now) => Ok(()),
            blocking => Err(blocking),
        }
    }
}
