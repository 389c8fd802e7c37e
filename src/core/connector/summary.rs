//! Connector run summary and reporting

use crate::domain::BatchId;
use std::time::Duration;

/// What happened to one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// File delivered; invalid rows (if any) quarantined
    Delivered {
        file_name: String,
        rows_delivered: usize,
        rows_failed: usize,
    },
    /// A file for this batch was delivered by an earlier run
    AlreadyDelivered { file_name: String },
    /// No valid rows; the whole batch went to quarantine
    Quarantined { rows_failed: usize },
    /// Sink retries exhausted; the batch stays staged for the next run
    Deferred { attempts: u32, reason: String },
    /// Another run holds the delivery lease
    Conflict,
    /// Dry run: validated and rendered only
    DryRun {
        rows_valid: usize,
        rows_invalid: usize,
    },
}

/// A batch that failed for a reason other than validation
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub batch_id: BatchId,
    pub message: String,
}

/// Summary of a connector run
#[derive(Debug, Clone, Default)]
pub struct ConnectorSummary {
    /// Staged batches picked up
    pub batches_seen: usize,

    pub batches_delivered: usize,
    pub batches_already_delivered: usize,
    pub batches_quarantined: usize,
    pub batches_deferred: usize,
    pub batches_conflicted: usize,

    /// Delivered batches whose archival was finished in this run
    pub batches_archived: usize,

    pub rows_delivered: usize,
    pub rows_failed: usize,

    pub failures: Vec<BatchFailure>,

    pub duration: Duration,
}

impl ConnectorSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Counts one batch outcome
    pub fn record(&mut self, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Delivered {
                rows_delivered,
                rows_failed,
                ..
            } => {
                self.batches_delivered += 1;
                self.rows_delivered += rows_delivered;
                self.rows_failed += rows_failed;
            }
            BatchOutcome::AlreadyDelivered { .. } => self.batches_already_delivered += 1,
            BatchOutcome::Quarantined { rows_failed } => {
                self.batches_quarantined += 1;
                self.rows_failed += rows_failed;
            }
            BatchOutcome::Deferred { .. } => self.batches_deferred += 1,
            BatchOutcome::Conflict => self.batches_conflicted += 1,
            BatchOutcome::DryRun { .. } => {}
        }
    }

    pub fn add_failure(&mut self, batch_id: BatchId, message: impl Into<String>) {
        self.failures.push(BatchFailure {
            batch_id,
            message: message.into(),
        });
    }

    /// Whether any batch failed, was quarantined or had to be deferred
    pub fn has_batch_failures(&self) -> bool {
        self.batches_quarantined > 0
            || self.batches_deferred > 0
            || self.rows_failed > 0
            || !self.failures.is_empty()
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            batches = self.batches_seen,
            delivered = self.batches_delivered,
            already_delivered = self.batches_already_delivered,
            quarantined = self.batches_quarantined,
            deferred = self.batches_deferred,
            conflicts = self.batches_conflicted,
            archived = self.batches_archived,
            rows_delivered = self.rows_delivered,
            rows_failed = self.rows_failed,
            duration_ms = self.duration.as_millis() as u64,
            "Connector run completed"
        );

        for failure in &self.failures {
            tracing::warn!(
                batch_id = %failure.batch_id,
                message = %failure.message,
                "Batch failed"
            );
        }
    }
}
