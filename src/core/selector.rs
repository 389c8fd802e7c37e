//! Selector: ready rows to staged batches
//!
//! One pass over the grouping keys that have `ready` rows. Each key yields at
//! most one batch per run; rows beyond `batch_size` stay `ready` for the next
//! run. Rows with a blank site fail up front as `site_missing`. A lost claim
//! or malformed stored rows skip the key; a row store outage aborts the pass.

use crate::adapters::store::RowStore;
use crate::config::SelectorConfig;
use crate::domain::{BatchId, BridgeError, GroupingKey, Result, RowId, RowStoreError};
use crate::log_batch_event;
use crate::logging::{AuditEvent, AuditJournal};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Error reason of rows that cannot be grouped, matching the contract's code
const UNKEYED_REASON: &str = "site_missing";

/// Result of one selector pass
#[derive(Debug, Clone, Default)]
pub struct SelectionSummary {
    /// Grouping keys considered after site filtering
    pub keys_scanned: usize,

    /// Batches created, in claim order
    pub batches: Vec<BatchId>,

    pub rows_claimed: usize,

    /// Keys skipped because another run claimed first
    pub conflicts: usize,

    /// Keys skipped because their stored rows could not be read
    pub keys_skipped: usize,

    /// Rows failed because their site was blank
    pub rows_unkeyed: usize,

    pub duration: Duration,
}

impl SelectionSummary {
    pub fn log_summary(&self) {
        tracing::info!(
            keys = self.keys_scanned,
            batches = self.batches.len(),
            rows = self.rows_claimed,
            conflicts = self.conflicts,
            skipped = self.keys_skipped,
            unkeyed = self.rows_unkeyed,
            duration_ms = self.duration.as_millis() as u64,
            "Selection completed"
        );
    }
}

/// Claims ready rows into batches
pub struct Selector {
    store: Arc<dyn RowStore>,
    config: SelectorConfig,
    journal: Arc<AuditJournal>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Selector {
    pub fn new(store: Arc<dyn RowStore>, config: SelectorConfig, journal: Arc<AuditJournal>) -> Self {
        Self {
            store,
            config,
            journal,
            shutdown: None,
        }
    }

    /// Stops between keys once the receiver reads `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn wants(&self, key: &GroupingKey) -> bool {
        self.config.sites.is_empty() || self.config.sites.iter().any(|s| s == &key.site)
    }

    /// Runs one selection pass
    ///
    /// # Errors
    ///
    /// Any row store error other than a lost claim.
    pub async fn run(&self) -> Result<SelectionSummary> {
        let start = Instant::now();
        let mut summary = SelectionSummary::default();

        let unkeyed = self.store.fail_unkeyed_rows(UNKEYED_REASON).await?;
        for row_id in &unkeyed {
            self.journal.emit(
                AuditEvent::ValidationFailed,
                None,
                None,
                format!("Row {row_id}: {UNKEYED_REASON}"),
            );
        }
        if !unkeyed.is_empty() {
            tracing::warn!(rows = unkeyed.len(), "Failed ready rows with a blank site");
        }
        summary.rows_unkeyed = unkeyed.len();

        let keys: Vec<GroupingKey> = self
            .store
            .ready_grouping_keys()
            .await?
            .into_iter()
            .filter(|k| self.wants(k))
            .collect();
        summary.keys_scanned = keys.len();

        tracing::debug!(keys = keys.len(), "Grouping keys with ready rows");

        for key in &keys {
            if self.shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                tracing::warn!("Shutdown requested, stopping selection");
                break;
            }

            let rows = match self.store.fetch_ready(key, self.config.batch_size).await {
                Ok(rows) => rows,
                Err(BridgeError::RowStore(RowStoreError::Inconsistent(reason))) => {
                    tracing::error!(grouping_key = %key, reason = %reason, "Unreadable rows, skipping key");
                    self.journal.emit(
                        AuditEvent::ValidationFailed,
                        None,
                        None,
                        format!("Key={key} skipped: {reason}"),
                    );
                    summary.keys_skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if rows.is_empty() {
                tracing::debug!(grouping_key = %key, "No ready rows");
                continue;
            }
            let row_ids: Vec<RowId> = rows.iter().map(|r| r.id).collect();

            match self.store.claim(key, &row_ids).await {
                Ok(batch) => {
                    self.journal.emit(
                        AuditEvent::BatchCreated,
                        Some(&batch.batch_id),
                        Some(&batch.file_name()),
                        format!("Site={} Date={} Rows={}", key.site, key.batch_date, batch.row_count()),
                    );
                    log_batch_event!(
                        batch.batch_id,
                        "created",
                        grouping_key = %key,
                        rows = batch.row_count()
                    );
                    summary.rows_claimed += batch.row_count();
                    summary.batches.push(batch.batch_id);
                }
                Err(BridgeError::ConcurrentClaim { target, reason }) => {
                    tracing::warn!(grouping_key = %key, target = %target, reason = %reason, "Claim lost, skipping key");
                    self.journal.emit(
                        AuditEvent::ClaimConflict,
                        None,
                        None,
                        format!("Key={key} {reason}"),
                    );
                    summary.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(SelectionSummary {
            duration: start.elapsed(),
            ..summary
        })
    }
}
