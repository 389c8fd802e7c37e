//! Connector: staged batches to delivered files
//!
//! For each staged batch the connector validates the member rows, renders the
//! valid ones as CSV, hands the file to the delivery sink and then settles the
//! row store, the archive and the quarantine. Sink failures are retried with
//! backoff; once retries run out the batch stays staged for the next run.

pub mod archive;
pub mod quarantine;
pub mod render;
pub mod summary;

use crate::adapters::sink::{DeliverySink, SinkWrite};
use crate::adapters::store::RowStore;
use crate::config::{BridgeConfig, DeliveryConfig, StorageConfig};
use crate::core::checksum::calculate_checksum_bytes;
use crate::core::validation::{Contract, ValidationResult, Violation};
use crate::domain::context::ResultExt;
use crate::domain::{
    Batch, BatchFilter, BatchState, BridgeError, DeliveryOutcome, DeliveryRecord, Result, Row,
    RowFailure,
};
use crate::logging::{AuditEvent, AuditJournal};
use crate::{log_batch_event, log_retry_attempt};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

pub use archive::{Archive, ArchiveManifest};
pub use quarantine::{Quarantine, QuarantineReport, RejectedRow};
pub use render::render_csv;
pub use summary::{BatchFailure, BatchOutcome, ConnectorSummary};

/// Writes a file through a temp file and rename in the same folder
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| BridgeError::Io(format!("{} has no parent folder", path.display())))?;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    {
        let mut file =
            fs::File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed to rename into {}", path.display()))?;

    // Directory fsync is best effort; not every filesystem supports it.
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

/// Settings the connector needs out of the full configuration
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub contract: Contract,
    pub max_batches_per_run: usize,
    pub allow_partial_delivery: bool,
    pub delivery: DeliveryConfig,
    pub storage: StorageConfig,
    pub dry_run: bool,
}

impl ConnectorSettings {
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        Ok(Self {
            contract: Contract::from_config(&config.validation)?,
            max_batches_per_run: config.connector.max_batches_per_run,
            allow_partial_delivery: config.connector.allow_partial_delivery,
            delivery: config.delivery.clone(),
            storage: config.storage.clone(),
            dry_run: config.application.dry_run,
        })
    }

    fn lease_timeout(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.delivery.lease_timeout_seconds).unwrap_or(i64::MAX);
        chrono::Duration::seconds(seconds.min(i64::MAX / 1000))
    }
}

/// Validation split of a batch
struct Partition<'a> {
    valid: Vec<&'a Row>,
    rejected: Vec<RejectedRow<'a>>,
}

impl Partition<'_> {
    fn failures(&self) -> Vec<RowFailure> {
        self.rejected
            .iter()
            .map(|r| RowFailure::new(r.row.id, r.reason()))
            .collect()
    }
}

/// Delivers staged batches
pub struct Connector {
    store: Arc<dyn RowStore>,
    sink: Arc<dyn DeliverySink>,
    journal: Arc<AuditJournal>,
    settings: ConnectorSettings,
    archive: Archive,
    quarantine: Quarantine,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Connector {
    pub fn new(
        store: Arc<dyn RowStore>,
        sink: Arc<dyn DeliverySink>,
        journal: Arc<AuditJournal>,
        settings: ConnectorSettings,
    ) -> Self {
        let archive = Archive::new(&settings.storage.archive_dir);
        let quarantine = Quarantine::new(&settings.storage.quarantine_dir);
        Self {
            store,
            sink,
            journal,
            settings,
            archive,
            quarantine,
            shutdown: None,
        }
    }

    /// Stops the run between batches once the receiver reads `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn work_path(&self, file_name: &str) -> PathBuf {
        self.settings.storage.work_dir.join(file_name)
    }

    /// Processes up to `max_batches_per_run` staged batches
    ///
    /// # Errors
    ///
    /// A row store error aborts the run; every other failure is confined to
    /// its batch and reported in the summary.
    pub async fn run(&self) -> Result<ConnectorSummary> {
        let start = Instant::now();
        let mut summary = ConnectorSummary::new();

        if !self.settings.dry_run {
            self.finish_pending_archives(&mut summary).await?;
        }

        let batches = self
            .store
            .staged_batches(self.settings.max_batches_per_run)
            .await?;
        summary.batches_seen = batches.len();

        tracing::info!(
            batches = batches.len(),
            sink = %self.sink.describe(),
            dry_run = self.settings.dry_run,
            "Starting connector run"
        );

        for batch in &batches {
            if self.shutdown_requested() {
                tracing::warn!("Shutdown requested, leaving remaining batches staged");
                break;
            }

            match self.process_batch(batch).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e @ BridgeError::RowStore(_)) => {
                    tracing::error!(batch_id = %batch.batch_id, error = %e, "Row store failure");
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(batch_id = %batch.batch_id, error = %e, "Batch failed");
                    self.journal.emit(
                        AuditEvent::CopyFailed,
                        Some(&batch.batch_id),
                        Some(&batch.file_name()),
                        e.to_string(),
                    );
                    summary.add_failure(batch.batch_id.clone(), e.to_string());
                }
            }
        }

        Ok(summary.with_duration(start.elapsed()))
    }

    /// Runs one batch through validation, delivery and settlement
    pub async fn process_batch(&self, batch: &Batch) -> Result<BatchOutcome> {
        let file_name = batch.file_name();
        let rows = self.store.load_batch_rows(&batch.batch_id).await?;

        if rows.is_empty() {
            return self.settle_empty(batch).await;
        }

        let partition = self.partition(&rows);
        log_batch_event!(
            batch.batch_id,
            "validated",
            valid = partition.valid.len(),
            invalid = partition.rejected.len()
        );

        if self.settings.dry_run {
            let bytes = render_csv(&self.settings.contract, &partition.valid)?;
            tracing::info!(
                batch_id = %batch.batch_id,
                file_name = %file_name,
                bytes = bytes.len(),
                "DRY RUN: Would deliver batch"
            );
            return Ok(BatchOutcome::DryRun {
                rows_valid: partition.valid.len(),
                rows_invalid: partition.rejected.len(),
            });
        }

        if partition.valid.is_empty() {
            return self.quarantine_batch(batch, &partition).await;
        }

        let bytes = render_csv(&self.settings.contract, &partition.valid)?;
        write_atomic(&self.work_path(&file_name), &bytes)?;

        let target = self.sink.target_path(&file_name);
        let lease = DeliveryRecord::lease(
            batch.batch_id.clone(),
            file_name.clone(),
            target.display().to_string(),
            bytes.len() as u64,
            calculate_checksum_bytes(&bytes),
            self.journal.run_id().clone(),
        );

        match self
            .store
            .begin_delivery(&lease, self.settings.lease_timeout())
            .await
        {
            Ok(()) => {}
            Err(BridgeError::AlreadyDelivered { file_name, .. }) => {
                self.journal.emit(
                    AuditEvent::AlreadyDelivered,
                    Some(&batch.batch_id),
                    Some(&file_name),
                    "Delivery record already says delivered",
                );
                let record = self
                    .store
                    .delivery_record(&batch.batch_id)
                    .await?
                    .unwrap_or(lease);
                self.settle_delivered(batch, &partition, &bytes, &record)
                    .await?;
                return Ok(BatchOutcome::AlreadyDelivered { file_name });
            }
            Err(BridgeError::ConcurrentClaim { reason, .. }) => {
                self.journal.emit(
                    AuditEvent::ClaimConflict,
                    Some(&batch.batch_id),
                    Some(&file_name),
                    reason,
                );
                return Ok(BatchOutcome::Conflict);
            }
            Err(e) => return Err(e),
        }

        let (write, attempts) = match self.deliver_with_retry(&file_name, &bytes).await {
            Ok(delivered) => delivered,
            Err((attempts, e)) => {
                let failed = lease.settle(DeliveryOutcome::Failed, attempts);
                self.store.complete_delivery(&failed).await?;
                self.journal.emit(
                    AuditEvent::CopyFailed,
                    Some(&batch.batch_id),
                    Some(&file_name),
                    format!("Giving up after {attempts} attempts: {e}"),
                );
                return Ok(BatchOutcome::Deferred {
                    attempts,
                    reason: e.to_string(),
                });
            }
        };

        if let SinkWrite::AlreadyPresent { path } = &write {
            tracing::warn!(
                batch_id = %batch.batch_id,
                path = %path.display(),
                "File already in watch folder, treating as delivered"
            );
        }

        let record = lease.settle(DeliveryOutcome::Delivered, attempts);
        match self.store.complete_delivery(&record).await {
            Ok(()) => {}
            Err(BridgeError::ConcurrentClaim { reason, .. }) => {
                self.journal.emit(
                    AuditEvent::ClaimConflict,
                    Some(&batch.batch_id),
                    Some(&file_name),
                    reason,
                );
                return Ok(BatchOutcome::Conflict);
            }
            Err(e) => return Err(e),
        }

        self.journal.emit(
            AuditEvent::BatchCopied,
            Some(&batch.batch_id),
            Some(&file_name),
            format!(
                "Rows={} Attempts={attempts} Target={}",
                partition.valid.len(),
                write.path().display()
            ),
        );
        log_batch_event!(batch.batch_id, "delivered", attempts = attempts);

        self.settle_delivered(batch, &partition, &bytes, &record)
            .await?;

        Ok(BatchOutcome::Delivered {
            file_name,
            rows_delivered: partition.valid.len(),
            rows_failed: partition.rejected.len(),
        })
    }

    fn partition<'a>(&self, rows: &'a [Row]) -> Partition<'a> {
        let mut valid = Vec::new();
        let mut rejected = Vec::new();

        for row in rows {
            match self.settings.contract.validate_row(row) {
                ValidationResult::Valid => valid.push(row),
                ValidationResult::Invalid(violations) => {
                    rejected.push(RejectedRow { row, violations })
                }
            }
        }

        if !self.settings.allow_partial_delivery && !rejected.is_empty() {
            for row in valid.drain(..) {
                rejected.push(RejectedRow {
                    row,
                    violations: vec![Violation {
                        field: String::new(),
                        code: "batch_rejected".to_string(),
                        reason: "Another row of the batch failed validation".to_string(),
                    }],
                });
            }
            rejected.sort_by_key(|r| (r.row.created_at, r.row.id));
        }

        Partition { valid, rejected }
    }

    async fn deliver_with_retry(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> std::result::Result<(SinkWrite, u32), (u32, BridgeError)> {
        let max_attempts = self.settings.delivery.max_retries.max(1);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match self.sink.deliver(file_name, bytes).await {
                Ok(write) => return Ok((write, attempt as u32)),
                Err(e) if attempt < max_attempts => {
                    log_retry_attempt!(attempt, max_attempts, e);
                    tokio::time::sleep(self.settings.delivery.backoff_for(attempt)).await;
                }
                Err(e) => return Err((attempt as u32, e.into())),
            }
        }
    }

    /// Quarantines the rejected rows and marks them failed
    async fn quarantine_rejected(&self, batch: &Batch, partition: &Partition<'_>) -> Result<()> {
        if partition.rejected.is_empty() {
            return Ok(());
        }

        self.quarantine.write(
            self.journal.run_id(),
            batch,
            &self.settings.contract,
            &partition.rejected,
        )?;
        for rejected in &partition.rejected {
            self.journal.emit(
                AuditEvent::ValidationFailed,
                Some(&batch.batch_id),
                Some(&batch.file_name()),
                format!("Row {}: {}", rejected.row.id, rejected.reason()),
            );
        }

        self.store
            .mark_failed(&batch.batch_id, &partition.failures())
            .await
    }

    async fn quarantine_batch(
        &self,
        batch: &Batch,
        partition: &Partition<'_>,
    ) -> Result<BatchOutcome> {
        self.quarantine_rejected(batch, partition).await?;
        self.journal.emit(
            AuditEvent::BatchQuarantined,
            Some(&batch.batch_id),
            Some(&batch.file_name()),
            format!("Rows={} no valid rows, nothing delivered", partition.rejected.len()),
        );
        log_batch_event!(batch.batch_id, "quarantined", rows = partition.rejected.len());

        Ok(BatchOutcome::Quarantined {
            rows_failed: partition.rejected.len(),
        })
    }

    /// Post-delivery bookkeeping; every step is safe to repeat
    async fn settle_delivered(
        &self,
        batch: &Batch,
        partition: &Partition<'_>,
        bytes: &[u8],
        record: &DeliveryRecord,
    ) -> Result<()> {
        self.quarantine_rejected(batch, partition).await?;
        self.store.mark_delivered(&batch.batch_id).await?;
        self.archive_batch(batch, bytes, record, partition.valid.len())
            .await
    }

    async fn archive_batch(
        &self,
        batch: &Batch,
        bytes: &[u8],
        record: &DeliveryRecord,
        rows_delivered: usize,
    ) -> Result<()> {
        let manifest = ArchiveManifest::new(batch, record, rows_delivered);
        let path = self.archive.store(
            Utc::now().date_naive(),
            self.journal.run_id(),
            bytes,
            &manifest,
        )?;
        self.store.mark_archived(&batch.batch_id).await?;

        let work = self.work_path(&record.file_name);
        if work.exists() {
            fs::remove_file(&work)
                .with_context(|| format!("Failed to remove work copy {}", work.display()))?;
        }

        self.journal.emit(
            AuditEvent::BatchArchived,
            Some(&batch.batch_id),
            Some(&record.file_name),
            format!("Archived to {}", path.display()),
        );
        Ok(())
    }

    /// A staged batch with no selected rows left
    async fn settle_empty(&self, batch: &Batch) -> Result<BatchOutcome> {
        let record = self.store.delivery_record(&batch.batch_id).await?;
        if let Some(record) = record.filter(|r| r.outcome == DeliveryOutcome::Delivered) {
            self.store.mark_delivered(&batch.batch_id).await?;
            return Ok(BatchOutcome::AlreadyDelivered {
                file_name: record.file_name,
            });
        }

        tracing::warn!(batch_id = %batch.batch_id, "Staged batch has no selected rows");
        self.store.mark_failed(&batch.batch_id, &[]).await?;
        Ok(BatchOutcome::Quarantined { rows_failed: 0 })
    }

    /// Archives delivered batches an earlier run did not get to archive
    async fn finish_pending_archives(&self, summary: &mut ConnectorSummary) -> Result<()> {
        let filter = BatchFilter {
            state: Some(BatchState::Delivered),
            site: None,
        };
        let pending = self
            .store
            .list_batches(&filter, self.settings.max_batches_per_run)
            .await?;

        for batch in pending {
            let Some(record) = self.store.delivery_record(&batch.batch_id).await? else {
                continue;
            };
            let work = self.work_path(&record.file_name);
            let bytes = match fs::read(&work) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(
                        batch_id = %batch.batch_id,
                        path = %work.display(),
                        error = %e,
                        "Work copy missing, cannot archive delivered batch"
                    );
                    continue;
                }
            };

            let rows_delivered = batch.row_count();
            match self.archive_batch(&batch, &bytes, &record, rows_delivered).await {
                Ok(()) => summary.batches_archived += 1,
                Err(e @ BridgeError::RowStore(_)) => return Err(e),
                Err(e) => summary.add_failure(batch.batch_id.clone(), e.to_string()),
            }
        }

        Ok(())
    }
}
