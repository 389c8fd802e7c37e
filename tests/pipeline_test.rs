//! End-to-end pipeline tests against the in-memory row store and a
//! temporary watch folder

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use labelbridge::adapters::memory::MemoryRowStore;
use labelbridge::adapters::sink::{DeliverySink, FsSink, SinkWrite};
use labelbridge::adapters::store::RowStore;
use labelbridge::config::{DeliveryConfig, StorageConfig};
use labelbridge::core::connector::quarantine::read_report;
use labelbridge::core::connector::{BatchOutcome, Connector, ConnectorSettings};
use labelbridge::core::selector::Selector;
use labelbridge::core::validation::Contract;
use labelbridge::config::SelectorConfig;
use labelbridge::domain::{
    BatchId, BatchState, BridgeError, DeliveryOutcome, DeliveryRecord, DeliverySinkError,
    GroupingKey, RowBuilder, RowId, RowState, RunId,
};
use labelbridge::logging::audit::read_entries;
use labelbridge::logging::{AuditEvent, AuditJournal};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Wraps the directory sink and fails the first `failures` deliveries
struct FlakySink {
    inner: FsSink,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakySink {
    fn new(inner: FsSink, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliverySink for FlakySink {
    fn describe(&self) -> String {
        format!("flaky {}", self.inner.describe())
    }

    fn target_path(&self, file_name: &str) -> PathBuf {
        self.inner.target_path(file_name)
    }

    async fn probe(&self) -> Result<(), DeliverySinkError> {
        self.inner.probe().await
    }

    async fn exists(&self, file_name: &str) -> Result<bool, DeliverySinkError> {
        self.inner.exists(file_name).await
    }

    async fn deliver(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<SinkWrite, DeliverySinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(DeliverySinkError::Unreachable("simulated outage".to_string()));
        }
        self.inner.deliver(file_name, bytes).await
    }
}

struct Harness {
    root: TempDir,
    store: Arc<MemoryRowStore>,
}

impl Harness {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("watch")).unwrap();
        Self {
            root,
            store: Arc::new(MemoryRowStore::new()),
        }
    }

    fn watch_dir(&self) -> PathBuf {
        self.root.path().join("watch")
    }

    fn storage(&self) -> StorageConfig {
        StorageConfig::under(self.root.path().join("state"))
    }

    fn delivery(&self) -> DeliveryConfig {
        let mut delivery = DeliveryConfig::new(self.watch_dir());
        delivery.retry_backoff_ms = vec![0];
        delivery.io_timeout_seconds = 5;
        delivery
    }

    fn settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            contract: Contract::default(),
            max_batches_per_run: 100,
            allow_partial_delivery: true,
            delivery: self.delivery(),
            storage: self.storage(),
            dry_run: false,
        }
    }

    fn journal(&self, run_id: &str) -> Arc<AuditJournal> {
        Arc::new(AuditJournal::open(self.storage().audit_dir, RunId::from(run_id)).unwrap())
    }

    fn fs_sink(&self) -> FsSink {
        FsSink::new(&self.delivery())
    }

    fn seed(&self, id: i64, qty: Value) {
        let row = RowBuilder::new(id, "1", date())
            .field("template_name", json!("SOUP"))
            .field("language", json!("en"))
            .field("product_name", json!(format!("Soup {id}")))
            .field("allergens_short", json!("celery"))
            .field("qty", qty)
            .created_at(Utc::now() + chrono::Duration::milliseconds(id))
            .build()
            .unwrap();
        self.store.insert_row(row).unwrap();
    }

    async fn select(&self) -> Vec<BatchId> {
        Selector::new(
            self.store.clone(),
            SelectorConfig {
                sites: vec![],
                batch_size: 500,
            },
            self.journal("select-run"),
        )
        .run()
        .await
        .unwrap()
        .batches
    }

    fn connector(&self, sink: Arc<dyn DeliverySink>, run_id: &str) -> Connector {
        Connector::new(self.store.clone(), sink, self.journal(run_id), self.settings())
    }

    fn row_state(&self, id: i64) -> RowState {
        self.store.row(RowId::new(id)).unwrap().unwrap().state
    }

    fn batch_state(&self, batch_id: &BatchId) -> BatchState {
        self.store.batch(batch_id).unwrap().unwrap().state
    }

    fn delivered_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.watch_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        files
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if !dir.exists() {
        return found;
    }
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            found.extend(files_under(&path));
        } else {
            found.push(path);
        }
    }
    found
}

#[tokio::test]
async fn test_partial_batch_delivers_valid_rows_and_quarantines_the_rest() {
    let h = Harness::new();
    h.seed(1, json!(4));
    h.seed(2, json!(1000));
    h.seed(3, json!(2));

    let batches = h.select().await;
    assert_eq!(batches.len(), 1);
    let batch_id = &batches[0];
    assert_eq!(batch_id.as_str(), "20250314-0003-1-001");

    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let summary = h.connector(sink, "run-1").run().await.unwrap();

    assert_eq!(summary.batches_delivered, 1);
    assert_eq!(summary.rows_delivered, 2);
    assert_eq!(summary.rows_failed, 1);

    let files = h.delivered_files();
    assert_eq!(files.len(), 1);
    assert_eq!(
        files[0].file_name().unwrap().to_str().unwrap(),
        "1-20250314-0003-1-001.csv"
    );
    let csv = std::fs::read_to_string(&files[0]).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "batch_id,site,template_name,language,product_name,allergens_short,qty"
    );
    assert!(lines[1].ends_with(",Soup 1,celery,4"));
    assert!(lines[2].ends_with(",Soup 3,celery,2"));

    assert_eq!(h.row_state(1), RowState::Delivered);
    assert_eq!(h.row_state(2), RowState::Failed);
    assert_eq!(h.row_state(3), RowState::Delivered);
    let failed = h.store.row(RowId::new(2)).unwrap().unwrap();
    assert_eq!(failed.error_reason.as_deref(), Some("quantity_out_of_range"));

    let report_path = h
        .storage()
        .quarantine_dir
        .join("run-1")
        .join("1")
        .join("1-20250314-0003-1-001.csv.error.json");
    let report = read_report(&report_path).unwrap();
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].row_id, 2);
    assert_eq!(report.rows[0].reason, "quantity_out_of_range");

    assert_eq!(h.batch_state(batch_id), BatchState::Archived);
    let archived = h
        .storage()
        .archive_dir
        .join(Utc::now().format("%Y%m%d").to_string())
        .join("run-1")
        .join("1-20250314-0003-1-001.csv");
    assert_eq!(std::fs::read_to_string(archived).unwrap(), csv);

    // The work copy is gone once archived
    assert!(files_under(&h.storage().work_dir).is_empty());
}

#[tokio::test]
async fn test_no_row_stays_selected_after_a_clean_run() {
    let h = Harness::new();
    h.seed(1, json!(1));
    h.seed(2, json!("abc"));
    h.seed(3, json!(999));

    h.select().await;
    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    h.connector(sink, "run-1").run().await.unwrap();

    for row in h.store.rows().unwrap() {
        assert!(
            matches!(row.state, RowState::Delivered | RowState::Failed),
            "row {} left in {:?}",
            row.id,
            row.state
        );
    }
}

#[tokio::test]
async fn test_sink_recovers_within_retry_bound() {
    let h = Harness::new();
    h.seed(1, json!(3));
    h.seed(2, json!(5));
    let batch_id = h.select().await.remove(0);

    let sink = Arc::new(FlakySink::new(h.fs_sink(), 2));
    let summary = h.connector(sink.clone(), "run-1").run().await.unwrap();

    assert_eq!(sink.calls(), 3);
    assert_eq!(summary.batches_delivered, 1);
    assert_eq!(summary.batches_deferred, 0);
    assert_eq!(h.delivered_files().len(), 1);
    assert_eq!(h.batch_state(&batch_id), BatchState::Archived);
    assert!(files_under(&h.storage().quarantine_dir).is_empty());

    let record = h.store.delivery_record(&batch_id).await.unwrap().unwrap();
    assert_eq!(record.outcome, DeliveryOutcome::Delivered);
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn test_sink_down_for_every_attempt_defers_then_next_run_delivers() {
    let h = Harness::new();
    h.seed(1, json!(3));
    h.seed(2, json!(5));
    let batch_id = h.select().await.remove(0);

    let down = Arc::new(FlakySink::new(h.fs_sink(), u32::MAX));
    let summary = h.connector(down.clone(), "run-1").run().await.unwrap();

    assert_eq!(down.calls(), 3);
    assert_eq!(summary.batches_deferred, 1);
    assert!(summary.has_batch_failures());
    assert_eq!(h.batch_state(&batch_id), BatchState::Staged);
    assert_eq!(h.row_state(1), RowState::Selected);
    assert_eq!(h.row_state(2), RowState::Selected);
    assert!(h.delivered_files().is_empty());
    assert!(files_under(&h.storage().archive_dir).is_empty());
    assert!(files_under(&h.storage().quarantine_dir).is_empty());

    let record = h.store.delivery_record(&batch_id).await.unwrap().unwrap();
    assert_eq!(record.outcome, DeliveryOutcome::Failed);

    let up = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let summary = h.connector(up, "run-2").run().await.unwrap();

    assert_eq!(summary.batches_delivered, 1);
    assert_eq!(h.delivered_files().len(), 1);
    assert_eq!(h.row_state(1), RowState::Delivered);
    assert_eq!(h.batch_state(&batch_id), BatchState::Archived);
}

#[tokio::test]
async fn test_missing_watch_folder_is_retried_on_the_next_run() {
    let h = Harness::new();
    std::fs::remove_dir_all(h.watch_dir()).unwrap();
    h.seed(1, json!(3));
    let batch_id = h.select().await.remove(0);

    let summary = h
        .connector(Arc::new(h.fs_sink()), "run-1")
        .run()
        .await
        .unwrap();
    assert_eq!(summary.batches_deferred, 1);
    assert_eq!(h.batch_state(&batch_id), BatchState::Staged);

    std::fs::create_dir_all(h.watch_dir()).unwrap();
    let summary = h
        .connector(Arc::new(h.fs_sink()), "run-2")
        .run()
        .await
        .unwrap();
    assert_eq!(summary.batches_delivered, 1);
    assert_eq!(h.delivered_files().len(), 1);
}

#[tokio::test]
async fn test_rerun_after_success_is_a_no_op() {
    let h = Harness::new();
    h.seed(1, json!(3));
    h.select().await;

    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    h.connector(sink.clone(), "run-1").run().await.unwrap();
    let first = std::fs::read(&h.delivered_files()[0]).unwrap();

    let summary = h.connector(sink.clone(), "run-2").run().await.unwrap();

    assert_eq!(summary.batches_seen, 0);
    assert_eq!(sink.calls(), 1);
    let files = h.delivered_files();
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&files[0]).unwrap(), first);
}

#[tokio::test]
async fn test_recorded_delivery_is_not_delivered_again() {
    let h = Harness::new();
    h.seed(1, json!(3));
    h.seed(2, json!(4));
    let batch_id = h.select().await.remove(0);
    let batch = h.store.batch(&batch_id).unwrap().unwrap();

    // A run that delivered and recorded the file, then died before marking rows
    let lease = DeliveryRecord::lease(
        batch_id.clone(),
        batch.file_name(),
        h.watch_dir().join(batch.file_name()).display().to_string(),
        10,
        "feed",
        RunId::from("crashed-run"),
    );
    h.store
        .begin_delivery(&lease, chrono::Duration::minutes(15))
        .await
        .unwrap();
    h.store
        .complete_delivery(&lease.settle(DeliveryOutcome::Delivered, 1))
        .await
        .unwrap();

    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let outcome = h
        .connector(sink.clone(), "run-2")
        .process_batch(&batch)
        .await
        .unwrap();

    assert!(matches!(outcome, BatchOutcome::AlreadyDelivered { .. }));
    assert_eq!(sink.calls(), 0);
    assert!(h.delivered_files().is_empty());
    assert_eq!(h.row_state(1), RowState::Delivered);
    assert_eq!(h.row_state(2), RowState::Delivered);
    assert_eq!(h.batch_state(&batch_id), BatchState::Archived);

    let entries = read_entries(h.storage().audit_dir, Utc::now().date_naive()).unwrap();
    assert!(entries
        .iter()
        .any(|e| e.event == AuditEvent::AlreadyDelivered && e.batch_id == batch_id.as_str()));
}

#[tokio::test]
async fn test_file_already_in_watch_folder_is_kept() {
    let h = Harness::new();
    h.seed(1, json!(3));
    let batch_id = h.select().await.remove(0);
    let batch = h.store.batch(&batch_id).unwrap().unwrap();

    // Renamed into place by a run that died before recording it
    let existing = h.watch_dir().join(batch.file_name());
    std::fs::write(&existing, "earlier copy\n").unwrap();

    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let summary = h.connector(sink, "run-2").run().await.unwrap();

    assert_eq!(summary.batches_delivered, 1);
    assert_eq!(h.delivered_files().len(), 1);
    assert_eq!(std::fs::read_to_string(&existing).unwrap(), "earlier copy\n");
    assert_eq!(h.row_state(1), RowState::Delivered);
}

#[tokio::test]
async fn test_batch_without_valid_rows_renders_nothing() {
    let h = Harness::new();
    h.seed(1, json!(0));
    h.seed(2, json!("many"));
    let batch_id = h.select().await.remove(0);

    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let summary = h.connector(sink.clone(), "run-1").run().await.unwrap();

    assert_eq!(summary.batches_quarantined, 1);
    assert_eq!(summary.rows_failed, 2);
    assert_eq!(sink.calls(), 0);
    assert!(h.delivered_files().is_empty());
    assert!(files_under(&h.storage().work_dir).is_empty());
    assert!(files_under(&h.storage().archive_dir).is_empty());
    assert_eq!(h.batch_state(&batch_id), BatchState::Failed);

    let report = read_report(
        &h.storage()
            .quarantine_dir
            .join("run-1")
            .join("1")
            .join("1-20250314-0002-1-001.csv.error.json"),
    )
    .unwrap();
    let reasons: Vec<&str> = report.rows.iter().map(|r| r.reason.as_str()).collect();
    assert_eq!(reasons, vec!["quantity_out_of_range", "quantity_not_integer"]);

    for id in [1, 2] {
        let row = h.store.row(RowId::new(id)).unwrap().unwrap();
        assert_eq!(row.state, RowState::Failed);
        assert!(row.error_reason.unwrap().starts_with("quantity_"));
    }
}

#[tokio::test]
async fn test_partial_delivery_disabled_voids_the_batch() {
    let h = Harness::new();
    h.seed(1, json!(2));
    h.seed(2, json!(0));
    let batch_id = h.select().await.remove(0);

    let mut settings = h.settings();
    settings.allow_partial_delivery = false;
    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let summary = Connector::new(h.store.clone(), sink, h.journal("run-1"), settings)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.batches_quarantined, 1);
    assert!(h.delivered_files().is_empty());
    assert_eq!(h.row_state(1), RowState::Failed);
    assert_eq!(
        h.store.row(RowId::new(1)).unwrap().unwrap().error_reason.as_deref(),
        Some("batch_rejected")
    );
    assert_eq!(h.batch_state(&batch_id), BatchState::Failed);
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let h = Harness::new();
    h.seed(1, json!(1));
    h.seed(2, json!(1));
    let key = GroupingKey::new("1", date()).unwrap();
    let rows = vec![RowId::new(1), RowId::new(2)];

    let (a, b) = tokio::join!(h.store.claim(&key, &rows), h.store.claim(&key, &rows));

    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(BridgeError::ConcurrentClaim { .. })))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);

    // The losing claim left no second batch behind
    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let summary = h.connector(sink.clone(), "run-1").run().await.unwrap();
    assert_eq!(summary.batches_seen, 1);
    assert_eq!(sink.calls(), 1);
    assert_eq!(h.delivered_files().len(), 1);
}

#[tokio::test]
async fn test_dry_run_leaves_everything_in_place() {
    let h = Harness::new();
    h.seed(1, json!(1));
    h.seed(2, json!(0));
    let batch_id = h.select().await.remove(0);

    let mut settings = h.settings();
    settings.dry_run = true;
    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let summary = Connector::new(
        h.store.clone(),
        sink.clone(),
        Arc::new(AuditJournal::disabled(RunId::from("dry"))),
        settings,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.batches_seen, 1);
    assert!(!summary.has_batch_failures());
    assert_eq!(sink.calls(), 0);
    assert!(h.delivered_files().is_empty());
    assert!(files_under(&h.storage().quarantine_dir).is_empty());
    assert_eq!(h.batch_state(&batch_id), BatchState::Staged);
    assert_eq!(h.row_state(1), RowState::Selected);
    assert_eq!(h.row_state(2), RowState::Selected);
}

#[tokio::test]
async fn test_row_store_outage_aborts_the_run() {
    let h = Harness::new();
    h.seed(1, json!(1));
    h.select().await;
    h.store.set_unavailable(true);

    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let err = h.connector(sink, "run-1").run().await.unwrap_err();

    assert!(matches!(err, BridgeError::RowStore(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_shutdown_leaves_batches_staged() {
    let h = Harness::new();
    h.seed(1, json!(1));
    let batch_id = h.select().await.remove(0);

    let (tx, rx) = tokio::sync::watch::channel(false);
    tx.send(true).unwrap();
    let sink = Arc::new(FlakySink::new(h.fs_sink(), 0));
    let summary = h
        .connector(sink.clone(), "run-1")
        .with_shutdown(rx)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.batches_delivered, 0);
    assert_eq!(sink.calls(), 0);
    assert_eq!(h.batch_state(&batch_id), BatchState::Staged);
}

#[tokio::test]
async fn test_audit_journal_records_the_batch_lifecycle() {
    let h = Harness::new();
    h.seed(1, json!(2));
    h.seed(2, json!(0));
    h.select().await;

    let sink = Arc::new(FlakySink::new(h.fs_sink(), 1));
    h.connector(sink, "run-1").run().await.unwrap();

    let events: Vec<AuditEvent> = read_entries(h.storage().audit_dir, Utc::now().date_naive())
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();

    for expected in [
        AuditEvent::BatchCreated,
        AuditEvent::BatchCopied,
        AuditEvent::ValidationFailed,
        AuditEvent::BatchArchived,
    ] {
        assert!(events.contains(&expected), "missing {expected:?} in {events:?}");
    }
}
