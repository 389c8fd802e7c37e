//! CLI command implementations
//!
//! Exit codes: 0 success, 1 completed with batch failures, 2 configuration
//! error, 4 connection error, 5 fatal.

pub mod connect;
pub mod init;
pub mod probe;
pub mod prune;
pub mod run;
pub mod select;
pub mod status;
pub mod validate;

use crate::adapters::sink::{DeliverySink, FsSink};
use crate::adapters::store::{create_row_store, RowStore};
use crate::config::{load_config, BridgeConfig};
use crate::core::connector::{Connector, ConnectorSettings, ConnectorSummary};
use crate::core::selector::{SelectionSummary, Selector};
use crate::domain::{BridgeError, RowStoreError, RunId};
use crate::logging::{AuditEvent, AuditJournal};
use std::sync::Arc;
use tokio::sync::watch;

pub const EXIT_OK: i32 = 0;
pub const EXIT_BATCH_FAILURES: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_CONNECTION: i32 = 4;
pub const EXIT_FATAL: i32 = 5;

/// Maps an error onto the process exit code
pub fn exit_code_for(err: &BridgeError) -> i32 {
    match err {
        BridgeError::Configuration(_) => EXIT_CONFIG,
        BridgeError::RowStore(RowStoreError::ConnectionFailed(_) | RowStoreError::Timeout(_)) => {
            EXIT_CONNECTION
        }
        BridgeError::DeliverySink(_) => EXIT_CONNECTION,
        _ => EXIT_FATAL,
    }
}

/// Loads the configuration, printing the failure on error
pub(crate) fn load_or_report(config_path: &str) -> Result<BridgeConfig, i32> {
    load_config(config_path).map_err(|e| {
        tracing::error!(error = %e, config_path = %config_path, "Failed to load configuration");
        eprintln!("❌ Failed to load configuration file: {e}");
        EXIT_CONFIG
    })
}

/// Connects to the row store and applies the bundled schema
pub(crate) async fn connect_store(config: &BridgeConfig) -> Result<Arc<dyn RowStore>, i32> {
    let store = match create_row_store(&config.database).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("❌ Failed to create row store client: {e}");
            return Err(exit_code_for(&e));
        }
    };

    if let Err(e) = store.test_connection().await {
        tracing::error!(error = %e, "Row store unreachable");
        eprintln!("❌ Failed to connect to the row store: {e}");
        return Err(EXIT_CONNECTION);
    }

    if let Err(e) = store.ensure_schema().await {
        tracing::error!(error = %e, "Schema migration failed");
        eprintln!("❌ Failed to apply the row store schema: {e}");
        return Err(exit_code_for(&e));
    }

    Ok(store)
}

/// Which stages a pipeline invocation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stages {
    pub select: bool,
    pub connect: bool,
}

/// Outcome of [`run_pipeline`]
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub selection: Option<SelectionSummary>,
    pub delivery: Option<ConnectorSummary>,
}

impl PipelineReport {
    pub fn exit_code(&self) -> i32 {
        match &self.delivery {
            Some(summary) if summary.has_batch_failures() => EXIT_BATCH_FAILURES,
            _ => EXIT_OK,
        }
    }
}

/// Runs the selected stages against an already built store and sink
///
/// Journals `RUN_STARTED`, then `RUN_COMPLETED` or `RUN_FAILED`.
pub async fn run_pipeline(
    config: &BridgeConfig,
    store: Arc<dyn RowStore>,
    sink: Arc<dyn DeliverySink>,
    journal: Arc<AuditJournal>,
    stages: Stages,
    shutdown: watch::Receiver<bool>,
) -> crate::domain::Result<PipelineReport> {
    let run_id = journal.run_id().clone();
    tracing::info!(run_id = %run_id, select = stages.select, connect = stages.connect, "Run started");
    journal.emit(
        AuditEvent::RunStarted,
        None,
        None,
        format!(
            "Select={} Connect={} DryRun={}",
            stages.select, stages.connect, config.application.dry_run
        ),
    );

    let result = async {
        let mut report = PipelineReport::default();

        if stages.select {
            let summary = Selector::new(store.clone(), config.selector.clone(), journal.clone())
                .with_shutdown(shutdown.clone())
                .run()
                .await?;
            summary.log_summary();
            report.selection = Some(summary);
        }

        if stages.connect && !*shutdown.borrow() {
            let settings = ConnectorSettings::from_config(config)?;
            let summary = Connector::new(store.clone(), sink.clone(), journal.clone(), settings)
                .with_shutdown(shutdown.clone())
                .run()
                .await?;
            summary.log_summary();
            report.delivery = Some(summary);
        }

        Ok::<_, BridgeError>(report)
    }
    .await;

    match &result {
        Ok(report) => journal.emit(
            AuditEvent::RunCompleted,
            None,
            None,
            format!(
                "Batches={} Delivered={} Failed={}",
                report.selection.as_ref().map_or(0, |s| s.batches.len()),
                report.delivery.as_ref().map_or(0, |d| d.batches_delivered),
                report.delivery.as_ref().map_or(0, |d| d.failures.len()),
            ),
        ),
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Run failed");
            journal.emit(AuditEvent::RunFailed, None, None, e.to_string());
        }
    }

    result
}

/// Shared body of `select`, `connect` and `run`
pub(crate) async fn execute_stages(
    config_path: &str,
    stages: Stages,
    dry_run: bool,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<i32> {
    let mut config = match load_or_report(config_path) {
        Ok(config) => config,
        Err(code) => return Ok(code),
    };
    if dry_run {
        tracing::info!("Enabling dry-run mode from CLI");
        config.application.dry_run = true;
    }

    let dry_run = config.application.dry_run;
    // A dry run never claims rows
    let stages = Stages {
        select: stages.select && !dry_run,
        connect: stages.connect,
    };
    if dry_run {
        println!("🔍 DRY RUN MODE - nothing is claimed, delivered or marked");
        println!();
    }

    let store = match connect_store(&config).await {
        Ok(store) => store,
        Err(code) => return Ok(code),
    };

    let run_id = RunId::generate();
    let journal = if dry_run {
        AuditJournal::disabled(run_id)
    } else {
        match AuditJournal::open(&config.storage.audit_dir, run_id) {
            Ok(journal) => journal,
            Err(e) => {
                eprintln!("❌ Failed to open the audit journal: {e}");
                return Ok(EXIT_FATAL);
            }
        }
    };

    let sink: Arc<dyn DeliverySink> = Arc::new(FsSink::new(&config.delivery));
    let report = match run_pipeline(
        &config,
        store,
        sink,
        Arc::new(journal),
        stages,
        shutdown,
    )
    .await
    {
        Ok(report) => report,
        Err(e) => {
            eprintln!("❌ Run failed: {e}");
            return Ok(exit_code_for(&e));
        }
    };

    print_report(&report);
    Ok(report.exit_code())
}

fn print_report(report: &PipelineReport) {
    if let Some(selection) = &report.selection {
        println!("📦 Selection:");
        println!("  Grouping keys: {}", selection.keys_scanned);
        println!("  Batches created: {}", selection.batches.len());
        println!("  Rows claimed: {}", selection.rows_claimed);
        println!("  Conflicts: {}", selection.conflicts);
        println!("  Keys skipped: {}", selection.keys_skipped);
        println!("  Rows with blank site: {}", selection.rows_unkeyed);
        println!();
    }

    if let Some(delivery) = &report.delivery {
        println!("🚚 Delivery:");
        println!("  Staged batches: {}", delivery.batches_seen);
        println!("  Delivered: {}", delivery.batches_delivered);
        println!("  Already delivered: {}", delivery.batches_already_delivered);
        println!("  Quarantined: {}", delivery.batches_quarantined);
        println!("  Deferred: {}", delivery.batches_deferred);
        println!("  Conflicts: {}", delivery.batches_conflicted);
        println!("  Rows delivered: {}", delivery.rows_delivered);
        println!("  Rows failed: {}", delivery.rows_failed);
        println!("  Duration: {:.2}s", delivery.duration.as_secs_f64());
        println!();

        for failure in &delivery.failures {
            println!("  ⚠️  {}: {}", failure.batch_id, failure.message);
        }
    }

    if report.exit_code() == EXIT_OK {
        println!("✅ Run completed successfully");
    } else {
        println!("⚠️  Run completed with batch failures");
    }
}
