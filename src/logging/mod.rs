//! Logging and observability
//!
//! Two channels:
//! - `tracing` diagnostics, console plus JSON rolling files ([`init_logging`])
//! - the audit journal of batch outcomes ([`audit::AuditJournal`])
//!
//! # Example
//!
//! ```no_run
//! use labelbridge::logging::init_logging;
//! use labelbridge::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```

pub mod audit;
pub mod structured;

// Re-export commonly used items
pub use audit::{AuditEntry, AuditEvent, AuditJournal, AuditLevel};
pub use structured::{init_logging, LoggingGuard};

/// Log a batch lifecycle event
///
/// # Example
///
/// ```no_run
/// use labelbridge::log_batch_event;
/// use labelbridge::domain::BatchId;
///
/// let batch_id = BatchId::new("20250314-0002-1-001").unwrap();
/// log_batch_event!(&batch_id, "delivered", rows = 2);
/// ```
#[macro_export]
macro_rules! log_batch_event {
    ($batch_id:expr, $event:expr) => {
        tracing::info!(batch_id = %$batch_id, event = $event, "Batch event");
    };
    ($batch_id:expr, $event:expr, $($field:tt)+) => {
        tracing::info!(batch_id = %$batch_id, event = $event, $($field)+, "Batch event");
    };
}

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use labelbridge::log_retry_attempt;
///
/// log_retry_attempt!(2, 3, "Watch directory unreachable");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($attempt:expr, $max_attempts:expr, $reason:expr) => {
        tracing::warn!(
            attempt = $attempt,
            max_attempts = $max_attempts,
            reason = %$reason,
            "Retrying operation"
        );
    };
}
