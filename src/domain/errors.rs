//! Domain error types
//!
//! This module defines the error hierarchy for labelbridge. Errors are
//! domain-specific and never expose driver or filesystem types directly.
//!
//! Per-row validation failures are not errors: they are carried as
//! [`ValidationResult`](crate::core::validation::ValidationResult) values and
//! routed to quarantine.

use thiserror::Error;

/// Main labelbridge error type
///
/// This is the primary error type used throughout the application.
/// It wraps the row store and delivery sink errors and carries the
/// pipeline-level outcomes that callers branch on.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Row store errors (connectivity or consistency)
    #[error("Row store error: {0}")]
    RowStore(#[from] RowStoreError),

    /// Delivery sink errors (watch directory I/O)
    #[error("Delivery sink error: {0}")]
    DeliverySink(#[from] DeliverySinkError),

    /// Another invocation claimed the same rows or holds the delivery lease
    #[error("Concurrent claim on {target}: {reason}")]
    ConcurrentClaim { target: String, reason: String },

    /// The batch already has a delivered file
    #[error("Batch {batch_id} already delivered as {file_name}")]
    AlreadyDelivered { batch_id: String, file_name: String },

    /// Invalid input to a domain constructor
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rendering errors (CSV encoding)
    #[error("Render error: {0}")]
    Render(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local I/O errors (work, archive and quarantine folders)
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Whether the next scheduled run may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::RowStore(e) => e.is_retryable(),
            BridgeError::DeliverySink(_) => true,
            BridgeError::ConcurrentClaim { .. } => true,
            BridgeError::Io(_) => true,
            _ => false,
        }
    }

    /// Creates a concurrent claim error
    pub fn concurrent_claim(target: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::ConcurrentClaim {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Row store errors
///
/// Errors that occur when talking to the upstream database.
/// These errors don't expose the PostgreSQL driver types.
#[derive(Debug, Error)]
pub enum RowStoreError {
    /// Failed to obtain a connection
    #[error("Failed to connect to row store: {0}")]
    ConnectionFailed(String),

    /// A query or statement failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// The statement or pool wait timed out
    #[error("Row store timeout: {0}")]
    Timeout(String),

    /// Stored data does not match the expected shape
    #[error("Inconsistent row store data: {0}")]
    Inconsistent(String),

    /// Schema migration failed
    #[error("Schema migration failed: {0}")]
    Migration(String),
}

impl RowStoreError {
    /// Connectivity and timeouts are retryable; inconsistent data is not
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RowStoreError::ConnectionFailed(_)
                | RowStoreError::QueryFailed(_)
                | RowStoreError::Timeout(_)
        )
    }
}

/// Delivery sink errors
///
/// Errors that occur when writing into the watch directory. The directory is
/// usually a remote mount, so every variant is treated as retryable.
#[derive(Debug, Error)]
pub enum DeliverySinkError {
    /// The watch directory or its mount is not reachable
    #[error("Watch directory unreachable: {0}")]
    Unreachable(String),

    /// Writing the temporary file failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The atomic rename into the watch directory failed
    #[error("Rename failed: {0}")]
    RenameFailed(String),

    /// The watch directory is not writable
    #[error("Watch directory not writable: {0}")]
    NotWritable(String),

    /// A filesystem call exceeded the configured timeout
    #[error("Sink operation timed out after {0}s")]
    Timeout(u64),
}

// Conversion from std::io::Error
impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        BridgeError::Configuration(format!("TOML parse error: {err}"))
    }
}

// Conversion from csv writer errors
impl From<csv::Error> for BridgeError {
    fn from(err: csv::Error) -> Self {
        BridgeError::Render(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_display() {
        let err = BridgeError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");
    }

    #[test]
    fn test_row_store_error_conversion() {
        let store_err = RowStoreError::ConnectionFailed("refused".to_string());
        let err: BridgeError = store_err.into();
        assert!(matches!(err, BridgeError::RowStore(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_inconsistent_data_is_not_retryable() {
        let err: BridgeError = RowStoreError::Inconsistent("bad state".to_string()).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_sink_error_conversion() {
        let sink_err = DeliverySinkError::Timeout(30);
        let err: BridgeError = sink_err.into();
        assert!(matches!(err, BridgeError::DeliverySink(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_concurrent_claim_display() {
        let err = BridgeError::concurrent_claim("20250101-0003-ABC-001", "rows already selected");
        assert!(err.to_string().contains("20250101-0003-ABC-001"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_already_delivered_is_not_retryable() {
        let err = BridgeError::AlreadyDelivered {
            batch_id: "b".to_string(),
            file_name: "f.csv".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: BridgeError = io_err.into();
        assert!(matches!(err, BridgeError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: BridgeError = toml_err.into();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(err.to_string().contains("TOML parse error"));
    }
}
