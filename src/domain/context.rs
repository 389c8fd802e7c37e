//! Error context extension trait
//!
//! Adds `.context()` and `.with_context()` to any `Result` whose error
//! converts into [`BridgeError`], so library code can annotate failures
//! without switching to `anyhow`.
//!
//! # Examples
//!
//! ```rust
//! use labelbridge::domain::Result;
//! use labelbridge::domain::context::ResultExt;
//!
//! fn read_manifest(path: &str) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .with_context(|| format!("Failed to read manifest {path}"))
//! }
//! ```

use crate::domain::errors::BridgeError;
use crate::domain::result::Result;

/// Extension trait for adding context to `Result` types
pub trait ResultExt<T> {
    /// Add context to an error (evaluated eagerly)
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    /// Add context to an error, computed only when an error occurs
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<BridgeError>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| wrap(e.into(), context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| wrap(e.into(), f()))
    }
}

// Local I/O keeps its variant so retry classification survives the added context.
fn wrap(err: BridgeError, context: impl std::fmt::Display) -> BridgeError {
    match err {
        BridgeError::Io(msg) => BridgeError::Io(format!("{context}: {msg}")),
        other => BridgeError::Other(format!("{context}: {other}")),
    }
}
