//! Delivery sink abstraction
//!
//! A sink is the watch directory the print automation tool polls. Files must
//! appear there complete or not at all, and an existing file is never
//! overwritten.

pub mod fs;

use crate::domain::DeliverySinkError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use fs::FsSink;

/// Result of a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkWrite {
    /// The file was written and renamed into place
    Written { path: PathBuf },
    /// A file with the same name was already in the watch directory
    AlreadyPresent { path: PathBuf },
}

impl SinkWrite {
    pub fn path(&self) -> &Path {
        match self {
            SinkWrite::Written { path } | SinkWrite::AlreadyPresent { path } => path,
        }
    }
}

/// Watch-directory client
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Human-readable location for logs
    fn describe(&self) -> String;

    /// Final path a file of this name is delivered to
    fn target_path(&self, file_name: &str) -> PathBuf;

    /// Checks the watch and staging directories are reachable and writable
    async fn probe(&self) -> Result<(), DeliverySinkError>;

    /// Whether a file of this name is already in the watch directory
    async fn exists(&self, file_name: &str) -> Result<bool, DeliverySinkError>;

    /// Writes `bytes` to a temporary file and renames it to `file_name`
    ///
    /// Returns [`SinkWrite::AlreadyPresent`] without writing when the final
    /// file exists.
    async fn deliver(&self, file_name: &str, bytes: &[u8])
        -> Result<SinkWrite, DeliverySinkError>;
}
