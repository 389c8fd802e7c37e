//! Core pipeline logic for labelbridge.
//!
//! # Modules
//!
//! - [`selector`] - Claims ready rows into staged batches
//! - [`connector`] - Validates, renders, delivers, archives and quarantines
//! - [`validation`] - The print contract
//! - [`checksum`] - SHA-256 of delivered files
//! - [`housekeeping`] - Retention pruning of archive and quarantine trees
//!
//! # Pipeline
//!
//! 1. **Select**: group `ready` rows by site and date, claim up to `batch_size`
//! 2. **Validate**: check every row of a staged batch against the contract
//! 3. **Render**: valid rows become one CSV file
//! 4. **Deliver**: temp write plus atomic rename into the watch folder
//! 5. **Settle**: mark rows, archive the file, quarantine rejects
//!
//! # Example
//!
//! ```rust,no_run
//! use labelbridge::adapters::memory::MemoryRowStore;
//! use labelbridge::adapters::sink::FsSink;
//! use labelbridge::config::load_config;
//! use labelbridge::core::connector::{Connector, ConnectorSettings};
//! use labelbridge::core::selector::Selector;
//! use labelbridge::domain::RunId;
//! use labelbridge::logging::AuditJournal;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("labelbridge.toml")?;
//! let store = Arc::new(MemoryRowStore::new());
//! let journal = Arc::new(AuditJournal::open(&config.storage.audit_dir, RunId::generate())?);
//!
//! Selector::new(store.clone(), config.selector.clone(), journal.clone())
//!     .run()
//!     .await?;
//!
//! let sink = Arc::new(FsSink::new(&config.delivery));
//! let summary = Connector::new(store, sink, journal, ConnectorSettings::from_config(&config)?)
//!     .run()
//!     .await?;
//!
//! println!("Delivered: {}", summary.batches_delivered);
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod connector;
pub mod housekeeping;
pub mod selector;
pub mod validation;

