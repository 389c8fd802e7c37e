// Labelbridge - Print queue to label printer delivery
// Copyright (c) 2025 Labelbridge Contributors
// Licensed under the MIT License

//! # labelbridge
//!
//! labelbridge moves label print requests from a PostgreSQL queue into the
//! watch folder of a label printing application.
//!
//! ## Overview
//!
//! Each invocation is short-lived and driven by an external scheduler:
//! - **Selecting** groups `ready` rows by site and production date and claims
//!   them into a staged batch with a deterministic batch id
//! - **Validating** checks every row of a batch against the print contract
//! - **Delivering** renders the valid rows as one CSV file and writes it into
//!   the watch folder with a temp write and atomic rename
//! - **Settling** marks rows delivered or failed, archives the file and
//!   quarantines rejected rows with their reasons
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Selector, connector, validation contract, housekeeping
//! - [`adapters`] - Row store (PostgreSQL, in-memory) and delivery sink
//! - [`domain`] - Rows, batches, delivery records, ids and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging and the audit journal
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use labelbridge::adapters::sink::FsSink;
//! use labelbridge::adapters::store::create_row_store;
//! use labelbridge::config::load_config;
//! use labelbridge::core::connector::{Connector, ConnectorSettings};
//! use labelbridge::core::selector::Selector;
//! use labelbridge::domain::RunId;
//! use labelbridge::logging::AuditJournal;
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("labelbridge.toml")?;
//!     let store = create_row_store(&config.database).await?;
//!     store.ensure_schema().await?;
//!
//!     let journal = Arc::new(AuditJournal::open(&config.storage.audit_dir, RunId::generate())?);
//!     Selector::new(store.clone(), config.selector.clone(), journal.clone())
//!         .run()
//!         .await?;
//!
//!     let sink = Arc::new(FsSink::new(&config.delivery));
//!     let summary = Connector::new(store, sink, journal, ConnectorSettings::from_config(&config)?)
//!         .run()
//!         .await?;
//!
//!     println!("Delivered {} batches", summary.batches_delivered);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Library code returns [`domain::Result`] with [`domain::BridgeError`]. Row
//! store failures abort an invocation; sink failures are retried and then
//! deferred to the next run; invalid rows are quarantined and never abort a
//! batch.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
