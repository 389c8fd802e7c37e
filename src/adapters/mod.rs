//! External system integrations for Labelbridge.
//!
//! - [`store`] - Row store abstraction layer (trait-based)
//! - [`postgresql`] - PostgreSQL row store
//! - [`memory`] - In-process row store
//! - [`sink`] - Watch-directory delivery sink
//!
//! # Design Pattern
//!
//! Adapters isolate the database and filesystem behind traits so the
//! selector and connector can be exercised against the in-memory store and a
//! temporary directory.
//!
//! ```rust,no_run
//! use labelbridge::adapters::sink::{DeliverySink, FsSink};
//! use labelbridge::config::DeliveryConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = FsSink::new(&DeliveryConfig::new("/mnt/labels/watch"));
//! sink.probe().await?;
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod postgresql;
pub mod sink;
pub mod store;
