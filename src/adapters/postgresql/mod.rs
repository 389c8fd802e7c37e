//! PostgreSQL row store
//!
//! The upstream queue tables (`print_rows`, `print_batches`,
//! `delivery_records`) and the adapter that drives their lifecycle.

pub mod adapter;
pub mod client;
pub mod models;

pub use adapter::PostgreSQLAdapter;
pub use client::PostgreSQLClient;
pub use models::{PgBatch, PgDeliveryRecord, PgPrintRow};
