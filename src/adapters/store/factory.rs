//! Row store factory
//!
//! Builds the configured row store behind an `Arc<dyn RowStore>`.

use crate::adapters::postgresql::{PostgreSQLAdapter, PostgreSQLClient};
use crate::adapters::store::traits::RowStore;
use crate::config::DatabaseConfig;
use crate::config::redact_connection_string;
use crate::domain::Result;
use secrecy::ExposeSecret;
use std::sync::Arc;

/// Create the PostgreSQL row store
///
/// The pool connects lazily, so this only fails on a malformed connection
/// string or TLS setup; call [`RowStore::test_connection`] to probe.
///
/// # Errors
///
/// Returns `BridgeError::Configuration` if the client cannot be built
pub async fn create_row_store(config: &DatabaseConfig) -> Result<Arc<dyn RowStore>> {
    tracing::info!(
        target_db = %redact_connection_string(config.connection_string.expose_secret().as_ref()),
        ssl_mode = %config.ssl_mode,
        "Creating PostgreSQL row store"
    );

    let client = PostgreSQLClient::new(config.clone()).await?;
    let adapter = PostgreSQLAdapter::new(client);

    Ok(Arc::new(adapter) as Arc<dyn RowStore>)
}
