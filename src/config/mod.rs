//! Configuration management for labelbridge.
//!
//! # Overview
//!
//! labelbridge reads a TOML file with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `LABELBRIDGE_<SECTION>_<KEY>` overrides
//! - Default values for optional settings
//! - Validation of every section on load
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use labelbridge::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("labelbridge.toml")?;
//!
//! println!("Watch folder: {}", config.delivery.watch_dir.display());
//! println!("Batch size: {}", config.selector.batch_size);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level and dry run
//! - [`DatabaseConfig`] - PostgreSQL row store
//! - [`SelectorConfig`] - Sites and batch size
//! - [`ConnectorConfig`] - Per-run batch cap and partial delivery
//! - [`DeliveryConfig`] - Watch folder, retries and timeouts
//! - [`StorageConfig`] - Work, archive, quarantine and audit folders
//! - [`ValidationConfig`] - Print contract overrides
//! - [`LoggingConfig`] - Logging configuration
//!
//! # Example Configuration
//!
//! ```toml
//! [database]
//! connection_string = "${LABELBRIDGE_DATABASE_URL}"
//!
//! [selector]
//! sites = ["1", "2"]
//! batch_size = 500
//!
//! [delivery]
//! watch_dir = "/mnt/print/in"
//! max_retries = 3
//! retry_backoff_ms = [10000]
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, BridgeConfig, ConnectorConfig, DatabaseConfig, DeliveryConfig,
    FieldRuleConfig, LoggingConfig, SelectorConfig, StorageConfig, ValidationConfig,
};
pub use secret::{redact_connection_string, secret_string, SecretString, SecretValue};
