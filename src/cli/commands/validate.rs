//! Validate config command implementation
//!
//! Loads the configuration file, runs every section's validation and builds
//! the print contract, without touching the row store or the watch folder.

use super::{EXIT_CONFIG, EXIT_OK};
use crate::config::{load_config, redact_connection_string};
use crate::core::validation::Contract;
use clap::Args;
use secrecy::ExposeSecret;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates every section
        let config = match load_config(config_path) {
            Ok(c) => {
                println!("✅ Configuration file loaded successfully");
                c
            }
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let contract = match Contract::from_config(&config.validation) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Print contract is invalid");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        println!(
            "  Row Store: {}",
            redact_connection_string(config.database.connection_string.expose_secret().as_ref())
        );
        println!("  SSL Mode: {}", config.database.ssl_mode);
        println!(
            "  Sites: {}",
            if config.selector.sites.is_empty() {
                "All".to_string()
            } else {
                config.selector.sites.join(", ")
            }
        );
        println!("  Batch Size: {}", config.selector.batch_size);
        println!("  Watch Folder: {}", config.delivery.watch_dir.display());
        println!("  Staging Folder: {}", config.delivery.staging_path().display());
        println!("  Max Attempts: {}", config.delivery.max_retries);
        println!(
            "  Partial Delivery: {}",
            config.connector.allow_partial_delivery
        );
        println!("  Contract Fields: {}", contract.field_names().join(", "));
        println!();
        Ok(EXIT_OK)
    }
}
