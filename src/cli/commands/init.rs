//! Init command implementation
//!
//! This module implements the `init` command for generating a sample
//! configuration file.

use super::{EXIT_CONFIG, EXIT_FATAL, EXIT_OK};
use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "labelbridge.toml")]
    pub output: String,

    /// Include the optional sections with their defaults and comments
    #[arg(long)]
    pub with_examples: bool,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        println!("📝 Initializing labelbridge configuration");
        println!();

        if Path::new(&self.output).exists() && !self.force {
            println!("❌ Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(EXIT_CONFIG);
        }

        let config_content = if self.with_examples {
            Self::generate_config_with_examples()
        } else {
            Self::generate_minimal_config()
        };

        match fs::write(&self.output, config_content) {
            Ok(_) => {
                println!("✅ Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your settings", self.output);
                println!("  2. Set LABELBRIDGE_DATABASE_URL in your environment or a .env file");
                println!("  3. Validate configuration: labelbridge validate-config");
                println!("  4. Check the watch folder: labelbridge probe");
                println!("  5. Schedule: labelbridge run");
                println!();
                Ok(EXIT_OK)
            }
            Err(e) => {
                println!("❌ Failed to write configuration file");
                println!("   Error: {e}");
                Ok(EXIT_FATAL)
            }
        }
    }

    /// Generate minimal configuration
    fn generate_minimal_config() -> String {
        r#"# labelbridge configuration

[database]
connection_string = "${LABELBRIDGE_DATABASE_URL}"

[selector]
sites = []
batch_size = 500

[delivery]
watch_dir = "/mnt/print/in"
max_retries = 3
retry_backoff_ms = [10000]

[storage]
work_dir = "/var/lib/labelbridge/work"
archive_dir = "/var/lib/labelbridge/archive"
quarantine_dir = "/var/lib/labelbridge/quarantine"
audit_dir = "/var/log/labelbridge/audit"
"#
        .to_string()
    }

    /// Generate configuration with every section spelled out
    fn generate_config_with_examples() -> String {
        r#"# labelbridge configuration
#
# Values in ${...} are read from the environment (or a .env file).
# Any key can also be overridden with LABELBRIDGE_<SECTION>_<KEY>.

[application]
# trace, debug, info, warn, error
log_level = "info"
# Validate and render only; nothing is claimed, delivered or marked
dry_run = false

[database]
connection_string = "${LABELBRIDGE_DATABASE_URL}"
max_connections = 4
connection_timeout_seconds = 30
statement_timeout_seconds = 60
# disable, prefer, require, verify-ca, verify-full
ssl_mode = "prefer"

[selector]
# Empty means every site with ready rows
sites = ["1", "2"]
# Rows per batch; the rest wait for the next run
batch_size = 500

[connector]
max_batches_per_run = 100
# false: one invalid row quarantines the whole batch
allow_partial_delivery = true

[delivery]
watch_dir = "/mnt/print/in"
# Must be on the same volume as watch_dir; defaults to watch_dir/.labelbridge-tmp
# staging_dir = "/mnt/print/in/.labelbridge-tmp"
# Total attempts per batch and run
max_retries = 3
# Wait before attempt n+1; the last value repeats
retry_backoff_ms = [10000]
io_timeout_seconds = 30
# A run that died while delivering is taken over after this long
lease_timeout_seconds = 900

[storage]
work_dir = "/var/lib/labelbridge/work"
archive_dir = "/var/lib/labelbridge/archive"
quarantine_dir = "/var/lib/labelbridge/quarantine"
audit_dir = "/var/log/labelbridge/audit"
# 0 keeps archive and quarantine folders forever
retention_days = 30

[validation]
# collect_all or first_failure
policy = "collect_all"
# Reject fields the contract does not know
closed_schema = false

# Leave out every [[validation.fields]] entry to keep the built-in contract.
# [[validation.fields]]
# name = "qty"
# kind = "integer"
# min = 1
# max = 999
# code = "quantity"

[logging]
local_enabled = true
local_path = "/var/log/labelbridge"
# daily, hourly, never
local_rotation = "daily"
"#
        .to_string()
    }
}
