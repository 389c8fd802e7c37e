//! Prune command implementation
//!
//! Removes archive and quarantine folders older than the retention window.

use super::{load_or_report, EXIT_FATAL, EXIT_OK};
use crate::core::housekeeping::prune_expired;
use chrono::Utc;
use clap::Args;

/// Arguments for the prune command
#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Override `storage.retention_days`
    #[arg(long)]
    pub retention_days: Option<u32>,
}

impl PruneArgs {
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_or_report(config_path) {
            Ok(c) => c,
            Err(code) => return Ok(code),
        };

        let retention_days = self
            .retention_days
            .unwrap_or(config.storage.retention_days);
        if retention_days == 0 {
            println!("Retention is 0 days; nothing is pruned.");
            return Ok(EXIT_OK);
        }

        let today = Utc::now().date_naive();
        let mut removed = 0;
        for root in [&config.storage.archive_dir, &config.storage.quarantine_dir] {
            match prune_expired(root, retention_days, today) {
                Ok(report) => {
                    println!(
                        "🧹 {}: removed {}, kept {}",
                        root.display(),
                        report.removed.len(),
                        report.kept
                    );
                    removed += report.removed.len();
                }
                Err(e) => {
                    tracing::error!(root = %root.display(), error = %e, "Prune failed");
                    println!("❌ Failed to prune {}", root.display());
                    println!("   Error: {e}");
                    return Ok(EXIT_FATAL);
                }
            }
        }

        tracing::info!(removed, retention_days, "Prune completed");
        Ok(EXIT_OK)
    }
}
