//! Status command implementation
//!
//! Prints row and batch totals per state and the most recent batches.

use super::{connect_store, load_or_report, EXIT_CONFIG, EXIT_FATAL, EXIT_OK};
use crate::domain::{BatchFilter, BatchState};
use clap::Args;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only list batches in this state (staged, delivered, archived, failed)
    #[arg(long)]
    pub state: Option<String>,

    /// Only list batches of this site
    #[arg(long)]
    pub site: Option<String>,

    /// Number of batches to list
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

impl StatusArgs {
    fn filter(&self) -> Result<BatchFilter, String> {
        let state = self
            .state
            .as_deref()
            .map(str::parse::<BatchState>)
            .transpose()?;
        Ok(BatchFilter {
            state,
            site: self.site.clone(),
        })
    }

    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking pipeline status");

        let filter = match self.filter() {
            Ok(f) => f,
            Err(e) => {
                println!("❌ {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let config = match load_or_report(config_path) {
            Ok(c) => c,
            Err(code) => return Ok(code),
        };

        let store = match connect_store(&config).await {
            Ok(s) => s,
            Err(code) => return Ok(code),
        };

        println!("📊 Pipeline Status ({})", store.backend_name());
        println!();

        let counts = match store.state_counts().await {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load state counts");
                println!("   Error: {e}");
                return Ok(EXIT_FATAL);
            }
        };

        println!("{:<12} {:>10} {:>10}", "State", "Rows", "Batches");
        println!("{}", "-".repeat(34));
        println!("{:<12} {:>10} {:>10}", "ready", counts.rows_ready, "-");
        println!("{:<12} {:>10} {:>10}", "selected", counts.rows_selected, "-");
        println!("{:<12} {:>10} {:>10}", "staged", "-", counts.batches_staged);
        println!(
            "{:<12} {:>10} {:>10}",
            "delivered", counts.rows_delivered, counts.batches_delivered
        );
        println!("{:<12} {:>10} {:>10}", "archived", "-", counts.batches_archived);
        println!(
            "{:<12} {:>10} {:>10}",
            "failed", counts.rows_failed, counts.batches_failed
        );
        println!();

        let batches = match store.list_batches(&filter, self.limit).await {
            Ok(b) => b,
            Err(e) => {
                println!("❌ Failed to list batches");
                println!("   Error: {e}");
                return Ok(EXIT_FATAL);
            }
        };

        if batches.is_empty() {
            println!("No batches match the specified filters.");
            return Ok(EXIT_OK);
        }

        println!(
            "{:<26} {:<12} {:<12} {:>6} {:<20}",
            "Batch", "Site", "State", "Rows", "Selected At"
        );
        println!("{}", "-".repeat(80));
        for batch in &batches {
            println!(
                "{:<26} {:<12} {:<12} {:>6} {:<20}",
                batch.batch_id.as_str(),
                batch.key.site,
                batch.state.as_str(),
                batch.row_count(),
                batch.selected_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        println!();

        Ok(EXIT_OK)
    }
}
