//! Probe command implementation
//!
//! Checks that the watch folder and its staging area exist and accept writes.

use super::{load_or_report, EXIT_CONNECTION, EXIT_OK};
use crate::adapters::sink::{DeliverySink, FsSink};
use clap::Args;

/// Arguments for the probe command
#[derive(Args, Debug)]
pub struct ProbeArgs {}

impl ProbeArgs {
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_or_report(config_path) {
            Ok(c) => c,
            Err(code) => return Ok(code),
        };

        let sink = FsSink::new(&config.delivery);
        println!("🔍 Probing {}", sink.describe());

        match sink.probe().await {
            Ok(()) => {
                tracing::info!(sink = %sink.describe(), "Sink probe passed");
                println!("✅ Watch folder is writable");
                Ok(EXIT_OK)
            }
            Err(e) => {
                tracing::error!(sink = %sink.describe(), error = %e, "Sink probe failed");
                println!("❌ Sink probe failed");
                println!("   Error: {e}");
                Ok(EXIT_CONNECTION)
            }
        }
    }
}
