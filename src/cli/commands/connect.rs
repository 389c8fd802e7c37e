//! `connect` command: deliver staged batches

use super::{execute_stages, Stages};
use clap::Args;
use tokio::sync::watch;

/// Arguments for the connect command
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Validate and render only; nothing is delivered or marked
    #[arg(long)]
    pub dry_run: bool,
}

impl ConnectArgs {
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(dry_run = self.dry_run, "Starting connect command");
        execute_stages(
            config_path,
            Stages {
                select: false,
                connect: true,
            },
            self.dry_run,
            shutdown,
        )
        .await
    }
}
