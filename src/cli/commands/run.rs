//! `run` command: select then connect in one invocation
//!
//! This is what the scheduler calls.

use super::{execute_stages, Stages};
use clap::Args;
use tokio::sync::watch;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Skip claiming; validate and render staged batches only
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(dry_run = self.dry_run, "Starting run command");
        execute_stages(
            config_path,
            Stages {
                select: true,
                connect: true,
            },
            self.dry_run,
            shutdown,
        )
        .await
    }
}
