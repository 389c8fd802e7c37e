//! `select` command: claim ready rows into staged batches

use super::{execute_stages, Stages};
use clap::Args;
use tokio::sync::watch;

/// Arguments for the select command
#[derive(Args, Debug)]
pub struct SelectArgs {}

impl SelectArgs {
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting select command");
        execute_stages(
            config_path,
            Stages {
                select: true,
                connect: false,
            },
            false,
            shutdown,
        )
        .await
    }
}
