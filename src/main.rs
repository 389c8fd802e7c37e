// Labelbridge - Print queue to label printer delivery
// Copyright (c) 2025 Labelbridge Contributors
// Licensed under the MIT License

use clap::Parser;
use labelbridge::cli::commands::EXIT_FATAL;
use labelbridge::cli::Cli;
use labelbridge::config::{load_config, LoggingConfig};
use labelbridge::logging::init_logging;
use std::process;
use tokio::sync::watch;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Optional; a missing .env is ignored
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // File logging follows the config when it loads; commands report load errors themselves
    let (config_level, logging_config) = match load_config(&cli.config) {
        Ok(config) => (config.application.log_level, config.logging),
        Err(_) => ("info".to_string(), LoggingConfig::console_only()),
    };
    let log_level = cli.log_level.clone().unwrap_or(config_level);
    let guard = match init_logging(&log_level, &logging_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(EXIT_FATAL);
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "labelbridge - print queue delivery"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT (Ctrl+C), finishing the current batch");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, finishing the current batch");
                }
            }
            let _ = shutdown_tx.send(true);
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            } else {
                tracing::info!("Received SIGINT (Ctrl+C), finishing the current batch");
                let _ = shutdown_tx.send(true);
            }
        }
    });

    let exit_code = match cli.execute(shutdown_rx).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command execution failed");
            eprintln!("Error: {e}");
            EXIT_FATAL
        }
    };

    // process::exit skips destructors, flush the file appender first
    drop(guard);
    process::exit(exit_code);
}
