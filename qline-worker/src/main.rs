//! qline worker process
//!
//! Loads configuration, installs tracing, optionally seeds the queue and then
//! drains it with the built-in executors until interrupted.

use std::sync::Arc;

use clap::Parser;
use qline_queue::{MemoryBackend, QueueClient, Tick, Worker};
use tokio::sync::watch;

mod cli;
mod config_helpers;
mod executors;
mod tracing_setup;

use cli::CliArgs;
use config_helpers::{queue_config_from_config, seed_from_file, worker_options_from_config};
use executors::{EchoExecutor, SleepExecutor};
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config_path = args.resolved_config_path();
    let config = qline_config::load_config(config_path.as_deref()).map_err(|e| {
        eprintln!("failed to load configuration: {e}");
        anyhow::anyhow!(e.to_string())
    })?;
    qline_config::validate_config(&config)?;

    install_tracing_from_config(&config.logging);
    tracing::info!(config_path = ?config_path, "configuration loaded");

    let client = Arc::new(QueueClient::new(
        Arc::new(MemoryBackend::new()),
        queue_config_from_config(&config),
    ));
    let queue = args.queue.as_deref();

    if let Some(seed) = &args.seed {
        let count = seed_from_file(&client, seed, queue).await?;
        tracing::info!(count, seed = %seed.display(), "seeded queue");
    }

    let worker = Worker::new(Arc::clone(&client), worker_options_from_config(&config));
    worker.register_executor(EchoExecutor).await;
    worker.register_executor(SleepExecutor).await;

    if args.drain {
        let mut processed = 0usize;
        while worker.run_once(queue).await? != Tick::Idle {
            processed += 1;
        }
        tracing::info!(processed, "queue drained");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(%e, "failed to listen for ctrl-c");
        }
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    worker.run(queue, shutdown_rx).await?;
    Ok(())
}
