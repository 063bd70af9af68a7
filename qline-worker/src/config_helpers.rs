use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use qline_queue::{PushOptions, QueueClient, QueueConfig, WorkerOptions};
use serde_json::Value;

/// Map the file/env configuration onto the facade's own settings.
pub fn queue_config_from_config(cfg: &qline_config::Config) -> QueueConfig {
    let mut queue = QueueConfig::default()
        .with_connection_name(cfg.queue.connection_name.clone())
        .with_default_timeout(cfg.queue.timeout_secs)
        .with_default_max_tries(cfg.queue.max_tries);
    if let Some(name) = &cfg.queue.default_queue {
        queue = queue.with_default_queue(name.clone());
    }
    queue
}

pub fn worker_options_from_config(cfg: &qline_config::Config) -> WorkerOptions {
    WorkerOptions {
        poll_interval: Duration::from_millis(cfg.worker.poll_interval_ms),
        unavailable_backoff: Duration::from_millis(cfg.worker.unavailable_backoff_ms),
    }
}

/// Read a JSON array of wire payloads and enqueue each one as-is.
pub async fn seed_from_file(
    client: &QueueClient,
    path: &Path,
    queue: Option<&str>,
) -> anyhow::Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let entries: Vec<Value> =
        serde_json::from_str(&text).with_context(|| format!("parsing seed file {}", path.display()))?;

    for (idx, entry) in entries.iter().enumerate() {
        let raw = serde_json::to_string(entry)?;
        let id = client
            .push_raw(&raw, queue, &PushOptions::default())
            .await
            .with_context(|| format!("seed entry {idx}"))?;
        tracing::debug!(job_id = %id, idx, "seeded job");
    }
    Ok(entries.len())
}
