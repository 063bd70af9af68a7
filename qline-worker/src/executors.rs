//! Built-in job executors shipped with the worker binary.

use std::time::Duration;

use qline_queue::{async_trait, JobData, JobExecutor, QueueError};
use tracing::info;

/// Logs the job data and completes.
#[derive(Debug, Default)]
pub struct EchoExecutor;

#[async_trait]
impl JobExecutor for EchoExecutor {
    fn job_type(&self) -> &str {
        "log.echo"
    }

    async fn execute(&self, data: JobData) -> Result<(), QueueError> {
        info!(data = %serde_json::Value::Object(data), "echo");
        Ok(())
    }
}

/// Sleeps for `data.ms` milliseconds.
#[derive(Debug, Default)]
pub struct SleepExecutor;

#[async_trait]
impl JobExecutor for SleepExecutor {
    fn job_type(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, data: JobData) -> Result<(), QueueError> {
        let ms = data
            .get("ms")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| QueueError::ExecutionFailed("sleep requires a numeric `ms`".into()))?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}
