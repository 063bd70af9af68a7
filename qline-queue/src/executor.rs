//! Handlers that turn a popped payload into work.

use async_trait::async_trait;

use crate::error::QueueError;
use crate::payload::JobData;

/// Runs the `data` of jobs whose identifier matches [`job_type`](Self::job_type).
///
/// Identifiers are only matched when a [`Worker`](crate::Worker) pops a job,
/// never at push time, so a job may be enqueued before any handler for it
/// exists. A job with no matching handler is failed with a reason naming
/// the identifier and then follows the backend's retry budget like any other
/// failure.
///
/// An `Err` is recorded through [`QueueJob::mark_failed`](crate::QueueJob::mark_failed);
/// retrying is left to the backend.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn job_type(&self) -> &str;

    async fn execute(&self, data: JobData) -> Result<(), QueueError>;
}

/// Completes every job it receives without looking at the data.
#[derive(Debug, Default, Clone)]
pub struct NoOpExecutor {
    job_type: String,
}

impl NoOpExecutor {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
        }
    }
}

#[async_trait]
impl JobExecutor for NoOpExecutor {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn execute(&self, _data: JobData) -> Result<(), QueueError> {
        Ok(())
    }
}
