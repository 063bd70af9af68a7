//! Wrapper around a leased job handed to a worker.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::QueueBackend;
use crate::error::{QueueError, QueueResult};
use crate::payload::JobPayload;
use crate::types::{JobId, LeasedJob};

/// Backend-owned lease on a job. Only reachable through [`QueueJob`].
struct RawHandle {
    id: JobId,
    queue: String,
    attempt: u32,
    lease_expires_at: Instant,
    backend: Arc<dyn QueueBackend>,
}

/// How the holder finished with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Held,
    Completed,
    Failed,
    Released,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Held => "held",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Released => "released",
        })
    }
}

/// A dequeued job: decoded payload plus the lease it was handed out under.
///
/// Exactly one of [`mark_complete`](Self::mark_complete),
/// [`mark_failed`](Self::mark_failed) or [`release`](Self::release) may
/// succeed; any further terminal call fails with
/// [`QueueError::InvalidState`]. A call rejected by the backend leaves the job
/// held, so the caller decides whether to try again.
pub struct QueueJob {
    raw: RawHandle,
    payload: JobPayload,
    connection_name: String,
    outcome: Outcome,
}

impl fmt::Debug for QueueJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueJob")
            .field("id", &self.raw.id)
            .field("queue", &self.raw.queue)
            .field("attempt", &self.raw.attempt)
            .field("payload", &self.payload)
            .field("connection_name", &self.connection_name)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl QueueJob {
    pub(crate) fn new(
        leased: LeasedJob,
        payload: JobPayload,
        connection_name: impl Into<String>,
        backend: Arc<dyn QueueBackend>,
    ) -> Self {
        Self {
            raw: RawHandle {
                id: leased.id,
                queue: leased.queue,
                attempt: leased.attempt,
                lease_expires_at: leased.lease_expires_at,
                backend,
            },
            payload,
            connection_name: connection_name.into(),
            outcome: Outcome::Held,
        }
    }

    #[inline]
    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    #[inline]
    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    #[inline]
    pub fn id(&self) -> &JobId {
        &self.raw.id
    }

    #[inline]
    pub fn queue(&self) -> &str {
        &self.raw.queue
    }

    /// 1-based attempt number of the current lease.
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.raw.attempt
    }

    /// Point in time after which the backend may hand this job to someone else.
    #[inline]
    pub fn lease_expires_at(&self) -> Instant {
        self.raw.lease_expires_at
    }

    #[inline]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    fn ensure_held(&self, op: &str) -> QueueResult<()> {
        match self.outcome {
            Outcome::Held => Ok(()),
            done => Err(QueueError::InvalidState(format!(
                "cannot {op} job {}: already {done}",
                self.raw.id
            ))),
        }
    }

    /// Extend the lease while a long-running job is still working.
    pub async fn heartbeat(&mut self) -> QueueResult<()> {
        self.ensure_held("heartbeat")?;
        let expires = self
            .raw
            .backend
            .heartbeat(&self.raw.queue, &self.raw.id)
            .await?;
        self.raw.lease_expires_at = expires;
        debug!(job_id = %self.raw.id, queue = %self.raw.queue, "lease extended");
        Ok(())
    }

    pub async fn mark_complete(&mut self) -> QueueResult<()> {
        self.ensure_held("complete")?;
        self.raw
            .backend
            .complete(&self.raw.queue, &self.raw.id)
            .await?;
        self.outcome = Outcome::Completed;
        info!(job_id = %self.raw.id, job = %self.payload.job, queue = %self.raw.queue, "job completed");
        Ok(())
    }

    /// Report a failed attempt. Whether it is retried is up to the backend.
    pub async fn mark_failed(&mut self, reason: &str) -> QueueResult<()> {
        self.ensure_held("fail")?;
        self.raw
            .backend
            .fail(&self.raw.queue, &self.raw.id, reason)
            .await?;
        self.outcome = Outcome::Failed;
        warn!(
            job_id = %self.raw.id,
            job = %self.payload.job,
            queue = %self.raw.queue,
            attempt = self.raw.attempt,
            reason,
            "job failed"
        );
        Ok(())
    }

    /// Give the job back without counting a failure, e.g. on shutdown.
    pub async fn release(&mut self) -> QueueResult<()> {
        self.ensure_held("release")?;
        self.raw
            .backend
            .release(&self.raw.queue, &self.raw.id)
            .await?;
        self.outcome = Outcome::Released;
        info!(job_id = %self.raw.id, queue = %self.raw.queue, "job released");
        Ok(())
    }
}

impl Drop for QueueJob {
    fn drop(&mut self) {
        if self.outcome == Outcome::Held {
            warn!(
                job_id = %self.raw.id,
                queue = %self.raw.queue,
                "job dropped while still leased, it becomes visible again once the lease expires"
            );
        }
    }
}
