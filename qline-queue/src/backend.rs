//! Connection to the persistent queue engine.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::QueueResult;
use crate::payload::JobPayload;
use crate::types::{JobId, LeasedJob, RecurringSchedule, ScheduleId};

/// Capability handed to the client at construction.
///
/// Implementations own all durable state: ordering, delayed visibility, lease
/// expiry, retry accounting and recurrence. A connection that has been lost
/// must answer with [`QueueError::BackendUnavailable`](crate::QueueError)
/// instead of an empty result.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Number of jobs in `queue` that have not reached a terminal state.
    async fn length(&self, queue: &str) -> QueueResult<u64>;

    /// Append a job, visible to dequeuers once `delay_secs` have elapsed.
    async fn put(&self, queue: &str, payload: &JobPayload, delay_secs: u64) -> QueueResult<JobId>;

    /// Lease the next visible job, `None` when there is no work right now.
    async fn pop(&self, queue: &str) -> QueueResult<Option<LeasedJob>>;

    /// Install a recurring trigger. One call registers one schedule.
    async fn recur(&self, queue: &str, schedule: &RecurringSchedule) -> QueueResult<ScheduleId>;

    /// Remove a recurring trigger. Jobs it already produced are untouched.
    async fn unrecur(&self, schedule: &ScheduleId) -> QueueResult<()>;

    /// Extend the lease of a held job, returning the new expiry.
    async fn heartbeat(&self, queue: &str, job: &JobId) -> QueueResult<Instant>;

    async fn complete(&self, queue: &str, job: &JobId) -> QueueResult<()>;

    /// Record a failed attempt; the backend decides between retry and dead.
    async fn fail(&self, queue: &str, job: &JobId, reason: &str) -> QueueResult<()>;

    /// Hand the job back without consuming an attempt.
    async fn release(&self, queue: &str, job: &JobId) -> QueueResult<()>;
}
