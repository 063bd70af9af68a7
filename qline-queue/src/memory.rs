//! In-process queue backend.
//!
//! Implements the full backend contract (FIFO ordering, delayed visibility,
//! leases, retry accounting, recurrence) without provisioning a real queue
//! engine. Time is read from [`tokio::time::Instant`], so tests can pause and
//! advance the clock.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::QueueBackend;
use crate::error::{QueueError, QueueResult};
use crate::payload::JobPayload;
use crate::types::{JobId, JobState, LeasedJob, RecurringSchedule, ScheduleId};

/// Lease length used when a payload asks for the backend default.
pub const DEFAULT_LEASE_SECS: u64 = 60;

/// Attempt budget used when a payload asks for the backend default.
pub const DEFAULT_MAX_TRIES: u32 = 5;

/// Maximum number of finished (completed or dead) jobs kept for inspection.
const MAX_FINISHED_JOBS: usize = 1000;

/// Upper bound on occurrences a schedule materializes in one catch-up.
const MAX_RECUR_BACKFILL: u64 = 100;

/// Longest offset applied to the clock; larger delays, leases and
/// intervals are parked here, which is "never" for any live process.
const FAR_FUTURE_SECS: u64 = 86400 * 365 * 30;

/// `now` pushed forward by `secs`, clamped to [`FAR_FUTURE_SECS`].
fn offset(now: Instant, secs: u64) -> Instant {
    now.checked_add(Duration::from_secs(secs.min(FAR_FUTURE_SECS)))
        .unwrap_or(now)
}

#[derive(Debug)]
struct StoredJob {
    queue: String,
    payload: JobPayload,
    state: JobState,
    visible_at: Instant,
    lease_expires_at: Option<Instant>,
    attempts: u32,
    last_error: Option<String>,
}

impl StoredJob {
    fn lease_secs(&self) -> u64 {
        match self.payload.timeout_secs {
            0 => DEFAULT_LEASE_SECS,
            secs => secs,
        }
    }

    fn max_tries(&self) -> u32 {
        match self.payload.max_tries {
            0 => DEFAULT_MAX_TRIES,
            tries => tries,
        }
    }
}

#[derive(Debug)]
struct StoredSchedule {
    queue: String,
    schedule: RecurringSchedule,
    next_run: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Waiting job ids per queue in enqueue order, delayed ones included.
    waiting: HashMap<String, VecDeque<JobId>>,
    jobs: HashMap<JobId, StoredJob>,
    schedules: HashMap<ScheduleId, StoredSchedule>,
    /// Finished job ids, oldest first.
    finished: VecDeque<JobId>,
}

impl MemoryState {
    fn insert(&mut self, queue: &str, payload: JobPayload, visible_at: Instant) -> JobId {
        let id = JobId::generate();
        self.jobs.insert(
            id.clone(),
            StoredJob {
                queue: queue.to_owned(),
                payload,
                state: JobState::Pending,
                visible_at,
                lease_expires_at: None,
                attempts: 0,
                last_error: None,
            },
        );
        self.waiting
            .entry(queue.to_owned())
            .or_default()
            .push_back(id.clone());
        id
    }

    fn finish(&mut self, id: &JobId, state: JobState) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.state = state;
            job.lease_expires_at = None;
        }
        self.finished.push_back(id.clone());

        while self.finished.len() > MAX_FINISHED_JOBS {
            if let Some(old) = self.finished.pop_front() {
                self.jobs.remove(&old);
            }
        }
    }

    fn requeue(&mut self, id: &JobId, now: Instant, front: bool) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        job.state = JobState::Pending;
        job.visible_at = now;
        job.lease_expires_at = None;

        let waiting = self.waiting.entry(job.queue.clone()).or_default();
        if front {
            waiting.push_front(id.clone());
        } else {
            waiting.push_back(id.clone());
        }
    }

    /// Bring time-driven state up to `now`: recurrences and expired leases.
    fn advance(&mut self, now: Instant) {
        let mut spawned = Vec::new();
        for (id, sched) in self.schedules.iter_mut() {
            if sched.next_run > now {
                continue;
            }
            let interval = sched.schedule.interval_secs.max(1);
            let due = now.duration_since(sched.next_run).as_secs() / interval + 1;
            for k in 0..due.min(MAX_RECUR_BACKFILL) {
                let at = offset(sched.next_run, interval.saturating_mul(k));
                spawned.push((sched.queue.clone(), sched.schedule.clone(), at));
            }
            if due > MAX_RECUR_BACKFILL {
                warn!(schedule = %id, skipped = due - MAX_RECUR_BACKFILL, "recurring schedule fell behind, skipped occurrences");
            }
            sched.next_run = offset(sched.next_run, interval.saturating_mul(due));
        }
        for (queue, schedule, at) in spawned {
            let payload = JobPayload::new(schedule.job, schedule.data);
            let id = self.insert(&queue, payload, at);
            debug!(queue = %queue, job_id = %id, "materialized recurring job");
        }

        let expired: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, job)| {
                job.state == JobState::Leased
                    && job.lease_expires_at.is_some_and(|expiry| expiry <= now)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.settle_attempt(&id, now, "lease expired");
        }
    }

    /// Close a consumed attempt: retry while the budget allows, else dead.
    fn settle_attempt(&mut self, id: &JobId, now: Instant, reason: &str) {
        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        job.last_error = Some(reason.to_owned());
        if job.attempts >= job.max_tries() {
            warn!(job_id = %id, attempts = job.attempts, reason, "job exhausted its attempts");
            self.finish(id, JobState::Dead);
        } else {
            debug!(job_id = %id, attempts = job.attempts, reason, "job will be retried");
            self.requeue(id, now, false);
        }
    }

    fn leased_mut(&mut self, queue: &str, id: &JobId) -> QueueResult<&mut StoredJob> {
        match self.jobs.get_mut(id) {
            Some(job) if job.queue == queue && job.state == JobState::Leased => Ok(job),
            Some(job) if job.queue != queue => Err(QueueError::InvalidState(format!(
                "job {id} belongs to queue {}, not {queue}",
                job.queue
            ))),
            Some(job) => Err(QueueError::InvalidState(format!(
                "job {id} is {} rather than leased",
                job.state
            ))),
            None => Err(QueueError::InvalidState(format!(
                "job {id} is not held by this worker"
            ))),
        }
    }
}

/// Queue backend kept entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    disconnected: Arc<AtomicBool>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("state", &"<Mutex<MemoryState>>")
            .field("disconnected", &self.disconnected.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the connection: every call fails until [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        warn!("memory backend disconnected");
    }

    pub fn reconnect(&self) {
        self.disconnected.store(false, Ordering::SeqCst);
        info!("memory backend reconnected");
    }

    fn ensure_connected(&self) -> QueueResult<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(QueueError::BackendUnavailable(
                "memory backend is disconnected".into(),
            ))
        } else {
            Ok(())
        }
    }

    /// Current state of a job, if it is still known to the backend.
    pub async fn job_state(&self, id: &JobId) -> Option<JobState> {
        let mut state = self.state.lock().await;
        state.advance(Instant::now());
        state.jobs.get(id).map(|job| job.state)
    }

    /// Number of attempts a job has consumed so far.
    pub async fn attempts(&self, id: &JobId) -> Option<u32> {
        let state = self.state.lock().await;
        state.jobs.get(id).map(|job| job.attempts)
    }

    /// Reason recorded by the most recent failed attempt.
    pub async fn last_error(&self, id: &JobId) -> Option<String> {
        let state = self.state.lock().await;
        state.jobs.get(id).and_then(|job| job.last_error.clone())
    }

    /// Ids of jobs in `queue` that ran out of attempts, oldest first.
    pub async fn dead_jobs(&self, queue: &str) -> Vec<JobId> {
        let mut state = self.state.lock().await;
        state.advance(Instant::now());
        state
            .finished
            .iter()
            .filter(|id| {
                state
                    .jobs
                    .get(*id)
                    .is_some_and(|job| job.queue == queue && job.state == JobState::Dead)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn length(&self, queue: &str) -> QueueResult<u64> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        state.advance(Instant::now());

        let count = state
            .jobs
            .values()
            .filter(|job| job.queue == queue && !job.state.is_terminal())
            .count();
        Ok(count as u64)
    }

    async fn put(&self, queue: &str, payload: &JobPayload, delay_secs: u64) -> QueueResult<JobId> {
        self.ensure_connected()?;
        // reject payloads that could not be handed back out
        payload.to_wire()?;

        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.advance(now);

        let id = state.insert(queue, payload.clone(), offset(now, delay_secs));
        debug!(queue, job_id = %id, job = %payload.job, delay_secs, "stored job");
        Ok(id)
    }

    async fn pop(&self, queue: &str) -> QueueResult<Option<LeasedJob>> {
        self.ensure_connected()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.advance(now);

        let MemoryState { waiting, jobs, .. } = &mut *state;
        let Some(waiting) = waiting.get_mut(queue) else {
            return Ok(None);
        };
        let Some(pos) = waiting
            .iter()
            .position(|id| jobs.get(id).is_some_and(|job| job.visible_at <= now))
        else {
            return Ok(None);
        };
        let Some(id) = waiting.remove(pos) else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        let expires = offset(now, job.lease_secs());
        job.state = JobState::Leased;
        job.attempts += 1;
        job.lease_expires_at = Some(expires);

        Ok(Some(LeasedJob {
            id,
            queue: queue.to_owned(),
            payload: job.payload.to_wire()?,
            attempt: job.attempts,
            lease_expires_at: expires,
        }))
    }

    async fn recur(&self, queue: &str, schedule: &RecurringSchedule) -> QueueResult<ScheduleId> {
        self.ensure_connected()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.advance(now);

        let id = ScheduleId::generate();
        state.schedules.insert(
            id.clone(),
            StoredSchedule {
                queue: queue.to_owned(),
                schedule: schedule.clone(),
                next_run: now,
            },
        );
        info!(
            queue,
            schedule = %id,
            job = %schedule.job,
            interval_secs = schedule.interval_secs,
            "registered recurring schedule"
        );
        Ok(id)
    }

    async fn unrecur(&self, schedule: &ScheduleId) -> QueueResult<()> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        match state.schedules.remove(schedule) {
            Some(_) => Ok(()),
            None => Err(QueueError::Validation(format!(
                "unknown recurring schedule {schedule}"
            ))),
        }
    }

    async fn heartbeat(&self, queue: &str, id: &JobId) -> QueueResult<Instant> {
        self.ensure_connected()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.advance(now);

        let job = state.leased_mut(queue, id)?;
        let expires = offset(now, job.lease_secs());
        job.lease_expires_at = Some(expires);
        Ok(expires)
    }

    async fn complete(&self, queue: &str, id: &JobId) -> QueueResult<()> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        state.advance(Instant::now());

        state.leased_mut(queue, id)?;
        state.finish(id, JobState::Completed);
        Ok(())
    }

    async fn fail(&self, queue: &str, id: &JobId, reason: &str) -> QueueResult<()> {
        self.ensure_connected()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.advance(now);

        state.leased_mut(queue, id)?;
        state.settle_attempt(id, now, reason);
        Ok(())
    }

    async fn release(&self, queue: &str, id: &JobId) -> QueueResult<()> {
        self.ensure_connected()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.advance(now);

        let job = state.leased_mut(queue, id)?;
        job.attempts = job.attempts.saturating_sub(1);
        state.requeue(id, now, true);
        Ok(())
    }
}
