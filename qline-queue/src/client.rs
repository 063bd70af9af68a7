//! Queue client facade.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::QueueBackend;
use crate::error::QueueResult;
use crate::handle::QueueResolver;
use crate::job::QueueJob;
use crate::payload::{self, JobPayload, PushOptions};
use crate::types::{JobId, RecurringSchedule, ScheduleId};

/// Connection name used when none is configured.
pub const DEFAULT_CONNECTION_NAME: &str = "qline";

/// Per-client settings. Immutable once the client is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Queue used when a call does not name one.
    pub default_queue: Option<String>,
    /// Identity reported by every [`QueueJob`] this client hands out.
    pub connection_name: String,
    /// Timeout applied by [`QueueClient::push`], `0` for the backend default.
    pub default_timeout_secs: u64,
    /// Attempt budget applied by [`QueueClient::push`], `0` for the backend default.
    pub default_max_tries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_queue: None,
            connection_name: DEFAULT_CONNECTION_NAME.to_owned(),
            default_timeout_secs: 0,
            default_max_tries: 0,
        }
    }
}

impl QueueConfig {
    #[inline]
    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = Some(queue.into());
        self
    }

    #[inline]
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    #[inline]
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    #[inline]
    pub fn with_default_max_tries(mut self, tries: u32) -> Self {
        self.default_max_tries = tries;
        self
    }
}

/// How long a job should stay invisible after it is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    Seconds(u64),
    Duration(Duration),
    /// Absolute point in time; instants in the past mean "now".
    At(DateTime<Utc>),
}

impl Delay {
    /// Whole seconds from `now`, rounded up so a job never shows up early.
    pub fn as_secs_from(&self, now: DateTime<Utc>) -> u64 {
        match *self {
            Self::Seconds(secs) => secs,
            Self::Duration(d) => d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0)),
            Self::At(at) => {
                let millis = (at - now).num_milliseconds();
                if millis <= 0 {
                    0
                } else {
                    (millis as u64).div_ceil(1000)
                }
            }
        }
    }
}

impl From<u64> for Delay {
    fn from(secs: u64) -> Self {
        Self::Seconds(secs)
    }
}

impl From<Duration> for Delay {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

impl From<DateTime<Utc>> for Delay {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

/// Public entry point for enqueuing, dequeuing and inspecting jobs.
pub struct QueueClient {
    backend: Arc<dyn QueueBackend>,
    resolver: QueueResolver,
    config: QueueConfig,
}

impl fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueClient")
            .field("backend", &"<dyn QueueBackend>")
            .field("resolver", &self.resolver)
            .field("config", &self.config)
            .finish()
    }
}

impl QueueClient {
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        let resolver = QueueResolver::new(Arc::clone(&backend), config.default_queue.clone());
        Self {
            backend,
            resolver,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    #[inline]
    pub fn connection_name(&self) -> &str {
        &self.config.connection_name
    }

    /// Rename the connection reported by jobs popped from now on.
    #[must_use]
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.config.connection_name = name.into();
        self
    }

    /// Backlog depth of `queue` (or the default queue).
    pub async fn size(&self, queue: Option<&str>) -> QueueResult<u64> {
        self.resolver.resolve(queue)?.size().await
    }

    /// Enqueue an already serialized payload, applying `options` on top.
    pub async fn push_raw(
        &self,
        raw: &str,
        queue: Option<&str>,
        options: &PushOptions,
    ) -> QueueResult<JobId> {
        self.enqueue_raw(raw, queue, options, None).await
    }

    /// Enqueue `job` with `data` using the configured timeout and attempt budget.
    pub async fn push<T: Serialize + ?Sized>(
        &self,
        job: &str,
        data: &T,
        queue: Option<&str>,
    ) -> QueueResult<JobId> {
        let raw = self.encode(job, data)?;
        self.push_raw(&raw, queue, &PushOptions::default()).await
    }

    /// Enqueue `job` so that it only becomes visible after `delay`.
    pub async fn later<T: Serialize + ?Sized>(
        &self,
        delay: impl Into<Delay>,
        job: &str,
        data: &T,
        queue: Option<&str>,
    ) -> QueueResult<JobId> {
        let delay_secs = delay.into().as_secs_from(Utc::now());
        let raw = self.encode(job, data)?;
        self.enqueue_raw(&raw, queue, &PushOptions::default(), Some(delay_secs))
            .await
    }

    /// Register a backend schedule that produces `job` every `interval_secs`.
    pub async fn recur<T: Serialize + ?Sized>(
        &self,
        interval_secs: u64,
        job: &str,
        data: &T,
        queue: Option<&str>,
    ) -> QueueResult<ScheduleId> {
        let schedule = RecurringSchedule::new(interval_secs, job, payload::to_job_data(data)?)?;
        let handle = self.resolver.resolve(queue)?;
        let id = handle.register_recurring(&schedule).await?;
        info!(queue = handle.name(), schedule = %id, job, interval_secs, "recurring job registered");
        Ok(id)
    }

    /// Cancel a schedule created by [`recur`](Self::recur).
    pub async fn unrecur(&self, schedule: &ScheduleId) -> QueueResult<()> {
        self.backend.unrecur(schedule).await?;
        info!(schedule = %schedule, "recurring job cancelled");
        Ok(())
    }

    /// Lease the next job, `Ok(None)` when there is no work right now.
    pub async fn pop(&self, queue: Option<&str>) -> QueueResult<Option<QueueJob>> {
        let handle = self.resolver.resolve(queue)?;
        let Some(leased) = handle.dequeue_one().await? else {
            return Ok(None);
        };

        let payload = match payload::decode(&leased.payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(job_id = %leased.id, queue = handle.name(), error = %err, "leased job has a malformed payload");
                if let Err(fail_err) = self
                    .backend
                    .fail(&leased.queue, &leased.id, &err.to_string())
                    .await
                {
                    warn!(job_id = %leased.id, error = %fail_err, "could not fail malformed job");
                }
                return Err(err);
            }
        };

        debug!(
            job_id = %leased.id,
            job = %payload.job,
            queue = handle.name(),
            attempt = leased.attempt,
            "popped job"
        );
        Ok(Some(QueueJob::new(
            leased,
            payload,
            self.config.connection_name.as_str(),
            Arc::clone(&self.backend),
        )))
    }

    fn encode<T: Serialize + ?Sized>(&self, job: &str, data: &T) -> QueueResult<String> {
        payload::encode(
            job,
            data,
            self.config.default_timeout_secs,
            self.config.default_max_tries,
        )
    }

    async fn enqueue_raw(
        &self,
        raw: &str,
        queue: Option<&str>,
        options: &PushOptions,
        delay_secs: Option<u64>,
    ) -> QueueResult<JobId> {
        let payload: JobPayload = payload::merge(payload::decode(raw)?, options);
        let handle = self.resolver.resolve(queue)?;

        let id = match delay_secs {
            None => handle.enqueue(&payload).await?,
            Some(secs) => handle.enqueue_delayed(&payload, secs).await?,
        };
        info!(
            queue = handle.name(),
            job_id = %id,
            job = %payload.job,
            delay_secs = ?delay_secs,
            "job enqueued"
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn delay_normalization() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(Delay::from(5u64).as_secs_from(now), 5);
        assert_eq!(Delay::from(Duration::from_secs(7)).as_secs_from(now), 7);
        assert_eq!(Delay::from(Duration::from_millis(1500)).as_secs_from(now), 2);
        assert_eq!(
            Delay::from(Duration::new(u64::MAX, 1)).as_secs_from(now),
            u64::MAX
        );
        assert_eq!(
            Delay::from(now + chrono::Duration::seconds(30)).as_secs_from(now),
            30
        );
        assert_eq!(
            Delay::from(now + chrono::Duration::milliseconds(200)).as_secs_from(now),
            1
        );
        assert_eq!(
            Delay::from(now - chrono::Duration::seconds(30)).as_secs_from(now),
            0
        );
    }

    #[test]
    fn config_builders() {
        let cfg = QueueConfig::default()
            .with_default_queue("emails")
            .with_connection_name("primary")
            .with_default_timeout(30)
            .with_default_max_tries(4);
        assert_eq!(cfg.default_queue.as_deref(), Some("emails"));
        assert_eq!(cfg.connection_name, "primary");
        assert_eq!(cfg.default_timeout_secs, 30);
        assert_eq!(cfg.default_max_tries, 4);
        assert_eq!(QueueConfig::default().connection_name, DEFAULT_CONNECTION_NAME);
    }
}
