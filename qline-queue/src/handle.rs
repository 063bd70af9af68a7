//! Queue handles: a logical queue name bound to a backend connection.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::backend::QueueBackend;
use crate::error::{QueueError, QueueResult};
use crate::payload::JobPayload;
use crate::types::{JobId, LeasedJob, RecurringSchedule, ScheduleId};

/// A resolved backend queue resource.
#[derive(Clone)]
pub struct QueueHandle {
    name: Arc<str>,
    backend: Arc<dyn QueueBackend>,
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("name", &self.name)
            .field("backend", &"<dyn QueueBackend>")
            .finish()
    }
}

impl QueueHandle {
    fn new(name: &str, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            name: Arc::from(name),
            backend,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current backlog depth.
    pub async fn size(&self) -> QueueResult<u64> {
        self.backend.length(&self.name).await
    }

    pub async fn enqueue(&self, payload: &JobPayload) -> QueueResult<JobId> {
        self.backend.put(&self.name, payload, 0).await
    }

    /// Enqueue a job that stays invisible for `delay_secs`.
    pub async fn enqueue_delayed(&self, payload: &JobPayload, delay_secs: u64) -> QueueResult<JobId> {
        self.backend.put(&self.name, payload, delay_secs).await
    }

    pub async fn register_recurring(&self, schedule: &RecurringSchedule) -> QueueResult<ScheduleId> {
        self.backend.recur(&self.name, schedule).await
    }

    /// Try to lease one job. Never waits for work to show up.
    pub async fn dequeue_one(&self) -> QueueResult<Option<LeasedJob>> {
        self.backend.pop(&self.name).await
    }
}

/// Resolves queue names to handles, caching one handle per name.
pub struct QueueResolver {
    backend: Arc<dyn QueueBackend>,
    default_queue: Option<String>,
    cache: DashMap<String, QueueHandle>,
}

impl fmt::Debug for QueueResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueResolver")
            .field("default_queue", &self.default_queue)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl QueueResolver {
    pub fn new(backend: Arc<dyn QueueBackend>, default_queue: Option<String>) -> Self {
        Self {
            backend,
            default_queue: default_queue.filter(|q| !q.is_empty()),
            cache: DashMap::new(),
        }
    }

    #[inline]
    pub fn default_queue(&self) -> Option<&str> {
        self.default_queue.as_deref()
    }

    /// Resolve `name`, falling back to the default queue when it is absent or
    /// empty.
    pub fn resolve(&self, name: Option<&str>) -> QueueResult<QueueHandle> {
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => self.default_queue.as_deref().ok_or_else(|| {
                QueueError::Configuration(
                    "no queue name given and no default queue configured".into(),
                )
            })?,
        };

        if let Some(handle) = self.cache.get(name) {
            return Ok(handle.clone());
        }

        let handle = self
            .cache
            .entry(name.to_owned())
            .or_insert_with(|| {
                debug!(queue = name, "resolved queue");
                QueueHandle::new(name, Arc::clone(&self.backend))
            })
            .clone();
        Ok(handle)
    }

    /// Number of distinct queues resolved so far.
    #[inline]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
