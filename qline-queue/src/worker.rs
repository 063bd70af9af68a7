//! Poll loop that dispatches dequeued jobs to registered executors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::client::QueueClient;
use crate::error::{QueueError, QueueResult};
use crate::executor::JobExecutor;
use crate::job::QueueJob;
use crate::types::JobId;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_UNAVAILABLE_BACKOFF: Duration = Duration::from_millis(5000);

/// Timing knobs for [`Worker::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Pause after finding the queue empty.
    pub poll_interval: Duration,
    /// Pause after the backend reported itself unavailable.
    pub unavailable_backoff: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            unavailable_backoff: DEFAULT_UNAVAILABLE_BACKOFF,
        }
    }
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// The queue had no visible work.
    Idle,
    Completed(JobId),
    Failed(JobId),
    /// Shutdown arrived mid-execution and the job went back to the queue.
    Released(JobId),
}

/// Pops jobs and runs the executor registered under their identifier.
#[derive(Clone)]
pub struct Worker {
    client: Arc<QueueClient>,
    executors: Arc<RwLock<HashMap<String, Arc<dyn JobExecutor>>>>,
    options: WorkerOptions,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("client", &self.client)
            .field(
                "executors",
                &"<RwLock<HashMap<String, Arc<dyn JobExecutor>>>>",
            )
            .field("options", &self.options)
            .finish()
    }
}

impl Worker {
    pub fn new(client: Arc<QueueClient>, options: WorkerOptions) -> Self {
        Self {
            client,
            executors: Arc::new(RwLock::new(HashMap::new())),
            options,
        }
    }

    /// Register a job executor for a specific job identifier.
    pub async fn register_executor<E: JobExecutor + 'static>(&self, executor: E) {
        let job_type = executor.job_type().to_owned();
        let mut executors = self.executors.write().await;
        executors.insert(job_type, Arc::new(executor));
    }

    async fn executor_for(&self, job_type: &str) -> Option<Arc<dyn JobExecutor>> {
        let executors = self.executors.read().await;
        executors.get(job_type).cloned()
    }

    /// Pop and process at most one job.
    pub async fn run_once(&self, queue: Option<&str>) -> QueueResult<Tick> {
        let (_tx, mut never) = watch::channel(false);
        match self.client.pop(queue).await? {
            Some(job) => self.process(job, &mut never).await,
            None => Ok(Tick::Idle),
        }
    }

    /// Poll `queue` until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// An empty queue and an unavailable backend both lead to a pause, with
    /// different lengths. A job still executing when shutdown arrives is
    /// released back to the queue.
    pub async fn run(
        &self,
        queue: Option<&str>,
        mut shutdown: watch::Receiver<bool>,
    ) -> QueueResult<()> {
        info!(queue = ?queue, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.client.pop(queue).await {
                Ok(Some(job)) => {
                    match self.process(job, &mut shutdown).await {
                        Ok(tick) => debug!(?tick, "processed job"),
                        Err(err) => warn!(error = %err, "could not report job outcome"),
                    }
                    continue;
                }
                Ok(None) => self.options.poll_interval,
                Err(err) if err.is_unavailable() => {
                    warn!(error = %err, backoff = ?self.options.unavailable_backoff, "queue backend unavailable");
                    self.options.unavailable_backoff
                }
                Err(err @ QueueError::Decoding(_)) => {
                    warn!(error = %err, "skipping undecodable job");
                    continue;
                }
                Err(err) => return Err(err),
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = wait_for_shutdown(&mut shutdown) => {}
            }
        }
        info!(queue = ?queue, "worker stopped");
        Ok(())
    }

    async fn process(
        &self,
        mut job: QueueJob,
        shutdown: &mut watch::Receiver<bool>,
    ) -> QueueResult<Tick> {
        let id = job.id().clone();
        let job_type = job.payload().job.clone();

        let Some(executor) = self.executor_for(&job_type).await else {
            job.mark_failed(&format!("no executor registered for job {job_type}"))
                .await?;
            return Ok(Tick::Failed(id));
        };

        let data = job.payload().data.clone();
        tokio::select! {
            result = executor.execute(data) => match result {
                Ok(()) => {
                    job.mark_complete().await?;
                    Ok(Tick::Completed(id))
                }
                Err(err) => {
                    job.mark_failed(&err.to_string()).await?;
                    Ok(Tick::Failed(id))
                }
            },
            _ = wait_for_shutdown(shutdown) => {
                job.release().await?;
                Ok(Tick::Released(id))
            }
        }
    }
}

/// Resolves once shutdown is requested or the sender side is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::QueueConfig;
    use crate::executor::NoOpExecutor;
    use crate::memory::MemoryBackend;
    use crate::payload::JobData;
    use crate::types::JobState;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingExecutor;

    #[async_trait]
    impl JobExecutor for FailingExecutor {
        fn job_type(&self) -> &str {
            "always.fails"
        }

        async fn execute(&self, _data: JobData) -> Result<(), QueueError> {
            Err(QueueError::ExecutionFailed("nope".into()))
        }
    }

    struct HangingExecutor;

    #[async_trait]
    impl JobExecutor for HangingExecutor {
        fn job_type(&self) -> &str {
            "hangs"
        }

        async fn execute(&self, _data: JobData) -> Result<(), QueueError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn setup() -> (MemoryBackend, Arc<QueueClient>) {
        let backend = MemoryBackend::new();
        let client = QueueClient::new(
            Arc::new(backend.clone()),
            QueueConfig::default().with_default_queue("jobs"),
        );
        (backend, Arc::new(client))
    }

    #[tokio::test]
    async fn run_once_completes_registered_job() {
        let (backend, client) = setup();
        let worker = Worker::new(client.clone(), WorkerOptions::default());
        worker.register_executor(NoOpExecutor::new("noop")).await;

        let id = client.push("noop", &json!({}), None).await.unwrap();
        assert_eq!(worker.run_once(None).await.unwrap(), Tick::Completed(id.clone()));
        assert_eq!(backend.job_state(&id).await, Some(JobState::Completed));
        assert_eq!(worker.run_once(None).await.unwrap(), Tick::Idle);
    }

    #[tokio::test]
    async fn unknown_job_fails_at_execution_time() {
        let (backend, client) = setup();
        let worker = Worker::new(client.clone(), WorkerOptions::default());

        let id = client.push("missing.handler", &json!({}), None).await.unwrap();
        assert_eq!(worker.run_once(None).await.unwrap(), Tick::Failed(id.clone()));
        assert!(backend
            .last_error(&id)
            .await
            .unwrap()
            .contains("no executor registered"));
    }

    #[tokio::test]
    async fn executor_error_marks_job_failed() {
        let (backend, client) = setup();
        let worker = Worker::new(client.clone(), WorkerOptions::default());
        worker.register_executor(FailingExecutor).await;

        let id = client.push("always.fails", &json!({}), None).await.unwrap();
        assert_eq!(worker.run_once(None).await.unwrap(), Tick::Failed(id.clone()));
        assert_eq!(backend.job_state(&id).await, Some(JobState::Pending));
        assert_eq!(backend.attempts(&id).await, Some(1));
    }

    #[tokio::test]
    async fn shutdown_releases_job_in_flight() {
        let (backend, client) = setup();
        let worker = Worker::new(client.clone(), WorkerOptions::default());
        worker.register_executor(HangingExecutor).await;
        let id = client.push("hangs", &json!({}), None).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(None, rx).await }
        });

        while backend.job_state(&id).await != Some(JobState::Leased) {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(backend.job_state(&id).await, Some(JobState::Pending));
        assert_eq!(backend.attempts(&id).await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn run_keeps_polling_through_outage() {
        let (backend, client) = setup();
        let worker = Worker::new(client.clone(), WorkerOptions::default());
        worker.register_executor(NoOpExecutor::new("noop")).await;

        backend.disconnect();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(None, rx).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        backend.reconnect();
        let id = client.push("noop", &json!({}), None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.job_state(&id).await, Some(JobState::Completed));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_without_queue_is_a_configuration_error() {
        let client = Arc::new(QueueClient::new(
            Arc::new(MemoryBackend::new()),
            QueueConfig::default(),
        ));
        let worker = Worker::new(client, WorkerOptions::default());
        let (_tx, rx) = watch::channel(false);

        assert!(matches!(
            worker.run(None, rx).await,
            Err(QueueError::Configuration(_))
        ));
    }
}
