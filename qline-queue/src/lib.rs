//! Job queue client abstraction.
//!
//! This crate provides a uniform API for enqueuing work items (immediate,
//! delayed or recurring), leasing them for execution and reporting queue depth,
//! on top of a persistent queue backend that owns all durable state.
//!
//! # Architecture
//!
//! - [`QueueClient`] - The public facade: `push`, `push_raw`, `later`, `recur`, `pop`, `size`
//! - [`payload`] - Builds and parses the `{job, data, timeout, maxTries}` wire payload
//! - [`QueueHandle`] - A queue name resolved against the backend connection
//! - [`QueueJob`] - A leased job with its decoded payload and completion callbacks
//! - [`QueueBackend`] - The connection capability a queue engine must provide
//! - [`MemoryBackend`] - An in-process backend honoring the same contract
//! - [`Worker`] / [`JobExecutor`] - A poll loop dispatching jobs to handlers
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use qline_queue::{MemoryBackend, QueueClient, QueueConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), qline_queue::QueueError> {
//!     let client = QueueClient::new(
//!         Arc::new(MemoryBackend::new()),
//!         QueueConfig::default().with_default_queue("emails"),
//!     );
//!
//!     client.push("SendReminder", &json!({"userId": 42}), None).await?;
//!
//!     if let Some(mut job) = client.pop(None).await? {
//!         println!("running {}", job.payload().job);
//!         job.mark_complete().await?;
//!     }
//!     Ok(())
//! }
//! ```

mod backend;
mod client;
mod error;
mod executor;
mod handle;
mod job;
mod memory;
pub mod payload;
mod types;
mod worker;

pub use backend::QueueBackend;
pub use client::{Delay, QueueClient, QueueConfig, DEFAULT_CONNECTION_NAME};
pub use error::{QueueError, QueueResult};
pub use executor::{JobExecutor, NoOpExecutor};
pub use handle::{QueueHandle, QueueResolver};
pub use job::{Outcome, QueueJob};
pub use memory::{MemoryBackend, DEFAULT_LEASE_SECS, DEFAULT_MAX_TRIES};
pub use payload::{JobData, JobPayload, PushOptions};
pub use types::{JobId, JobState, LeasedJob, RecurringSchedule, ScheduleId};
pub use worker::{Tick, Worker, WorkerOptions};

// Re-export async_trait for convenience when implementing JobExecutor
pub use async_trait::async_trait;
