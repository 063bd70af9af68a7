//! Core types shared between the client and backend connections.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::payload::JobData;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[inline]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh 32 character hex identifier.
            #[inline]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Backend-assigned identifier of an enqueued job.
    JobId
);

opaque_id!(
    /// Backend-assigned identifier of a recurring schedule.
    ScheduleId
);

/// Rule that makes the backend materialize a job every `interval_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSchedule {
    pub interval_secs: u64,
    pub job: String,
    pub data: JobData,
}

impl RecurringSchedule {
    /// Build a schedule, rejecting a zero interval or empty job identifier.
    pub fn new(interval_secs: u64, job: impl Into<String>, data: JobData) -> QueueResult<Self> {
        if interval_secs == 0 {
            return Err(QueueError::Validation(
                "recurrence interval must be greater than 0 seconds".into(),
            ));
        }
        let job = job.into();
        if job.is_empty() {
            return Err(QueueError::Validation(
                "job identifier must not be empty".into(),
            ));
        }
        Ok(Self {
            interval_secs,
            job,
            data,
        })
    }
}

/// A job leased from the backend, before the client decodes it.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: JobId,
    pub queue: String,
    /// Wire form of the payload, see [`crate::payload`].
    pub payload: String,
    /// 1-based attempt number of this lease.
    pub attempt: u32,
    pub lease_expires_at: Instant,
}

/// Client-observed lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Leased,
    Completed,
    /// Attempts exhausted; the backend stops retrying.
    Dead,
}

impl JobState {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Completed => "completed",
            Self::Dead => "dead",
        })
    }
}
