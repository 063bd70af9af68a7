//! Job payload codec.
//!
//! The wire form exchanged with the backend is a JSON object:
//!
//! ```json
//! {"job": "SendReminder", "data": {"userId": 42}, "timeout": 30, "maxTries": 3}
//! ```
//!
//! `job` is required and must be non-empty. `data` defaults to an empty object,
//! `timeout` and `maxTries` default to `0` (backend default).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{QueueError, QueueResult};

/// Arguments handed to a job handler.
pub type JobData = Map<String, Value>;

/// Override keys recognized by [`merge`]. Anything else is dropped.
pub const OVERRIDE_TIMEOUT: &str = "timeout";
pub const OVERRIDE_MAX_TRIES: &str = "maxTries";

/// Structured description of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Identifier of the handler that runs this job.
    pub job: String,
    pub data: JobData,
    /// Lease length in seconds, `0` lets the backend decide.
    #[serde(rename = "timeout")]
    pub timeout_secs: u64,
    /// Attempts before the job is dead, `0` lets the backend decide.
    #[serde(rename = "maxTries")]
    pub max_tries: u32,
}

impl JobPayload {
    #[inline]
    pub fn new(job: impl Into<String>, data: JobData) -> Self {
        Self {
            job: job.into(),
            data,
            timeout_secs: 0,
            max_tries: 0,
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    #[inline]
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Serialize to the wire form.
    pub fn to_wire(&self) -> QueueResult<String> {
        if self.job.is_empty() {
            return Err(QueueError::Encoding(
                "job identifier must not be empty".into(),
            ));
        }
        serde_json::to_string(self).map_err(QueueError::encoding)
    }
}

/// Caller supplied overrides applied on top of a payload before enqueue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
    pub timeout_secs: Option<u64>,
    pub max_tries: Option<u32>,
}

impl PushOptions {
    #[inline]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[inline]
    pub fn max_tries(mut self, tries: u32) -> Self {
        self.max_tries = Some(tries);
        self
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.timeout_secs.is_none() && self.max_tries.is_none()
    }

    /// Pick the recognized override keys out of a loosely-typed options map.
    ///
    /// Only `timeout` and `maxTries` are read; other keys are ignored. A
    /// recognized key holding something other than a non-negative integer is
    /// rejected rather than silently skipped.
    pub fn from_value(options: &Value) -> QueueResult<Self> {
        let map = match options {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(QueueError::Validation(format!(
                    "options must be an object, got {}",
                    json_kind(other)
                )))
            }
        };

        let mut opts = Self::default();
        for (key, value) in map {
            match key.as_str() {
                OVERRIDE_TIMEOUT => opts.timeout_secs = Some(non_negative(key, value)?),
                OVERRIDE_MAX_TRIES => {
                    let tries = non_negative(key, value)?;
                    opts.max_tries = Some(u32::try_from(tries).map_err(|_| {
                        QueueError::Validation(format!("{key} out of range: {tries}"))
                    })?);
                }
                other => debug!(key = other, "ignoring unrecognized push option"),
            }
        }
        Ok(opts)
    }
}

fn non_negative(key: &str, value: &Value) -> QueueResult<u64> {
    value.as_u64().ok_or_else(|| {
        QueueError::Validation(format!(
            "{key} must be a non-negative integer, got {value}"
        ))
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convert any serializable argument value into job data.
///
/// The value must serialize to a JSON object (or `null`, read as no
/// arguments).
pub fn to_job_data<T: Serialize + ?Sized>(data: &T) -> QueueResult<JobData> {
    match serde_json::to_value(data).map_err(QueueError::encoding)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(JobData::new()),
        other => Err(QueueError::Encoding(format!(
            "job data must be an object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Build the wire form of a payload.
pub fn encode<T: Serialize + ?Sized>(
    job: &str,
    data: &T,
    timeout_secs: u64,
    max_tries: u32,
) -> QueueResult<String> {
    JobPayload::new(job, to_job_data(data)?)
        .with_timeout(timeout_secs)
        .with_max_tries(max_tries)
        .to_wire()
}

#[derive(Deserialize)]
struct WirePayload {
    #[serde(default)]
    job: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default, rename = "maxTries")]
    max_tries: Option<u32>,
}

/// Parse and validate the wire form.
pub fn decode(raw: &str) -> QueueResult<JobPayload> {
    let wire: WirePayload = serde_json::from_str(raw).map_err(QueueError::decoding)?;

    let job = match wire.job {
        Some(job) if !job.is_empty() => job,
        _ => return Err(QueueError::Decoding("missing job identifier".into())),
    };
    let data = match wire.data {
        Value::Object(map) => map,
        Value::Null => JobData::new(),
        other => {
            return Err(QueueError::Decoding(format!(
                "job data must be an object, got {}",
                json_kind(&other)
            )))
        }
    };

    Ok(JobPayload {
        job,
        data,
        timeout_secs: wire.timeout.unwrap_or(0),
        max_tries: wire.max_tries.unwrap_or(0),
    })
}

/// Apply overrides onto a payload. Set override fields win.
pub fn merge(mut base: JobPayload, overrides: &PushOptions) -> JobPayload {
    if let Some(timeout) = overrides.timeout_secs {
        base.timeout_secs = timeout;
    }
    if let Some(tries) = overrides.max_tries {
        base.max_tries = tries;
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn encode_then_decode_preserves_payload() {
        let data = json!({"userId": 42, "tags": ["a", "b"], "nested": {"x": null}});
        let raw = encode("SendReminder", &data, 30, 3).expect("encode");
        let decoded = decode(&raw).expect("decode");

        assert_eq!(decoded.job, "SendReminder");
        assert_eq!(Value::Object(decoded.data), data);
        assert_eq!(decoded.timeout_secs, 30);
        assert_eq!(decoded.max_tries, 3);
    }

    #[test]
    fn wire_uses_camel_case_max_tries() {
        let raw = encode("a.job", &json!({}), 0, 7).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["maxTries"], 7);
        assert_eq!(value["timeout"], 0);
        assert_eq!(value["job"], "a.job");
    }

    #[test]
    fn encode_accepts_structs_and_null() {
        #[derive(Serialize)]
        struct Args {
            user_id: u64,
        }
        let raw = encode("x", &Args { user_id: 1 }, 0, 0).unwrap();
        assert_eq!(decode(&raw).unwrap().data["user_id"], 1);

        let raw = encode("x", &Value::Null, 0, 0).unwrap();
        assert!(decode(&raw).unwrap().data.is_empty());
    }

    #[test]
    fn encode_rejects_non_object_data() {
        let err = encode("x", &json!([1, 2]), 0, 0).unwrap_err();
        assert!(matches!(err, QueueError::Encoding(_)));
    }

    #[test]
    fn encode_rejects_unserializable_data() {
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        let err = encode("x", &bad, 0, 0).unwrap_err();
        assert!(matches!(err, QueueError::Encoding(_)));
    }

    #[test]
    fn encode_rejects_empty_job() {
        let err = encode("", &json!({}), 0, 0).unwrap_err();
        assert!(matches!(err, QueueError::Encoding(_)));
    }

    #[test]
    fn decode_fills_defaults() {
        let payload = decode(r#"{"job":"only.job"}"#).unwrap();
        assert_eq!(payload, JobPayload::new("only.job", JobData::new()));
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        for raw in [
            "not json",
            "[]",
            r#"{"data":{}}"#,
            r#"{"job":""}"#,
            r#"{"job":5}"#,
            r#"{"job":"x","data":"text"}"#,
            r#"{"job":"x","timeout":-1}"#,
        ] {
            let err = decode(raw).unwrap_err();
            assert!(matches!(err, QueueError::Decoding(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn merge_prefers_overrides() {
        let base = JobPayload::new("x", JobData::new())
            .with_timeout(10)
            .with_max_tries(2);

        let merged = merge(base.clone(), &PushOptions::default().timeout(99));
        assert_eq!(merged.timeout_secs, 99);
        assert_eq!(merged.max_tries, 2);

        assert_eq!(merge(base.clone(), &PushOptions::default()), base);
    }

    #[test]
    fn options_only_read_recognized_keys() {
        let opts = PushOptions::from_value(&json!({
            "timeout": 5,
            "maxTries": 4,
            "job": "hijack",
            "data": {"evil": true}
        }))
        .unwrap();
        assert_eq!(opts, PushOptions::default().timeout(5).max_tries(4));

        assert!(PushOptions::from_value(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn options_reject_bad_values() {
        assert!(matches!(
            PushOptions::from_value(&json!({"timeout": "soon"})),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            PushOptions::from_value(&json!({"maxTries": u64::MAX})),
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            PushOptions::from_value(&json!("timeout")),
            Err(QueueError::Validation(_))
        ));
    }
}
