use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Pre-compiled regex for queue name validation (compiled once at first use)
static QUEUE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]*$").unwrap());

pub const DEFAULT_CONNECTION_NAME: &str = "qline";

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub queue: Option<QueueSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub worker: Option<WorkerSection>,
}

#[derive(Debug, Deserialize)]
pub struct QueueSection {
    /// Default queue name, used when a call does not name one.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_tries: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerSection {
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub unavailable_backoff_ms: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

/// Parse configuration from a string with optional format hint
#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try to parse config by attempting each enabled format
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueConfig {
    /// `None` means every call must name its queue.
    pub default_queue: Option<String>,
    pub connection_name: String,
    /// `0` defers to the backend default.
    pub timeout_secs: u64,
    /// `0` defers to the backend default.
    pub max_tries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub unavailable_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig {
                default_queue: None,
                connection_name: DEFAULT_CONNECTION_NAME.to_string(),
                timeout_secs: 0,
                max_tries: 0,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            worker: WorkerConfig {
                poll_interval_ms: 1000,
                unavailable_backoff_ms: 5000,
            },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(()),
    }
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        if let Some(queue) = raw.queue {
            apply_opt!(cfg.queue.default_queue, queue.default, wrap);
            apply_opt!(cfg.queue.connection_name, queue.connection);
            apply_opt!(cfg.queue.timeout_secs, queue.timeout_secs);
            apply_opt!(cfg.queue.max_tries, queue.max_tries);
        }
        if let Some(logging) = raw.logging {
            apply_opt!(cfg.logging.level, logging.level);
            apply_opt!(cfg.logging.json, logging.json);
        }
        if let Some(worker) = raw.worker {
            apply_opt!(cfg.worker.poll_interval_ms, worker.poll_interval_ms);
            apply_opt!(cfg.worker.unavailable_backoff_ms, worker.unavailable_backoff_ms);
        }
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

/// Helper to parse env var as a specific type
#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Helper to parse env var as bool
#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Apply all environment variable overrides to config
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Queue
    if let Some(v) = env_str("QLINE_QUEUE") {
        cfg.queue.default_queue = Some(v);
    }
    if let Some(v) = env_str("QLINE_CONNECTION") {
        cfg.queue.connection_name = v;
    }
    if let Some(v) = env_parse::<u64>("QLINE_TIMEOUT_SECS")? {
        cfg.queue.timeout_secs = v;
    }
    if let Some(v) = env_parse::<u32>("QLINE_MAX_TRIES")? {
        cfg.queue.max_tries = v;
    }

    // Logging
    if let Some(v) = env_str("QLINE_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("QLINE_LOG_JSON")? {
        cfg.logging.json = v;
    }

    // Worker
    if let Some(v) = env_parse::<u64>("QLINE_POLL_INTERVAL_MS")? {
        cfg.worker.poll_interval_ms = v;
    }
    if let Some(v) = env_parse::<u64>("QLINE_UNAVAILABLE_BACKOFF_MS")? {
        cfg.worker.unavailable_backoff_ms = v;
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(queue) = &cfg.queue.default_queue {
        if !QUEUE_NAME_REGEX.is_match(queue) {
            return Err(ConfigError::Validation(format!(
                "invalid queue.default: {:?}",
                queue
            )));
        }
    }
    if cfg.queue.connection_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "queue.connection must not be empty".into(),
        ));
    }
    if cfg.worker.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "worker.poll_interval_ms must be > 0".into(),
        ));
    }
    if cfg.worker.unavailable_backoff_ms == 0 {
        return Err(ConfigError::Validation(
            "worker.unavailable_backoff_ms must be > 0".into(),
        ));
    }
    Ok(())
}
