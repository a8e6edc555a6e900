//! Worker configuration read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Method;
use thiserror::Error;
use url::Url;

/// SQS refuses long polls longer than this.
pub const MAX_POLL_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid value for {name}={value}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Where and how job status callbacks are sent.
#[derive(Debug, Clone)]
pub struct StatusConfig {
    /// Control-plane base, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Path appended to the base, e.g. `/api/fonts/progress`.
    pub progress_path: String,
    pub method: Method,
    /// Bearer token; the header is omitted when unset.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl StatusConfig {
    pub fn new(base_url: impl Into<String>, progress_path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            progress_path: progress_path.into(),
            method: Method::PATCH,
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Callback URL for one font: `<base><progress path>/<fontId>`.
    ///
    /// The font id is always a single, percent-encoded path segment.
    pub fn url_for(&self, font_id: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.progress_path.trim_end_matches('/')
        ))?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(font_id);
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Parent of every per-job working root.
    pub work_root: PathBuf,
    /// Directory holding per-job log files.
    pub log_dir: PathBuf,
    /// Directory holding the four stage executables.
    pub scripts_dir: PathBuf,
    /// Long-poll wait handed to the queue on each receive.
    pub poll_wait: Duration,
    /// Pause between consumer iterations.
    pub poll_interval: Duration,
    pub stage_timeout: Option<Duration>,
    /// Deliveries allowed before a message is dead-lettered; `None` never gives up.
    pub max_receive_attempts: Option<u32>,
    /// Announce PROGRESS when a job starts.
    pub report_progress: bool,
    pub status: StatusConfig,
}

impl WorkerConfig {
    /// Defaults suitable for local runs, with the given status endpoint.
    pub fn new(status: StatusConfig) -> Self {
        Self {
            work_root: PathBuf::from("./result"),
            log_dir: PathBuf::from("./log"),
            scripts_dir: PathBuf::from("./scripts"),
            poll_wait: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1000),
            stage_timeout: None,
            max_receive_attempts: None,
            report_progress: true,
            status,
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `WORK_ROOT` (default: `./result`)
    /// - `LOG_DIR` (default: `./log`)
    /// - `SCRIPTS_DIR` (default: `./scripts`)
    /// - `POLL_WAIT_SECONDS` (default: 10, capped at 20)
    /// - `POLL_INTERVAL_MS` (default: 1000)
    /// - `STAGE_TIMEOUT_SECONDS` (optional)
    /// - `MAX_RECEIVE_ATTEMPTS` (optional)
    /// - `REPORT_PROGRESS` (default: true)
    /// - `BACKEND_URL`, `FONT_PROGRESS_URI` (required)
    /// - `FONT_PROGRESS_URI_METHOD` (default: `PATCH`)
    /// - `JWT_TOKEN` (optional)
    /// - `STATUS_TIMEOUT_SECONDS` (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| var(name).and_then(non_empty);

        let base_url = get("BACKEND_URL").ok_or(ConfigError::Missing("BACKEND_URL"))?;
        Url::parse(&base_url).map_err(|e| ConfigError::Invalid {
            name: "BACKEND_URL",
            value: base_url.clone(),
            reason: e.to_string(),
        })?;
        let progress_path =
            get("FONT_PROGRESS_URI").ok_or(ConfigError::Missing("FONT_PROGRESS_URI"))?;

        let mut status = StatusConfig::new(base_url, progress_path);
        if let Some(method) = get("FONT_PROGRESS_URI_METHOD") {
            status.method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(
                |e| ConfigError::Invalid {
                    name: "FONT_PROGRESS_URI_METHOD",
                    value: method.clone(),
                    reason: e.to_string(),
                },
            )?;
        }
        status.token = get("JWT_TOKEN");
        if let Some(secs) = parse_number::<u64>("STATUS_TIMEOUT_SECONDS", get("STATUS_TIMEOUT_SECONDS"))? {
            status.timeout = Duration::from_secs(secs);
        }

        let mut cfg = Self::new(status);
        if let Some(dir) = get("WORK_ROOT") {
            cfg.work_root = PathBuf::from(dir);
        }
        if let Some(dir) = get("LOG_DIR") {
            cfg.log_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("SCRIPTS_DIR") {
            cfg.scripts_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_number::<u64>("POLL_WAIT_SECONDS", get("POLL_WAIT_SECONDS"))? {
            cfg.poll_wait = Duration::from_secs(secs).min(MAX_POLL_WAIT);
        }
        if let Some(ms) = parse_number::<u64>("POLL_INTERVAL_MS", get("POLL_INTERVAL_MS"))? {
            cfg.poll_interval = Duration::from_millis(ms);
        }
        cfg.stage_timeout = parse_number::<u64>("STAGE_TIMEOUT_SECONDS", get("STAGE_TIMEOUT_SECONDS"))?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        cfg.max_receive_attempts =
            parse_number::<u32>("MAX_RECEIVE_ATTEMPTS", get("MAX_RECEIVE_ATTEMPTS"))?
                .filter(|n| *n > 0);
        if let Some(flag) = parse_bool("REPORT_PROGRESS", get("REPORT_PROGRESS"))? {
            cfg.report_progress = flag;
        }

        Ok(cfg)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number<T>(name: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::Invalid {
                name,
                value: v.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool(name: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(v) = value else {
        return Ok(None);
    };

    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(Some(true)),
        "0" | "false" | "no" | "n" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            name,
            value: v,
            reason: "expected true/false".to_string(),
        }),
    }
}
