use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const BASE_URL_ENV: &str = "CHAPTERCHAT_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
const DEFAULT_CHAPTER_READ_PATTERN: &str = r"^/(chapters|chat/history/chapter)(/|$)";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("base_url must start with http:// or https://: {0}")]
    BaseUrl(String),

    #[error("invalid chapter_read_pattern: {0}")]
    ChapterPattern(#[from] regex::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,

    // Content-processing endpoints can run for many minutes.
    pub long_running_timeout_ms: u64,

    pub retry: RetryPolicy,
    pub refresh_failure_ttl_ms: u64,

    /// Matched against the request path; a 401 on a matching GET keeps the session.
    pub chapter_read_pattern: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            long_running_timeout_ms: 30 * 60 * 1_000,
            retry: RetryPolicy::default(),
            refresh_failure_ttl_ms: 30_000,
            chapter_read_pattern: DEFAULT_CHAPTER_READ_PATTERN.into(),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::BaseUrl(self.base_url.clone()));
        }
        self.chapter_read_regex()?;
        Ok(())
    }

    pub fn chapter_read_regex(&self) -> Result<Regex, ConfigError> {
        Ok(Regex::new(&self.chapter_read_pattern)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn long_running_timeout(&self) -> Duration {
        Duration::from_millis(self.long_running_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn refresh_failure_ttl(&self) -> Duration {
        Duration::from_millis(self.refresh_failure_ttl_ms)
    }
}
