use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SentiscopeError};
use crate::logging::LoggingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentiscopeConfig {
    // Backend
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Batch analysis
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    // Retry behaviour for single-shot calls and the per-run budget
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_budget")]
    pub max_retry_budget: u32,

    // Backend status monitor
    #[serde(default = "default_status_retry_interval_secs")]
    pub status_retry_interval_secs: u64,
    #[serde(default = "default_status_max_backoff_secs")]
    pub status_max_backoff_secs: u64,

    // Summary / chart view-models
    #[serde(default = "default_summary_top_n")]
    pub summary_top_n: usize,
    #[serde(default = "default_chart_top_n")]
    pub chart_top_n: usize,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default)]
    pub sample_seed: Option<u64>,

    #[serde(default = "default_activity_log_capacity")]
    pub activity_log_capacity: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SentiscopeConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_secs: default_request_timeout_secs(),
            batch_size: default_batch_size(),
            batch_timeout_secs: default_batch_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_budget: default_max_retry_budget(),
            status_retry_interval_secs: default_status_retry_interval_secs(),
            status_max_backoff_secs: default_status_max_backoff_secs(),
            summary_top_n: default_summary_top_n(),
            chart_top_n: default_chart_top_n(),
            sample_size: default_sample_size(),
            sample_seed: None,
            activity_log_capacity: default_activity_log_capacity(),
            output_dir: default_output_dir(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SentiscopeConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: SentiscopeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `SENTISCOPE_*` environment overrides. `SERVER_URL` is honoured
    /// for compatibility with existing desktop launch scripts.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("SENTISCOPE_SERVER_URL").or_else(|_| std::env::var("SERVER_URL")) {
            if !url.trim().is_empty() {
                self.server_url = url.trim().to_string();
            }
        }
        if let Ok(size) = std::env::var("SENTISCOPE_BATCH_SIZE") {
            self.batch_size = size
                .trim()
                .parse()
                .map_err(|_| SentiscopeError::Config(format!("invalid SENTISCOPE_BATCH_SIZE: {}", size)))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SentiscopeError::Config("batch_size must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 || self.batch_timeout_secs == 0 {
            return Err(SentiscopeError::Config("timeouts must be non-zero".into()));
        }
        if self.summary_top_n == 0 || self.chart_top_n == 0 {
            return Err(SentiscopeError::Config("top-N sizes must be non-zero".into()));
        }
        if self.server_url.trim().is_empty() {
            return Err(SentiscopeError::Config("server_url is empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// Default value functions
fn default_server_url() -> String { "http://127.0.0.1:5000".to_string() }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_batch_size() -> usize { 1000 }
fn default_batch_timeout_secs() -> u64 { 30 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 2000 }
fn default_max_retry_budget() -> u32 { 6 }
fn default_status_retry_interval_secs() -> u64 { 10 }
fn default_status_max_backoff_secs() -> u64 { 120 }
fn default_summary_top_n() -> usize { 5 }
fn default_chart_top_n() -> usize { 10 }
fn default_sample_size() -> usize { 5 }
fn default_activity_log_capacity() -> usize { 500 }
fn default_output_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sentiscope")
}
