//! Engine configuration.
//!
//! Supports configuration from:
//! - TOML file
//! - Environment variables with `TICKMQTT__` prefix
//!
//! Environment variable examples:
//! - `TICKMQTT__CONNECT_TIMEOUT_MS=2000`
//! - `TICKMQTT__TICK_MODE=async`

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{ClientError, Result};

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETRY_PUBLISH_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SEND_RETRY_COUNT: u32 = 3;
pub const DEFAULT_SEND_RETRY_BACKOFF_MS: u64 = 10;
pub const DEFAULT_MAX_BATCH_BYTES: usize = 64 * 1024;
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_ASYNC_TICK_INTERVAL_MS: u64 = 50;

/// Who drives [`crate::Client::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickMode {
    /// The caller ticks on its own thread.
    #[default]
    Sync,
    /// A background thread ticks; operations wake it early.
    Async,
}

/// Timeouts, retry policy and buffer sizing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time allowed from `connect()` to CONNACK.
    pub connect_timeout_ms: u64,
    /// Time allowed for PINGRESP after PINGREQ is sent.
    pub ping_timeout_ms: u64,
    /// Time after which an unacknowledged QoS 1/2 message is resent.
    pub retry_publish_interval_ms: u64,
    /// Socket send attempts per batch before giving up.
    pub send_retry_count: u32,
    /// Delay between socket send attempts.
    pub send_retry_backoff_ms: u64,
    /// Upper bound on one composed send batch. A single larger packet is
    /// still sent on its own.
    pub max_batch_bytes: usize,
    /// Socket read chunk size.
    pub receive_buffer_size: usize,
    /// Background tick period in async mode.
    pub async_tick_interval_ms: u64,
    pub tick_mode: TickMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            retry_publish_interval_ms: DEFAULT_RETRY_PUBLISH_INTERVAL_MS,
            send_retry_count: DEFAULT_SEND_RETRY_COUNT,
            send_retry_backoff_ms: DEFAULT_SEND_RETRY_BACKOFF_MS,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            async_tick_interval_ms: DEFAULT_ASYNC_TICK_INTERVAL_MS,
            tick_mode: TickMode::Sync,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable
    /// overrides. A missing file is not an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut builder = config::Config::builder();

        let path = path.as_ref();
        if path.is_file() {
            let content = std::fs::read_to_string(path)?;
            builder = builder.add_source(File::from_str(&content, FileFormat::Toml));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("TICKMQTT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let config: Config = cfg
            .try_deserialize()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_publish_interval_ms == 0 {
            return Err(ClientError::Config(
                "retry_publish_interval_ms must be positive".into(),
            ));
        }
        if self.max_batch_bytes == 0 {
            return Err(ClientError::Config("max_batch_bytes must be positive".into()));
        }
        if self.receive_buffer_size == 0 {
            return Err(ClientError::Config(
                "receive_buffer_size must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn retry_publish_interval(mut self, interval: Duration) -> Self {
        self.retry_publish_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn send_retries(mut self, count: u32, backoff: Duration) -> Self {
        self.send_retry_count = count;
        self.send_retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn tick_mode(mut self, mode: TickMode) -> Self {
        self.tick_mode = mode;
        self
    }

    pub(crate) fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn ping_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub(crate) fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_publish_interval_ms)
    }

    pub(crate) fn send_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.send_retry_backoff_ms)
    }

    pub(crate) fn async_tick_interval(&self) -> Duration {
        Duration::from_millis(self.async_tick_interval_ms)
    }
}
