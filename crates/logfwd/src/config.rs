// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_PROGRAM_NAME: &str = "custom-logger";
pub const DEFAULT_BUFFER_PATH: &str = "log_fwd_buffer.log";
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);
/// 50 ticks of the 100ms drain poll, i.e. 5 seconds without progress
pub const DEFAULT_DRAIN_STALL_TICKS: u32 = 50;
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Wire strategy used to reach the collector. Exactly one is active per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Independent HTTPS requests carrying JSON log entries
    #[default]
    Http,
    /// A long-lived TLS connection carrying raw syslog records
    Stream,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" | "https" => Ok(TransportKind::Http),
            "stream" | "tls" => Ok(TransportKind::Stream),
            other => Err(ConfigError::Invalid(format!(
                "unknown transport '{other}', expected 'http' or 'stream'"
            ))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Stream => write!(f, "stream"),
        }
    }
}

/// Forwarder configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Log destination host
    pub host: String,
    /// Log destination port
    pub port: u16,
    /// Full endpoint URL, overrides the one derived from host and port.
    /// Used for integration tests and plain-HTTP relays.
    pub url: Option<String>,
    /// PEM bundle of trusted CAs; the platform store is used when absent
    pub cert_file: Option<PathBuf>,
    /// Skip server certificate verification
    pub insecure_tls: bool,
    /// Bearer token for the HTTP API
    pub auth_token: Option<String>,
    pub transport: TransportKind,
    pub program_name: String,
    pub buffer_path: PathBuf,
    /// Ceiling of the on-disk ring buffer, in bytes
    pub max_buffer_size: u64,
    pub enable_batching: bool,
    pub batch_size: usize,
    pub max_retries: u32,
    /// Overall client timeout
    pub http_timeout: Duration,
    /// Timeout of each individual request, connect or write
    pub request_timeout: Duration,
    /// How long delivery sleeps when idle before looking at the buffer again
    pub polling_interval: Duration,
    pub compress: bool,
    /// Don't echo input lines to stdout
    pub quiet: bool,
    pub verbose: bool,
    /// Consecutive no-progress drain ticks before giving up at shutdown
    pub drain_stall_ticks: u32,
    pub drain_grace: Duration,
    pub stats_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            url: None,
            cert_file: None,
            insecure_tls: false,
            auth_token: None,
            transport: TransportKind::default(),
            program_name: DEFAULT_PROGRAM_NAME.to_string(),
            buffer_path: PathBuf::from(DEFAULT_BUFFER_PATH),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            enable_batching: true,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            compress: false,
            quiet: false,
            verbose: false,
            drain_stall_ticks: DEFAULT_DRAIN_STALL_TICKS,
            drain_grace: DEFAULT_DRAIN_GRACE,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host is required".to_string()));
        }

        if self.port == 0 {
            return Err(ConfigError::Invalid("valid port is required".to_string()));
        }

        if self.transport == TransportKind::Http
            && self.auth_token.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "authorization token is required".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch size must be greater than 0".to_string(),
            ));
        }

        if self.max_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "maximum buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The collector URL for the HTTP transport
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        if self.port == DEFAULT_PORT {
            format!("https://{}", self.host)
        } else {
            format!("https://{}:{}", self.host, self.port)
        }
    }

    /// Batch size actually used by delivery: 1 when batching is disabled
    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        if self.enable_batching {
            self.batch_size.max(1)
        } else {
            1
        }
    }
}
