//! Timeouts for outbound calls and probes

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::config::Settings;

/// Timeout configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connect timeout (ms)
    #[serde(default = "default_connect_timeout")]
    pub connect: u64,
    /// Whole-request timeout for a single HTTP call (ms)
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    /// Upper bound for one probe, all of its calls included (ms). 0 disables.
    #[serde(default = "default_probe_timeout")]
    pub probe: u64,
}

fn default_connect_timeout() -> u64 {
    DEFAULT_TIMEOUTS.connect
}
fn default_request_timeout() -> u64 {
    DEFAULT_TIMEOUTS.request
}
fn default_probe_timeout() -> u64 {
    DEFAULT_TIMEOUTS.probe
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        DEFAULT_TIMEOUTS
    }
}

/// Default timeouts: 10s connect, 30s per request, one minute per probe
pub const DEFAULT_TIMEOUTS: TimeoutConfig = TimeoutConfig {
    connect: 10_000,
    request: 30_000,
    probe: 60_000,
};

impl TimeoutConfig {
    /// Read `DIAG_HTTP_TIMEOUT_SECS` and `DIAG_PROBE_TIMEOUT_SECS`, keeping
    /// defaults for anything unset or unparsable. Huge values saturate.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = Self::default();
        if let Some(secs) = settings.lookup_u64("DIAG_HTTP_TIMEOUT_SECS") {
            config.request = secs.saturating_mul(1000);
        }
        if let Some(secs) = settings.lookup_u64("DIAG_PROBE_TIMEOUT_SECS") {
            config.probe = secs.saturating_mul(1000);
        }
        config
    }

    /// Probe timeout, `None` when disabled
    pub fn probe_timeout(&self) -> Option<Duration> {
        (self.probe > 0).then(|| Duration::from_millis(self.probe))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect)
    }
}

/// Timeout error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Operation timed out after {timeout_ms}ms")]
pub struct TimeoutError {
    /// Elapsed limit (ms)
    pub timeout_ms: u64,
}

/// Run a future with an upper bound on its duration
pub async fn with_timeout<T, F>(future: F, limit: Duration) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    match timeout(limit, future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(TimeoutError {
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Build the HTTP client shared by every service client
pub fn build_http_client(config: &TimeoutConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .user_agent(concat!("azdiag/", env!("CARGO_PKG_VERSION")))
        .build()
}
