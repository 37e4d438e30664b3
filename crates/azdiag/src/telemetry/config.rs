//! Telemetry configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Settings;

/// Default flush interval (ms)
pub const DEFAULT_FLUSH_INTERVAL: u64 = 15_000;

/// Envelopes kept in memory before the oldest are dropped
pub const MAX_BUFFERED_ENVELOPES: usize = 1000;

/// Ingestion endpoint used when the connection string does not name one
pub const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionStringError {
    #[error("No instrumentation key configured")]
    MissingInstrumentationKey,
    #[error("No ingestion endpoint configured")]
    MissingIngestionEndpoint,
    #[error("No live endpoint configured")]
    MissingLiveEndpoint,
}

/// Parsed Application Insights connection string
///
/// `Key=Value` pairs separated by `;`. Keys match case-insensitively and
/// unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub instrumentation_key: Option<String>,
    pub ingestion_endpoint: Option<String>,
    pub live_endpoint: Option<String>,
}

impl ConnectionString {
    pub fn parse(value: &str) -> Self {
        let mut parsed = Self::default();
        for part in value.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim().to_ascii_lowercase().as_str() {
                "instrumentationkey" => parsed.instrumentation_key = Some(value.to_string()),
                "ingestionendpoint" => parsed.ingestion_endpoint = Some(value.to_string()),
                "liveendpoint" => parsed.live_endpoint = Some(value.to_string()),
                _ => {}
            }
        }
        parsed
    }

    pub fn require_instrumentation_key(&self) -> Result<&str, ConnectionStringError> {
        self.instrumentation_key
            .as_deref()
            .ok_or(ConnectionStringError::MissingInstrumentationKey)
    }

    pub fn require_ingestion_endpoint(&self) -> Result<&str, ConnectionStringError> {
        self.ingestion_endpoint
            .as_deref()
            .ok_or(ConnectionStringError::MissingIngestionEndpoint)
    }

    pub fn require_live_endpoint(&self) -> Result<&str, ConnectionStringError> {
        self.live_endpoint
            .as_deref()
            .ok_or(ConnectionStringError::MissingLiveEndpoint)
    }

    /// `v2/track` under the ingestion endpoint, or under the public default
    pub fn track_url(&self) -> String {
        track_url(
            self.ingestion_endpoint
                .as_deref()
                .unwrap_or(DEFAULT_INGESTION_ENDPOINT),
        )
    }
}

/// Append `v2/track` to an ingestion endpoint with exactly one slash between
pub fn track_url(ingestion_endpoint: &str) -> String {
    format!("{}/v2/track", ingestion_endpoint.trim_end_matches('/'))
}

/// Telemetry client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether telemetry is sent at all
    pub enabled: bool,
    /// Flush interval (ms)
    pub flush_interval: u64,
    /// Buffer bound
    pub max_buffered: usize,
    /// Cloud role reported on every envelope
    pub role_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_buffered: MAX_BUFFERED_ENVELOPES,
            role_name: "azdiag".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = Self {
            enabled: !is_telemetry_disabled(settings),
            ..Self::default()
        };
        if let Some(secs) = settings.lookup_u64("AZDIAG_TELEMETRY_FLUSH_SECS") {
            config.flush_interval = secs.max(1).saturating_mul(1000);
        }
        if let Some(role) = settings.lookup("AZDIAG_TELEMETRY_ROLE") {
            config.role_name = role;
        }
        config
    }
}

/// Check whether telemetry is switched off
pub fn is_telemetry_disabled(settings: &Settings) -> bool {
    settings.lookup_bool("AZDIAG_DISABLE_TELEMETRY") || settings.lookup_bool("DISABLE_TELEMETRY")
}
