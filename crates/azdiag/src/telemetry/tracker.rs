//! Telemetry client
//!
//! Built once at startup and handed to whatever needs it. A client without a
//! usable connection string accepts every call and sends nothing.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::*;
use super::sanitizer::*;
use super::types::*;
use crate::config::Settings;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry request failed")]
    Http(#[from] reqwest::Error),
    #[error("telemetry rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

struct Inner {
    config: TelemetryConfig,
    instrumentation_key: String,
    track_url: String,
    http: reqwest::Client,
    buffer: Mutex<Vec<Envelope>>,
}

impl Inner {
    async fn post(&self, batch: &[Envelope]) -> Result<(), TelemetryError> {
        let response = self.http.post(&self.track_url).json(batch).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn requeue(&self, mut batch: Vec<Envelope>) {
        let mut buffer = self.buffer.lock();
        batch.append(&mut buffer);
        let excess = batch.len().saturating_sub(self.config.max_buffered);
        if excess > 0 {
            batch.drain(..excess);
        }
        *buffer = batch;
    }
}

/// Application Insights sink
#[derive(Clone, Default)]
pub struct TelemetryClient {
    inner: Option<Arc<Inner>>,
}

impl std::fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl TelemetryClient {
    /// A client that drops everything
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Build a client from a connection string; a missing or unusable one
    /// yields a disabled client
    pub fn from_connection_string(
        connection_string: Option<&str>,
        config: TelemetryConfig,
        http: reqwest::Client,
    ) -> Self {
        if !config.enabled {
            debug!("telemetry disabled by configuration");
            return Self::disabled();
        }
        let Some(raw) = connection_string else {
            debug!("no Application Insights connection string, telemetry disabled");
            return Self::disabled();
        };
        let parsed = ConnectionString::parse(raw);
        let instrumentation_key = match parsed.require_instrumentation_key() {
            Ok(key) => key.to_string(),
            Err(e) => {
                warn!(error = %e, "invalid Application Insights connection string, telemetry disabled");
                return Self::disabled();
            }
        };

        Self {
            inner: Some(Arc::new(Inner {
                track_url: parsed.track_url(),
                instrumentation_key,
                config,
                http,
                buffer: Mutex::new(Vec::new()),
            })),
        }
    }

    pub fn from_settings(settings: &Settings, http: reqwest::Client) -> Self {
        Self::from_connection_string(
            settings.app_insights_connection_string().as_deref(),
            TelemetryConfig::from_settings(settings),
            http,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Number of envelopes waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.inner.as_ref().map(|i| i.buffer.lock().len()).unwrap_or(0)
    }

    /// Queue one item; returns whether it was accepted
    fn track(&self, data: TelemetryData) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };
        let envelope = Envelope::new(&inner.instrumentation_key, data)
            .with_tag("ai.cloud.role", inner.config.role_name.clone())
            .with_tag(
                "ai.internal.sdkVersion",
                concat!("azdiag:", env!("CARGO_PKG_VERSION")),
            );

        let mut buffer = inner.buffer.lock();
        buffer.push(envelope);
        if buffer.len() > inner.config.max_buffered {
            buffer.remove(0);
        }
        true
    }

    pub fn track_trace(
        &self,
        message: &str,
        severity: SeverityLevel,
        properties: Properties,
    ) -> bool {
        let mut trace = TraceTelemetry::new(sanitize_string(message), severity);
        trace.properties = sanitize_properties(&properties);
        self.track(TelemetryData::MessageData(trace))
    }

    pub fn track_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        properties: Properties,
    ) -> bool {
        let mut exception = ExceptionTelemetry::from_error(error);
        for details in &mut exception.exceptions {
            details.message = sanitize_string(&details.message);
        }
        exception.properties = sanitize_properties(&properties);
        self.track(TelemetryData::ExceptionData(exception))
    }

    pub fn track_metric(&self, name: &str, value: f64, properties: Properties) -> bool {
        let mut metric = MetricTelemetry::new(name, value);
        metric.properties = sanitize_properties(&properties);
        self.track(TelemetryData::MetricData(metric))
    }

    pub fn track_dependency(&self, mut dependency: DependencyTelemetry) -> bool {
        dependency.data = sanitize_string(&dependency.data);
        dependency.properties = sanitize_properties(&dependency.properties);
        self.track(TelemetryData::RemoteDependencyData(dependency))
    }

    /// Run `call`, recording its duration and outcome as a dependency
    ///
    /// `extra` derives additional properties from a successful value.
    pub async fn track_dependency_call<T, E, F, Fut, X>(
        &self,
        dependency: DependencyCall,
        call: F,
        extra: X,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        X: FnOnce(&T) -> Properties,
    {
        let started = Instant::now();
        let result = call().await;
        let elapsed = started.elapsed();

        if self.is_enabled() {
            let (success, extra) = match &result {
                Ok(value) => (true, extra(value)),
                Err(_) => (false, Properties::new()),
            };
            self.track_dependency(dependency.complete(elapsed, success, extra));
        }
        result
    }

    /// Record the time since `started` as a metric in milliseconds
    pub fn track_duration_metric(&self, name: &str, started: Instant, properties: Properties) -> bool {
        self.track_metric(name, started.elapsed().as_secs_f64() * 1000.0, properties)
    }

    /// Send everything buffered; returns the number of envelopes sent
    ///
    /// A batch that fails to send goes back to the front of the buffer, where
    /// the oldest envelopes are dropped first once it is full.
    pub async fn flush(&self) -> Result<usize, TelemetryError> {
        let Some(inner) = &self.inner else {
            return Ok(0);
        };
        let batch: Vec<Envelope> = std::mem::take(&mut *inner.buffer.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        match inner.post(&batch).await {
            Ok(()) => {
                debug!(count = batch.len(), "telemetry flushed");
                Ok(batch.len())
            }
            Err(e) => {
                inner.requeue(batch);
                Err(e)
            }
        }
    }

    /// Flush on the configured interval until the returned task is aborted
    pub fn spawn_flush_loop(&self) -> Option<JoinHandle<()>> {
        let inner = self.inner.as_ref()?;
        let period = Duration::from_millis(inner.config.flush_interval.max(1));
        let client = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = client.flush().await {
                    warn!(error = %e, "telemetry flush failed");
                }
            }
        }))
    }
}
