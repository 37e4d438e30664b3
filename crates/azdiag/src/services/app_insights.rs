//! Direct Application Insights ingestion check
//!
//! Bypasses the buffered telemetry client: resolves the ingestion host, posts
//! a single message straight to `v2/track` and reads back what the service
//! accepted, then resolves the live metrics host.

use tracing::debug;
use url::Url;

use super::ServiceError;
use crate::telemetry::{
    track_url, ConnectionString, Envelope, IngestionResponse, SeverityLevel, TelemetryData,
    TraceTelemetry,
};

pub const DIRECT_TEST_MESSAGE: &str = "direct diagnostics test message from server";

#[derive(Debug, Clone)]
pub struct IngestionProbe {
    connection_string: Option<String>,
    http: reqwest::Client,
}

impl IngestionProbe {
    pub fn new(connection_string: Option<String>, http: reqwest::Client) -> Self {
        Self {
            connection_string,
            http,
        }
    }

    pub async fn run(&self) -> Result<IngestionResponse, ServiceError> {
        let raw = self
            .connection_string
            .as_deref()
            .ok_or_else(|| ServiceError::Unavailable("No connection string".to_string()))?;
        let parsed = ConnectionString::parse(raw);
        let instrumentation_key = parsed.require_instrumentation_key()?;
        let ingestion_endpoint = parsed.require_ingestion_endpoint()?;

        resolve("ingestion", ingestion_endpoint).await?;
        let response = self.send(instrumentation_key, ingestion_endpoint).await?;

        let live_endpoint = parsed.require_live_endpoint()?;
        resolve("live", live_endpoint).await?;
        Ok(response)
    }

    async fn send(
        &self,
        instrumentation_key: &str,
        ingestion_endpoint: &str,
    ) -> Result<IngestionResponse, ServiceError> {
        let fetch_error = |message: String| {
            ServiceError::Unavailable(format!(
                "Error fetching ingestion endpoint ({}): {}",
                ingestion_endpoint, message
            ))
        };

        let envelope = Envelope::new(
            instrumentation_key,
            TelemetryData::MessageData(TraceTelemetry::new(
                DIRECT_TEST_MESSAGE,
                SeverityLevel::Information,
            )),
        );
        let response = self
            .http
            .post(track_url(ingestion_endpoint))
            .json(&[envelope])
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!(
                "Failed to fetch ingestion endpoint: {}",
                status.as_u16()
            )));
        }
        let body = response.text().await.map_err(|e| fetch_error(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(IngestionResponse::default());
        }
        serde_json::from_str(&body).map_err(|e| fetch_error(e.to_string()))
    }
}

/// Resolve the host of `endpoint`, naming which endpoint failed
async fn resolve(name: &'static str, endpoint: &str) -> Result<(), ServiceError> {
    let url = Url::parse(endpoint).map_err(|source| ServiceError::InvalidEndpoint {
        url: endpoint.to_string(),
        source,
    })?;
    let host = url.host_str().unwrap_or_default().to_string();
    let port = url.port_or_known_default().unwrap_or(443);
    let addresses = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|source| ServiceError::Dns {
            endpoint: name,
            host: host.clone(),
            source,
        })?;
    debug!(endpoint = name, host = %host, resolved = addresses.count(), "resolved endpoint");
    Ok(())
}

/// Text shown for a direct ingestion result
pub fn describe_ingestion(response: &IngestionResponse) -> String {
    if response.accepted_all(1) {
        "Item accepted with no errors".to_string()
    } else {
        serde_json::to_string(response).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_connection_string() {
        let probe = IngestionProbe::new(None, reqwest::Client::new());
        assert_eq!(probe.run().await.unwrap_err().to_string(), "No connection string");
    }

    #[tokio::test]
    async fn test_missing_ingestion_endpoint() {
        let probe = IngestionProbe::new(Some("InstrumentationKey=abc".to_string()), reqwest::Client::new());
        assert_eq!(
            probe.run().await.unwrap_err().to_string(),
            "No ingestion endpoint configured"
        );
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_reported() {
        let probe = IngestionProbe::new(
            Some("InstrumentationKey=abc;IngestionEndpoint=not a url".to_string()),
            reqwest::Client::new(),
        );
        assert!(matches!(
            probe.run().await.unwrap_err(),
            ServiceError::InvalidEndpoint { .. }
        ));
    }

    #[test]
    fn test_describe_ingestion() {
        let accepted = IngestionResponse {
            items_received: Some(1),
            items_accepted: Some(1),
            errors: Some(Vec::new()),
        };
        assert_eq!(describe_ingestion(&accepted), "Item accepted with no errors");

        let rejected = IngestionResponse {
            items_received: Some(1),
            items_accepted: Some(0),
            errors: None,
        };
        assert_eq!(describe_ingestion(&rejected), r#"{"itemsReceived":1,"itemsAccepted":0}"#);
    }
}
