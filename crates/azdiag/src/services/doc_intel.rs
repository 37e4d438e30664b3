//! Document Intelligence (form recognizer) analysis

use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{best_error_message_from_value, check_response, read_json, ServiceError};
use crate::config::{ConfigHint, ConfigValue, Settings};

const SERVICE: &str = "Document Intelligence";

pub const ANALYZE_API_VERSION: &str = "2023-07-31";
pub const DEFAULT_MODEL: &str = "prebuilt-document";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_POLLS: u32 = 60;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION: &str = "operation-location";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeResult {
    #[serde(default)]
    pub pages: Vec<Value>,
    #[serde(default)]
    pub paragraphs: Vec<Value>,
    #[serde(default)]
    pub content: Option<String>,
}

impl AnalyzeResult {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn paragraph_count(&self) -> usize {
        self.paragraphs.len()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct DocumentIntelligenceClient {
    endpoint: ConfigValue,
    key: ConfigValue,
    show_keys: bool,
    http: reqwest::Client,
    poll_interval: Duration,
    max_polls: u32,
}

impl DocumentIntelligenceClient {
    pub fn from_settings(settings: &Settings, http: reqwest::Client) -> Result<Self, ServiceError> {
        Ok(Self {
            endpoint: settings.value("AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT"),
            key: settings.value("AZURE_DOCUMENT_INTELLIGENCE_KEY"),
            show_keys: settings.show_keys_in_errors(),
            http,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    /// Wait used between polls when the service sends no `Retry-After`
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    fn hint(&self) -> ConfigHint {
        ConfigHint::new("Failed to call form intelligence service.", self.show_keys)
            .value("endpoint", &self.endpoint)
            .secret("key", &self.key)
    }

    /// Submit a document to the `prebuilt-document` model and poll until the
    /// analysis settles
    pub async fn analyze(
        &self,
        document: Vec<u8>,
        content_type: &str,
    ) -> Result<AnalyzeResult, ServiceError> {
        let endpoint = self.endpoint.require()?;
        let key = self.key.require()?;
        let url = format!(
            "{}/formrecognizer/documentModels/{}:analyze?api-version={}",
            endpoint.trim_end_matches('/'),
            DEFAULT_MODEL,
            ANALYZE_API_VERSION
        );

        let response = self
            .http
            .post(url)
            .header(SUBSCRIPTION_KEY_HEADER, &key)
            .header(CONTENT_TYPE, content_type)
            .body(document)
            .send()
            .await
            .map_err(ServiceError::transport(SERVICE))?;
        let response = check_response(SERVICE, response, || self.hint()).await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(ServiceError::decode(
                SERVICE,
                format!("expected 202 Accepted, got {}", response.status()),
            ));
        }
        let operation = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ServiceError::decode(SERVICE, "missing Operation-Location header"))?;
        let mut wait = retry_after(response.headers()).unwrap_or(self.poll_interval);

        for poll in 1..=self.max_polls {
            tokio::time::sleep(wait).await;
            let response = self
                .http
                .get(&operation)
                .header(SUBSCRIPTION_KEY_HEADER, &key)
                .send()
                .await
                .map_err(ServiceError::transport(SERVICE))?;
            wait = retry_after(response.headers()).unwrap_or(self.poll_interval);
            let state: AnalyzeOperation = read_json(SERVICE, response, || self.hint()).await?;
            debug!(poll, status = %state.status, "document analysis poll");

            match state.status.as_str() {
                "succeeded" => return Ok(state.analyze_result.unwrap_or_default()),
                "failed" => {
                    let message = state
                        .error
                        .and_then(|e| best_error_message_from_value(&serde_json::json!({ "error": e })))
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(ServiceError::AnalysisFailed { message });
                }
                _ => {}
            }
        }
        Err(ServiceError::PollingExhausted {
            polls: self.max_polls,
        })
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_analyze_result_counts() {
        let result: AnalyzeResult = serde_json::from_value(serde_json::json!({
            "pages": [{"pageNumber": 1}],
            "paragraphs": [{"content": "Test"}, {"content": "More"}]
        }))
        .unwrap();
        assert_eq!(result.page_count(), 1);
        assert_eq!(result.paragraph_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_endpoint_names_variable() {
        let client =
            DocumentIntelligenceClient::from_settings(&Settings::empty(), reqwest::Client::new())
                .unwrap();
        let err = client.analyze(Vec::new(), "application/pdf").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT is not configured"
        );
    }
}
