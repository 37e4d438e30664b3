//! Service clients
//!
//! Thin clients for the Azure services the diagnostics probe. Every client
//! shares one `reqwest::Client` and reads its settings by environment
//! variable name. Failed calls log a hint naming the variables involved.

mod app_insights;
mod doc_intel;
mod openai;
mod search;
mod storage;
mod translator;

pub use app_insights::*;
pub use doc_intel::*;
pub use openai::*;
pub use search::*;
pub use storage::*;
pub use translator::*;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::{ConfigHint, Settings, SettingsError};
use crate::telemetry::{ConnectionStringError, TelemetryClient};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    ConnectionString(#[from] ConnectionStringError),
    #[error("{service} returned {status}: {message}")]
    Http {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("{service} request failed")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned an unexpected response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
    #[error("Error resolving {endpoint} endpoint ({host})")]
    Dns {
        endpoint: &'static str,
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid endpoint {url}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("document analysis failed: {message}")]
    AnalysisFailed { message: String },
    #[error("document analysis still running after {polls} polls")]
    PollingExhausted { polls: u32 },
    #[error("{0}")]
    Unavailable(String),
}

impl ServiceError {
    pub(crate) fn transport(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Transport { service, source }
    }

    pub(crate) fn decode(service: &'static str, message: impl ToString) -> Self {
        Self::Decode {
            service,
            message: message.to_string(),
        }
    }
}

/// Pick the most useful message out of an error body
///
/// Vendors disagree on the shape of error bodies. The first of these that is
/// present wins:
///
/// 1. `error.innererror.message`
/// 2. `error.innererror.code`
/// 3. `error.message`
/// 4. `error.Message`
/// 5. `error.code`, as `Error code: {code}`
/// 6. `error` when it is a plain string
/// 7. `message`
/// 8. `Message`
/// 9. the raw body text
///
/// `Error` is accepted in place of `error`.
pub fn best_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    best_error_message_from_value(&value).unwrap_or_else(|| body.trim().to_string())
}

fn best_error_message_from_value(value: &Value) -> Option<String> {
    let text = |v: Option<&Value>| -> Option<String> {
        match v? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    if let Some(error) = value.get("error").or_else(|| value.get("Error")) {
        let inner = error.get("innererror");
        if let Some(found) = text(inner.and_then(|i| i.get("message")))
            .or_else(|| text(inner.and_then(|i| i.get("code"))))
            .or_else(|| text(error.get("message")))
            .or_else(|| text(error.get("Message")))
            .or_else(|| text(error.get("code")).map(|code| format!("Error code: {}", code)))
            .or_else(|| text(Some(error)))
        {
            return Some(found);
        }
    }
    text(value.get("message")).or_else(|| text(value.get("Message")))
}

/// Turn a non-success response into [`ServiceError::Http`], logging `hint`
pub(crate) async fn check_response(
    service: &'static str,
    response: reqwest::Response,
    hint: impl FnOnce() -> ConfigHint,
) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = best_error_message(&body);
    let message = if message.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        message
    };
    warn!(
        service,
        status = status.as_u16(),
        url = %url,
        error = %message,
        "{}",
        hint()
    );
    Err(ServiceError::Http {
        service,
        status: status.as_u16(),
        message,
    })
}

/// Check the status, then decode a JSON body
pub(crate) async fn read_json<T: DeserializeOwned>(
    service: &'static str,
    response: reqwest::Response,
    hint: impl FnOnce() -> ConfigHint,
) -> Result<T, ServiceError> {
    let response = check_response(service, response, hint).await?;
    let body = response
        .text()
        .await
        .map_err(ServiceError::transport(service))?;
    serde_json::from_str(&body).map_err(|e| ServiceError::decode(service, e))
}

/// Everything a service client needs: settings, the shared HTTP client and
/// the telemetry sink
#[derive(Debug, Clone)]
pub struct ServiceClients {
    settings: Arc<Settings>,
    http: reqwest::Client,
    telemetry: TelemetryClient,
}

impl ServiceClients {
    pub fn new(
        settings: Arc<Settings>,
        http: reqwest::Client,
        telemetry: TelemetryClient,
    ) -> Self {
        Self {
            settings,
            http,
            telemetry,
        }
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn telemetry(&self) -> &TelemetryClient {
        &self.telemetry
    }

    pub fn storage(&self) -> Result<StorageClient, ServiceError> {
        StorageClient::from_settings(&self.settings, self.http.clone())
    }

    pub fn openai(&self) -> OpenAiClient {
        OpenAiClient::new(Arc::clone(&self.settings), self.http.clone(), self.telemetry.clone())
    }

    pub fn search(&self) -> Result<VectorSearchClient, ServiceError> {
        VectorSearchClient::from_settings(&self.settings, self.http.clone(), self.openai())
    }

    pub fn document_intelligence(&self) -> Result<DocumentIntelligenceClient, ServiceError> {
        DocumentIntelligenceClient::from_settings(&self.settings, self.http.clone())
    }

    pub fn translator(&self) -> Result<TranslatorClient, ServiceError> {
        TranslatorClient::from_settings(&self.settings, self.http.clone())
    }

    pub fn ingestion(&self) -> IngestionProbe {
        IngestionProbe::new(
            self.settings.app_insights_connection_string(),
            self.http.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(r#"{"error":{"innererror":{"message":"inner msg","code":"InnerCode"},"message":"outer"}}"#, "inner msg" ; "inner message first")]
    #[test_case(r#"{"error":{"innererror":{"code":"InvalidContent"},"message":"outer"}}"#, "InvalidContent" ; "inner code next")]
    #[test_case(r#"{"error":{"code":"401","message":"Access denied due to invalid subscription key."}}"#, "Access denied due to invalid subscription key." ; "error message")]
    #[test_case(r#"{"error":{"code":"X","Message":"Pascal message"}}"#, "Pascal message" ; "pascal case message")]
    #[test_case(r#"{"Error":{"code":"InvalidRequest"}}"#, "Error code: InvalidRequest" ; "code only")]
    #[test_case(r#"{"error":"plain string"}"#, "plain string" ; "string error")]
    #[test_case(r#"{"message":"top level"}"#, "top level" ; "top level message")]
    #[test_case(r#"{"Message":"Top Level"}"#, "Top Level" ; "top level pascal message")]
    #[test_case("<html>Bad Gateway</html>", "<html>Bad Gateway</html>" ; "raw body")]
    #[test_case(r#"{"unrelated":true}"#, r#"{"unrelated":true}"# ; "unknown json shape")]
    fn test_best_error_message(body: &str, expected: &str) {
        assert_eq!(best_error_message(body), expected);
    }

    #[tokio::test]
    async fn test_check_response_builds_http_error() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(
                serde_json::json!({"error": {"code": "AuthorizationFailure", "message": "denied"}}),
            ))
            .mount(&server)
            .await;

        let response = reqwest::get(server.uri()).await.unwrap();
        let err = check_response("Translator", response, || ConfigHint::new("failed", false))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Translator returned 403: denied");
    }
}
