//! Azure OpenAI chat completions and embeddings

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::{read_json, ServiceError};
use crate::config::{ConfigHint, ConfigValue, Settings};
use crate::telemetry::{DependencyCall, Properties, TelemetryClient};

const SERVICE: &str = "Azure OpenAI";

/// Chat models the application deploys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmModel {
    #[serde(rename = "gpt-3.5")]
    Gpt35,
    #[serde(rename = "gpt-4")]
    Gpt4,
}

impl LlmModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gpt35 => "gpt-3.5",
            Self::Gpt4 => "gpt-4",
        }
    }

    /// Segment used in model specific variable names
    fn variable_segment(self) -> &'static str {
        match self {
            Self::Gpt35 => "GPT35",
            Self::Gpt4 => "GPT4",
        }
    }
}

impl fmt::Display for LlmModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for one model
///
/// Each value comes from `AZURE_OPENAI_{MODEL}_{NAME}` when set, otherwise
/// from `AZURE_OPENAI_{NAME}`.
#[derive(Debug, Clone)]
pub struct ModelConfiguration {
    pub instance_name: ConfigValue,
    pub api_key: ConfigValue,
    pub deployment_name: ConfigValue,
    pub api_version: ConfigValue,
}

pub fn model_configuration(settings: &Settings, model: LlmModel) -> ModelConfiguration {
    let value = |name: &str| {
        let model_variable = format!("AZURE_OPENAI_{}_{}", model.variable_segment(), name);
        let base_variable = format!("AZURE_OPENAI_{}", name);
        settings.first_of(&[model_variable.as_str(), base_variable.as_str()])
    };
    ModelConfiguration {
        instance_name: value("API_INSTANCE_NAME"),
        api_key: value("API_KEY"),
        deployment_name: value("API_DEPLOYMENT_NAME"),
        api_version: value("API_VERSION"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<CompletionUsage>,
}

impl ChatCompletion {
    /// Content of the first choice
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

/// Resolved endpoint and credentials for one call
struct Target {
    endpoint: String,
    deployment: String,
    api_key: String,
    api_version: String,
}

impl Target {
    fn url(&self, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.endpoint, self.deployment, operation, self.api_version
        )
    }

    fn host(&self) -> String {
        url::Url::parse(&self.endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.endpoint.clone())
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    settings: Arc<Settings>,
    http: reqwest::Client,
    telemetry: TelemetryClient,
}

impl OpenAiClient {
    pub fn new(settings: Arc<Settings>, http: reqwest::Client, telemetry: TelemetryClient) -> Self {
        Self {
            settings,
            http,
            telemetry,
        }
    }

    /// `AZURE_OPENAI_API_ENDPOINT` when set, the instance URL otherwise
    fn endpoint(&self, instance_name: &ConfigValue) -> Result<String, ServiceError> {
        if let Some(endpoint) = self.settings.lookup("AZURE_OPENAI_API_ENDPOINT") {
            return Ok(endpoint.trim_end_matches('/').to_string());
        }
        Ok(format!("https://{}.openai.azure.com", instance_name.require()?))
    }

    fn chat_hint(&self, model: LlmModel, config: &ModelConfiguration) -> ConfigHint {
        ConfigHint::new(
            format!("Failed to get chat completion for {} model.", model),
            self.settings.show_keys_in_errors(),
        )
        .secret("apiKey", &config.api_key)
        .value("instanceName", &config.instance_name)
        .value("deploymentName", &config.deployment_name)
        .value("apiVersion", &config.api_version)
    }

    /// Non-streaming chat completion, tracked as a dependency
    pub async fn chat_completions(
        &self,
        model: LlmModel,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, ServiceError> {
        let config = model_configuration(&self.settings, model);
        let target = Target {
            endpoint: self.endpoint(&config.instance_name)?,
            deployment: config.deployment_name.require()?,
            api_key: config.api_key.require()?,
            api_version: config.api_version.require()?,
        };

        let dependency = DependencyCall::new(
            "AzOpenAI",
            "getChatCompletions",
            format!("{} / getChatCompletions", target.endpoint),
            target.host(),
        )
        .with_property("model", model)
        .with_property("deploymentName", &target.deployment);

        let target = &target;
        let config = &config;
        self.telemetry
            .track_dependency_call(
                dependency,
                || async move {
                    let response = self
                        .http
                        .post(target.url("chat/completions"))
                        .header("api-key", &target.api_key)
                        .json(&ChatRequest {
                            messages,
                            stream: false,
                        })
                        .send()
                        .await
                        .map_err(ServiceError::transport(SERVICE))?;
                    read_json(SERVICE, response, || self.chat_hint(model, config)).await
                },
                usage_properties,
            )
            .await
    }

    /// Embedding vector for one query, using the embeddings deployment
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f64>, ServiceError> {
        let instance_name = self.settings.value("AZURE_OPENAI_API_INSTANCE_NAME");
        let api_key = self.settings.value("AZURE_OPENAI_API_KEY");
        let deployment = self
            .settings
            .value("AZURE_OPENAI_API_EMBEDDINGS_DEPLOYMENT_NAME");
        let api_version = self.settings.value("AZURE_OPENAI_API_VERSION");

        let target = Target {
            endpoint: self.endpoint(&instance_name)?,
            deployment: deployment.require()?,
            api_key: api_key.require()?,
            api_version: api_version.require()?,
        };

        let response = self
            .http
            .post(target.url("embeddings"))
            .header("api-key", &target.api_key)
            .json(&EmbeddingRequest { input: text })
            .send()
            .await
            .map_err(ServiceError::transport(SERVICE))?;
        let body: EmbeddingResponse = read_json(SERVICE, response, || {
            ConfigHint::new(
                "Failed to get embeddings.",
                self.settings.show_keys_in_errors(),
            )
            .secret("apiKey", &api_key)
            .value("instanceName", &instance_name)
            .value("deploymentName", &deployment)
            .value("apiVersion", &api_version)
        })
        .await?;

        body.data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| ServiceError::decode(SERVICE, "no embedding returned"))
    }
}

fn usage_properties(completion: &ChatCompletion) -> Properties {
    let mut properties = Properties::new();
    properties.insert("resultCount".to_string(), completion.choices.len().to_string());
    if let Some(usage) = &completion.usage {
        properties.insert(
            "completionTokens".to_string(),
            usage.completion_tokens.to_string(),
        );
        properties.insert("promptTokens".to_string(), usage.prompt_tokens.to_string());
        properties.insert("totalTokens".to_string(), usage.total_tokens.to_string());
    }
    properties
}
