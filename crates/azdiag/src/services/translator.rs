//! Document Translator batch API

use serde::Deserialize;

use super::{read_json, ServiceError};
use crate::config::{ConfigHint, ConfigValue, Settings};

const SERVICE: &str = "Document Translator";
const BATCH_PATH: &str = "translator/text/batch/v1.1";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFormat {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub file_extensions: Vec<String>,
    #[serde(default)]
    pub content_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FormatList {
    #[serde(default)]
    value: Vec<FileFormat>,
}

/// Every extension of every format, without the leading dot
pub fn flatten_extensions(formats: &[FileFormat]) -> Vec<String> {
    formats
        .iter()
        .flat_map(|f| f.file_extensions.iter())
        .map(|ext| ext.strip_prefix('.').unwrap_or(ext).to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct TranslatorClient {
    endpoint: ConfigValue,
    key: ConfigValue,
    show_keys: bool,
    http: reqwest::Client,
}

impl TranslatorClient {
    pub fn from_settings(settings: &Settings, http: reqwest::Client) -> Result<Self, ServiceError> {
        Ok(Self {
            endpoint: settings.value("AZURE_DOCUMENT_TRANSLATOR_ENDPOINT"),
            key: settings.value("AZURE_DOCUMENT_TRANSLATOR_KEY"),
            show_keys: settings.show_keys_in_errors(),
            http,
        })
    }

    fn hint(&self) -> ConfigHint {
        ConfigHint::new("Failed to call document translator.", self.show_keys)
            .value("endpoint", &self.endpoint)
            .secret("key", &self.key)
    }

    pub async fn document_formats(&self) -> Result<Vec<FileFormat>, ServiceError> {
        let url = format!(
            "{}/{}/documents/formats",
            self.endpoint.require()?.trim_end_matches('/'),
            BATCH_PATH
        );
        let response = self
            .http
            .get(url)
            .header("Ocp-Apim-Subscription-Key", self.key.require()?)
            .send()
            .await
            .map_err(ServiceError::transport(SERVICE))?;
        let list: FormatList = read_json(SERVICE, response, || self.hint()).await?;
        Ok(list.value)
    }

    /// File extensions the service can translate
    pub async fn supported_document_formats(&self) -> Result<Vec<String>, ServiceError> {
        Ok(flatten_extensions(&self.document_formats().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_strips_leading_dot() {
        let formats: FormatList = serde_json::from_value(serde_json::json!({
            "value": [
                {"format": "PlainText", "fileExtensions": [".txt"], "contentTypes": ["text/plain"]},
                {"format": "Word", "fileExtensions": [".docx", "doc"]},
                {"format": "Empty", "fileExtensions": []}
            ]
        }))
        .unwrap();
        assert_eq!(flatten_extensions(&formats.value), vec!["txt", "docx", "doc"]);
    }
}
