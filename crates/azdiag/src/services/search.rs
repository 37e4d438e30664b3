//! Cognitive Search vector queries

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{read_json, OpenAiClient, ServiceError};
use crate::config::{ConfigHint, ConfigValue, Settings};

const SERVICE: &str = "Azure Cognitive Search";

/// Documents at or below this score are not considered relevant
pub const MINIMUM_SCORE: f64 = 0.81;

/// Nearest neighbours requested per query
pub const RELEVANT_DOCUMENT_COUNT: usize = 3;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub name: ConfigValue,
    pub index_name: String,
    pub api_key: ConfigValue,
    pub admin_api_key: ConfigValue,
    pub api_version: String,
    pub vector_field_name: String,
    /// `AZURE_SEARCH_ENDPOINT`, replacing `https://{name}.search.windows.net`
    pub endpoint: Option<String>,
    show_keys: bool,
}

impl SearchConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            name: settings.value("AZURE_SEARCH_NAME"),
            index_name: settings
                .lookup("AZURE_SEARCH_INDEX_NAME")
                .unwrap_or_else(|| "azure-chatgpt".to_string()),
            api_key: settings.first_of(&["AZURE_SEARCH_KEY", "AZURE_SEARCH_ADMIN_KEY"]),
            admin_api_key: settings.value("AZURE_SEARCH_ADMIN_KEY"),
            api_version: settings
                .lookup("AZURE_SEARCH_API_VERSION")
                .unwrap_or_else(|| "2023-07-01-Preview".to_string()),
            vector_field_name: settings
                .lookup("AZURE_SEARCH_VECTOR_FIELD_NAME")
                .unwrap_or_else(|| "embedding".to_string()),
            endpoint: settings
                .lookup("AZURE_SEARCH_ENDPOINT")
                .map(|e| e.trim_end_matches('/').to_string()),
            show_keys: settings.show_keys_in_errors(),
        }
    }

    fn base_url(&self) -> Result<String, ServiceError> {
        let root = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.search.windows.net", self.name.require()?),
        };
        Ok(format!("{}/indexes/{}/docs", root, self.index_name))
    }

    fn hint(&self) -> ConfigHint {
        let index_name = ConfigValue {
            variable: "AZURE_SEARCH_INDEX_NAME".to_string(),
            value: Some(self.index_name.clone()),
        };
        let api_version = ConfigValue {
            variable: "AZURE_SEARCH_API_VERSION".to_string(),
            value: Some(self.api_version.clone()),
        };
        let vector_field_name = ConfigValue {
            variable: "AZURE_SEARCH_VECTOR_FIELD_NAME".to_string(),
            value: Some(self.vector_field_name.clone()),
        };
        ConfigHint::new("Azure Cognitive Search call failed.", self.show_keys)
            .value("name", &self.name)
            .value("indexName", &index_name)
            .secret("apiKey", &self.api_key)
            .value("apiVersion", &api_version)
            .value("vectorFieldName", &vector_field_name)
            .secret("adminApiKey", &self.admin_api_key)
    }
}

#[derive(Debug, Serialize)]
struct VectorQuery<'a> {
    value: &'a [f64],
    fields: &'a str,
    k: usize,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    search: &'a str,
    facets: Vec<String>,
    filter: &'a str,
    vectors: Vec<VectorQuery<'a>>,
    top: usize,
}

/// One hit with its similarity score
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoredDocument {
    #[serde(rename = "@search.score", default)]
    pub score: f64,
    #[serde(rename = "pageContent", default)]
    pub page_content: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<ScoredDocument>,
}

/// A relevant document as handed to the chat prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantDocument {
    pub page_content: String,
    pub file_name: String,
}

impl RelevantDocument {
    fn from_scored(document: ScoredDocument) -> Self {
        let file_name = match document.metadata {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Self {
            page_content: format!(
                "File Name: {}\nFile Content: {}",
                file_name, document.page_content
            ),
            file_name,
        }
    }
}

/// Keep documents scoring strictly above [`MINIMUM_SCORE`]
pub fn filter_relevant(documents: Vec<ScoredDocument>) -> Vec<RelevantDocument> {
    documents
        .into_iter()
        .filter(|d| d.score > MINIMUM_SCORE)
        .map(RelevantDocument::from_scored)
        .collect()
}

#[derive(Debug, Clone)]
pub struct VectorSearchClient {
    config: SearchConfig,
    http: reqwest::Client,
    embeddings: OpenAiClient,
}

impl VectorSearchClient {
    pub fn new(config: SearchConfig, http: reqwest::Client, embeddings: OpenAiClient) -> Self {
        Self {
            config,
            http,
            embeddings,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        http: reqwest::Client,
        embeddings: OpenAiClient,
    ) -> Result<Self, ServiceError> {
        Ok(Self::new(SearchConfig::from_settings(settings), http, embeddings))
    }

    /// `k` nearest documents to an embedding, with scores
    pub async fn search_by_vector(
        &self,
        vector: &[f64],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, ServiceError> {
        let url = format!(
            "{}/search?api-version={}",
            self.config.base_url()?,
            self.config.api_version
        );
        let api_key = self.config.api_key.require()?;
        let body = SearchRequest {
            search: "*",
            facets: Vec::new(),
            filter: "",
            vectors: vec![VectorQuery {
                value: vector,
                fields: &self.config.vector_field_name,
                k,
            }],
            top: k,
        };
        let response = self
            .http
            .post(url)
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(ServiceError::transport(SERVICE))?;
        let results: SearchResponse = read_json(SERVICE, response, || self.config.hint()).await?;
        Ok(results.value)
    }

    /// Embed `query` and return the relevant documents among its nearest
    /// neighbours
    pub async fn find_relevant_documents(
        &self,
        query: &str,
    ) -> Result<Vec<RelevantDocument>, ServiceError> {
        let vector = self.embeddings.embed_query(query).await?;
        let documents = self.search_by_vector(&vector, RELEVANT_DOCUMENT_COUNT).await?;
        Ok(filter_relevant(documents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(score: f64, name: &str) -> ScoredDocument {
        ScoredDocument {
            score,
            page_content: "content".to_string(),
            metadata: Value::String(name.to_string()),
        }
    }

    #[test]
    fn test_filter_is_strictly_greater() {
        let relevant = filter_relevant(vec![doc(0.81, "edge.pdf"), doc(0.9, "hit.pdf"), doc(0.2, "miss.pdf")]);
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].file_name, "hit.pdf");
        assert_eq!(relevant[0].page_content, "File Name: hit.pdf\nFile Content: content");
    }

    #[test]
    fn test_search_defaults() {
        let settings = Settings::from_pairs([
            ("AZURE_SEARCH_NAME", "search"),
            ("AZURE_SEARCH_ADMIN_KEY", "admin"),
        ])
        .unwrap();
        let config = SearchConfig::from_settings(&settings);
        assert_eq!(config.index_name, "azure-chatgpt");
        assert_eq!(config.api_version, "2023-07-01-Preview");
        assert_eq!(config.vector_field_name, "embedding");
        assert_eq!(config.api_key.value.as_deref(), Some("admin"));
        assert_eq!(
            config.base_url().unwrap(),
            "https://search.search.windows.net/indexes/azure-chatgpt/docs"
        );
    }

    #[test]
    fn test_hint_lists_search_variables() {
        let settings = Settings::from_pairs([("AZURE_SEARCH_KEY", "s3cret")]).unwrap();
        let hint = SearchConfig::from_settings(&settings).hint().to_string();
        assert!(hint.starts_with("Azure Cognitive Search call failed."));
        assert!(hint.contains("indexName: azure-chatgpt -- AZURE_SEARCH_INDEX_NAME"));
        assert!(hint.contains("apiKey: has value -- AZURE_SEARCH_KEY"));
        assert!(hint.contains("adminApiKey: no value -- AZURE_SEARCH_ADMIN_KEY"));
    }

    #[test]
    fn test_request_shape() {
        let vector = [0.1, 0.2];
        let body = SearchRequest {
            search: "*",
            facets: Vec::new(),
            filter: "",
            vectors: vec![VectorQuery {
                value: &vector,
                fields: "embedding",
                k: 3,
            }],
            top: 3,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "search": "*",
                "facets": [],
                "filter": "",
                "vectors": [{"value": [0.1, 0.2], "fields": "embedding", "k": 3}],
                "top": 3
            })
        );
    }
}
