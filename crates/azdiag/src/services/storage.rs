//! Azure Storage: tables, blobs and queues
//!
//! Requests are signed with Shared Key Lite. Endpoints default to the public
//! cloud and can be pointed at an emulator.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;
use url::Url;

use super::{check_response, ServiceError};
use crate::config::{ConfigHint, ConfigValue, Settings};
use crate::diagnostics::ProvisionStep;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "Azure Storage";
const TABLE_API_VERSION: &str = "2019-02-02";
const BLOB_API_VERSION: &str = "2021-08-06";
const QUEUE_API_VERSION: &str = "2018-03-28";

/// Most messages a single peek can return
pub const MAX_PEEK_MESSAGES: u32 = 32;

/// Storage account settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub account: ConfigValue,
    pub key: ConfigValue,
    pub table_endpoint: String,
    pub blob_endpoint: String,
    pub queue_endpoint: String,
    show_keys: bool,
}

impl StorageConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ServiceError> {
        let account = settings.value("STORAGE_ACCOUNT_NAME");
        let key = settings.value("STORAGE_ACCOUNT_KEY");
        let name = account.require()?;
        key.require()?;

        let endpoint = |variable: &str, service: &str| {
            settings
                .lookup(variable)
                .map(|e| e.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("https://{}.{}.core.windows.net", name, service))
        };
        Ok(Self {
            table_endpoint: endpoint("STORAGE_TABLE_ENDPOINT", "table"),
            blob_endpoint: endpoint("STORAGE_BLOB_ENDPOINT", "blob"),
            queue_endpoint: endpoint("STORAGE_QUEUE_ENDPOINT", "queue"),
            account,
            key,
            show_keys: settings.show_keys_in_errors(),
        })
    }

    fn hint(&self) -> ConfigHint {
        ConfigHint::new("Azure Storage call failed.", self.show_keys)
            .value("account", &self.account)
            .secret("accountKey", &self.key)
    }
}

/// Which storage service a request targets; they canonicalize differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageService {
    Table,
    Blob,
    Queue,
}

impl StorageService {
    fn version(self) -> &'static str {
        match self {
            Self::Table => TABLE_API_VERSION,
            Self::Blob => BLOB_API_VERSION,
            Self::Queue => QUEUE_API_VERSION,
        }
    }
}

/// Shared Key Lite signer
#[derive(Debug, Clone)]
pub struct SharedKeyLite {
    account: String,
    key: Vec<u8>,
}

impl SharedKeyLite {
    pub fn new(account: &str, base64_key: &str) -> Result<Self, ServiceError> {
        let key = STANDARD.decode(base64_key.trim()).map_err(|e| {
            ServiceError::Unavailable(format!("STORAGE_ACCOUNT_KEY is not valid base64: {}", e))
        })?;
        Ok(Self {
            account: account.to_string(),
            key,
        })
    }

    /// `/{account}{path}` plus `?comp=..` when the request addresses a
    /// sub-resource
    pub fn canonicalized_resource(&self, url: &Url) -> String {
        let mut resource = format!("/{}{}", self.account, url.path());
        if let Some((_, comp)) = url.query_pairs().find(|(k, _)| k == "comp") {
            resource.push_str("?comp=");
            resource.push_str(&comp);
        }
        resource
    }

    /// Table service string to sign: `{date}\n{resource}`
    pub fn table_string_to_sign(&self, date: &str, url: &Url) -> String {
        format!("{}\n{}", date, self.canonicalized_resource(url))
    }

    /// Blob and queue string to sign
    ///
    /// `VERB\nContent-MD5\nContent-Type\nDate\n{x-ms- headers}{resource}`,
    /// with `Date` left empty because `x-ms-date` is always sent.
    pub fn blob_string_to_sign(
        &self,
        method: &Method,
        content_type: &str,
        ms_headers: &[(&str, &str)],
        url: &Url,
    ) -> String {
        let mut headers: Vec<(String, &str)> = ms_headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();
        format!(
            "{}\n\n{}\n\n{}{}",
            method.as_str(),
            content_type,
            canonical_headers,
            self.canonicalized_resource(url)
        )
    }

    pub fn sign(&self, string_to_sign: &str) -> Result<String, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| ServiceError::Unavailable(format!("invalid storage key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    pub fn authorization(&self, signature: &str) -> String {
        format!("SharedKeyLite {}:{}", self.account, signature)
    }
}

/// RFC 1123 date as used by `x-ms-date`
fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[derive(Debug, Deserialize)]
struct EntityPage {
    #[serde(default)]
    value: Vec<serde_json::Value>,
}

/// Client for the storage account
#[derive(Debug, Clone)]
pub struct StorageClient {
    config: StorageConfig,
    signer: SharedKeyLite,
    http: reqwest::Client,
}

impl StorageClient {
    pub fn new(config: StorageConfig, http: reqwest::Client) -> Result<Self, ServiceError> {
        let signer = SharedKeyLite::new(&config.account.require()?, &config.key.require()?)?;
        Ok(Self {
            config,
            signer,
            http,
        })
    }

    pub fn from_settings(settings: &Settings, http: reqwest::Client) -> Result<Self, ServiceError> {
        Self::new(StorageConfig::from_settings(settings)?, http)
    }

    fn url(&self, base: &str, path: &str) -> Result<Url, ServiceError> {
        let raw = format!("{}/{}", base, path);
        Url::parse(&raw).map_err(|source| ServiceError::InvalidEndpoint { url: raw, source })
    }

    /// Build a signed request
    fn request(
        &self,
        service: StorageService,
        method: Method,
        url: Url,
        content_type: &str,
    ) -> Result<RequestBuilder, ServiceError> {
        let date = rfc1123_now();
        let version = service.version();
        let string_to_sign = match service {
            StorageService::Table => self.signer.table_string_to_sign(&date, &url),
            StorageService::Blob | StorageService::Queue => self.signer.blob_string_to_sign(
                &method,
                content_type,
                &[("x-ms-date", date.as_str()), ("x-ms-version", version)],
                &url,
            ),
        };
        let signature = self.signer.sign(&string_to_sign)?;

        let mut builder = self
            .http
            .request(method, url)
            .header("x-ms-date", date)
            .header("x-ms-version", version)
            .header("Authorization", self.signer.authorization(&signature));
        if !content_type.is_empty() {
            builder = builder.header("Content-Type", content_type);
        }
        if service == StorageService::Table {
            builder = builder
                .header("Accept", "application/json;odata=nometadata")
                .header("DataServiceVersion", "3.0;NetFx")
                .header("MaxDataServiceVersion", "3.0;NetFx");
        }
        Ok(builder)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ServiceError> {
        builder.send().await.map_err(ServiceError::transport(SERVICE))
    }

    /// Create a table; an existing table is fine
    pub async fn create_table(&self, table: &str) -> Result<(), ServiceError> {
        let url = self.url(&self.config.table_endpoint, "Tables")?;
        let builder = self
            .request(StorageService::Table, Method::POST, url, "application/json")?
            .header("Prefer", "return-no-content")
            .body(serde_json::json!({ "TableName": table }).to_string());
        let response = self.send(builder).await?;
        if response.status() == StatusCode::CONFLICT {
            debug!(table, "table already exists");
            return Ok(());
        }
        check_response(SERVICE, response, || self.config.hint()).await?;
        Ok(())
    }

    /// Every entity of a table, following continuation tokens
    pub async fn list_entities(&self, table: &str) -> Result<Vec<serde_json::Value>, ServiceError> {
        let mut entities = Vec::new();
        let mut continuation: Option<(String, Option<String>)> = None;
        loop {
            let mut url = self.url(&self.config.table_endpoint, &format!("{}()", table))?;
            if let Some((partition, row)) = &continuation {
                let mut query = url.query_pairs_mut();
                query.append_pair("NextPartitionKey", partition);
                if let Some(row) = row {
                    query.append_pair("NextRowKey", row);
                }
            }
            let builder = self.request(StorageService::Table, Method::GET, url, "")?;
            let response = check_response(SERVICE, self.send(builder).await?, || {
                self.config.hint()
            })
            .await?;

            let header = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let next_partition = header("x-ms-continuation-NextPartitionKey");
            let next_row = header("x-ms-continuation-NextRowKey");

            let body = response.text().await.map_err(ServiceError::transport(SERVICE))?;
            let page: EntityPage =
                serde_json::from_str(&body).map_err(|e| ServiceError::decode(SERVICE, e))?;
            entities.extend(page.value);

            match next_partition {
                Some(partition) => continuation = Some((partition, next_row)),
                None => break,
            }
        }
        Ok(entities)
    }

    /// Create a blob container unless it exists
    pub async fn create_container(&self, container: &str) -> Result<(), ServiceError> {
        let mut url = self.url(&self.config.blob_endpoint, container)?;
        url.query_pairs_mut().append_pair("restype", "container");
        let builder = self.request(StorageService::Blob, Method::PUT, url, "")?;
        let response = self.send(builder).await?;
        if response.status() == StatusCode::CONFLICT {
            debug!(container, "container already exists");
            return Ok(());
        }
        check_response(SERVICE, response, || self.config.hint()).await?;
        Ok(())
    }

    /// Names of every blob in a container, following `NextMarker`
    pub async fn list_blobs(&self, container: &str) -> Result<Vec<String>, ServiceError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut url = self.url(&self.config.blob_endpoint, container)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "container");
                query.append_pair("comp", "list");
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }
            let builder = self.request(StorageService::Blob, Method::GET, url, "")?;
            let response = check_response(SERVICE, self.send(builder).await?, || {
                self.config.hint()
            })
            .await?;
            let body = response.text().await.map_err(ServiceError::transport(SERVICE))?;

            let page = parse_blob_list(&body)?;
            names.extend(page.names);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(names)
    }

    /// Create a queue unless it exists
    pub async fn create_queue(&self, queue: &str) -> Result<(), ServiceError> {
        let url = self.url(&self.config.queue_endpoint, queue)?;
        let builder = self.request(StorageService::Queue, Method::PUT, url, "")?;
        let response = self.send(builder).await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::CONFLICT => {
                debug!(queue, "queue already exists");
                Ok(())
            }
            _ => {
                check_response(SERVICE, response, || self.config.hint()).await?;
                Ok(())
            }
        }
    }

    /// Ids of up to `count` messages at the front of a queue, without
    /// dequeuing them
    pub async fn peek_messages(&self, queue: &str, count: u32) -> Result<Vec<String>, ServiceError> {
        let mut url = self.url(&self.config.queue_endpoint, &format!("{}/messages", queue))?;
        url.query_pairs_mut()
            .append_pair("peekonly", "true")
            .append_pair("numofmessages", &count.clamp(1, MAX_PEEK_MESSAGES).to_string());
        let builder = self.request(StorageService::Queue, Method::GET, url, "")?;
        let response = check_response(SERVICE, self.send(builder).await?, || {
            self.config.hint()
        })
        .await?;
        let body = response.text().await.map_err(ServiceError::transport(SERVICE))?;
        texts_at(&body, &["QueueMessagesList", "QueueMessage", "MessageId"])
    }
}

/// One page of a blob listing
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BlobListPage {
    pub names: Vec<String>,
    pub next_marker: Option<String>,
}

pub fn parse_blob_list(xml: &str) -> Result<BlobListPage, ServiceError> {
    let names = texts_at(xml, &["EnumerationResults", "Blobs", "Blob", "Name"])?;
    let next_marker = texts_at(xml, &["EnumerationResults", "NextMarker"])?
        .into_iter()
        .find(|m| !m.is_empty());
    Ok(BlobListPage { names, next_marker })
}

/// Text content of every element at exactly `path`
fn texts_at(xml: &str, path: &[&str]) -> Result<Vec<String>, ServiceError> {
    let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut found = Vec::new();
    loop {
        let event = reader
            .read_event()
            .map_err(|e| ServiceError::decode(SERVICE, e))?;
        match event {
            Event::Start(e) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(t) if stack.iter().map(String::as_str).eq(path.iter().copied()) => {
                let text = t.unescape().map_err(|e| ServiceError::decode(SERVICE, e))?;
                found.push(text.into_owned());
            }
            Event::CData(t) if stack.iter().map(String::as_str).eq(path.iter().copied()) => {
                found.push(String::from_utf8_lossy(&t).into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}

/// A storage resource the server probes rely on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageResource {
    Table(String),
    Container(String),
    Queue(String),
}

impl std::fmt::Display for StorageResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table(name) => write!(f, "table {}", name),
            Self::Container(name) => write!(f, "container {}", name),
            Self::Queue(name) => write!(f, "queue {}", name),
        }
    }
}

impl StorageResource {
    pub async fn ensure(&self, client: &StorageClient) -> Result<(), ServiceError> {
        match self {
            Self::Table(name) => client.create_table(name).await,
            Self::Container(name) => client.create_container(name).await,
            Self::Queue(name) => client.create_queue(name).await,
        }
    }
}

/// Provisioning step that creates a storage resource if it is missing
#[derive(Debug, Clone)]
pub struct StorageProvisioning {
    settings: std::sync::Arc<Settings>,
    http: reqwest::Client,
    resource: StorageResource,
}

impl StorageProvisioning {
    pub fn new(
        settings: std::sync::Arc<Settings>,
        http: reqwest::Client,
        resource: StorageResource,
    ) -> Self {
        Self {
            settings,
            http,
            resource,
        }
    }
}

#[async_trait]
impl ProvisionStep for StorageProvisioning {
    fn resource(&self) -> String {
        self.resource.to_string()
    }

    async fn ensure(&self) -> anyhow::Result<()> {
        let client = StorageClient::from_settings(&self.settings, self.http.clone())?;
        self.resource.ensure(&client).await?;
        Ok(())
    }
}
