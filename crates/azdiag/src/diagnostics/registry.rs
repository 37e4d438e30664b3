//! The probes azdiag runs
//!
//! Server probes need secrets and run behind provisioning; client probes are
//! safe to run anywhere. Declaration order is display order.

use anyhow::anyhow;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;

use super::aggregator::Diagnostics;
use super::probe::Probe;
use crate::network::TimeoutConfig;
use crate::services::{
    describe_ingestion, AnalyzeResult, ChatCompletion, ChatMessage, LlmModel, RelevantDocument,
    ServiceClients, StorageProvisioning, StorageResource, MAX_PEEK_MESSAGES,
};
use crate::telemetry::IngestionResponse;

pub const STORAGE_TABLE_PROBE: &str = "Azure Storage Table";
pub const STORAGE_BLOB_PROBE: &str = "Azure Storage User Documents Blob";
pub const EMBEDDINGS_PROBE: &str = "Open AI Embeddings";
pub const CHAT_GPT35_PROBE: &str = "Open AI Chat Completion GPT-3.5";
pub const COGNITIVE_SEARCH_PROBE: &str = "Cognitive Search";
pub const DOCUMENT_INTELLIGENCE_PROBE: &str = "Document Intelligence";
pub const TRANSLATOR_FORMATS_PROBE: &str = "Document Translation Supported Formats";
pub const APP_INSIGHTS_DIRECT_PROBE: &str = "Application Insights (Direct)";
pub const JOB_QUEUE_PROBE: &str = "Job Queue";
pub const DUMMY_PROBE: &str = "Dummy";

pub const CHATS_TABLE: &str = "chats";
pub const DOCUMENTS_CONTAINER: &str = "documents";
pub const JOB_QUEUE: &str = "queue";

const EMBEDDINGS_QUERY: &str = "test query";
const CHAT_PROMPT: &str = "what time is it?";
const SEARCH_QUERY: &str = "random text";

/// Smallest valid single page PDF
const SAMPLE_PDF_BASE64: &str = "JVBERi0xLjIgCjkgMCBvYmoKPDwKPj4Kc3RyZWFtCkJULyA5IFRmKFRlc3QpJyBFVAplbmRzdHJlYW0KZW5kb2JqCjQgMCBvYmoKPDwKL1R5cGUgL1BhZ2UKL1BhcmVudCA1IDAgUgovQ29udGVudHMgOSAwIFIKPj4KZW5kb2JqCjUgMCBvYmoKPDwKL0tpZHMgWzQgMCBSIF0KL0NvdW50IDEKL1R5cGUgL1BhZ2VzCi9NZWRpYUJveCBbIDAgMCA5OSA5IF0KPj4KZW5kb2JqCjMgMCBvYmoKPDwKL1BhZ2VzIDUgMCBSCi9UeXBlIC9DYXRhbG9nCj4+CmVuZG9iagp0cmFpbGVyCjw8Ci9Sb290IDMgMCBSCj4+CiUlRU9G";

/// Storage resources created before any server probe runs
pub fn provisioning_steps(clients: &ServiceClients) -> Vec<StorageProvisioning> {
    let settings = clients.settings();
    [
        StorageResource::Table(CHATS_TABLE.to_string()),
        StorageResource::Container(DOCUMENTS_CONTAINER.to_string()),
        StorageResource::Queue(JOB_QUEUE.to_string()),
    ]
    .into_iter()
    .map(|resource| StorageProvisioning::new(Arc::clone(settings), clients.http().clone(), resource))
    .collect()
}

pub fn server_probes(clients: &ServiceClients) -> Vec<Probe> {
    vec![
        storage_table(clients.clone()),
        storage_blob(clients.clone()),
        embeddings(clients.clone()),
        chat_completion_gpt35(clients.clone()),
        cognitive_search(clients.clone()),
        document_intelligence(clients.clone()),
        translator_formats(clients.clone()),
        app_insights_direct(clients.clone()),
        job_queue(clients.clone()),
    ]
}

pub fn client_probes() -> Vec<Probe> {
    vec![Probe::new(
        DUMMY_PROBE,
        || async { Ok::<_, anyhow::Error>(()) },
        |_: ()| "Dummy complete".to_string(),
    )]
}

/// The full harness: provisioning, server probes and client probes, with the
/// probe timeout taken from settings
pub fn build_diagnostics(clients: &ServiceClients) -> Diagnostics {
    let timeouts = TimeoutConfig::from_settings(clients.settings());
    let mut diagnostics = Diagnostics::new().with_probe_timeout(timeouts.probe_timeout());
    for step in provisioning_steps(clients) {
        diagnostics = diagnostics.with_provisioning(step);
    }
    for probe in server_probes(clients) {
        diagnostics = diagnostics.with_server_probe(probe);
    }
    for probe in client_probes() {
        diagnostics = diagnostics.with_client_probe(probe);
    }
    diagnostics
}

fn storage_table(clients: ServiceClients) -> Probe {
    Probe::new(
        STORAGE_TABLE_PROBE,
        move || {
            let clients = clients.clone();
            async move { clients.storage()?.list_entities(CHATS_TABLE).await }
        },
        |records: Vec<serde_json::Value>| format!("Found {} records...", records.len()),
    )
}

fn storage_blob(clients: ServiceClients) -> Probe {
    Probe::new(
        STORAGE_BLOB_PROBE,
        move || {
            let clients = clients.clone();
            async move { clients.storage()?.list_blobs(DOCUMENTS_CONTAINER).await }
        },
        |blobs: Vec<String>| format!("Found {} blobs...", blobs.len()),
    )
}

fn embeddings(clients: ServiceClients) -> Probe {
    Probe::new(
        EMBEDDINGS_PROBE,
        move || {
            let openai = clients.openai();
            async move { openai.embed_query(EMBEDDINGS_QUERY).await }
        },
        |vector: Vec<f64>| {
            let first: Vec<String> = vector.iter().take(3).map(f64::to_string).collect();
            format!(
                "Got vector of length {} - first 3: {}",
                vector.len(),
                first.join(", ")
            )
        },
    )
}

fn chat_completion_gpt35(clients: ServiceClients) -> Probe {
    Probe::try_new(
        CHAT_GPT35_PROBE,
        move || {
            let openai = clients.openai();
            async move {
                openai
                    .chat_completions(LlmModel::Gpt35, &[ChatMessage::system(CHAT_PROMPT)])
                    .await
            }
        },
        |completion: ChatCompletion| {
            completion
                .first_content()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("chat completion returned no message content"))
        },
    )
}

fn cognitive_search(clients: ServiceClients) -> Probe {
    Probe::new(
        COGNITIVE_SEARCH_PROBE,
        move || {
            let clients = clients.clone();
            async move { clients.search()?.find_relevant_documents(SEARCH_QUERY).await }
        },
        |documents: Vec<RelevantDocument>| match documents.first() {
            Some(first) => format!(
                "Found {} document(s) including {}",
                documents.len(),
                first.file_name
            ),
            None => "Found 0 document(s)".to_string(),
        },
    )
}

fn document_intelligence(clients: ServiceClients) -> Probe {
    Probe::new(
        DOCUMENT_INTELLIGENCE_PROBE,
        move || {
            let clients = clients.clone();
            async move {
                let pdf = STANDARD.decode(SAMPLE_PDF_BASE64)?;
                let result = clients
                    .document_intelligence()?
                    .analyze(pdf, "application/pdf")
                    .await?;
                Ok::<_, anyhow::Error>(result)
            }
        },
        |result: AnalyzeResult| {
            format!(
                "Found {} paragraph(s) and {} page(s)",
                result.paragraph_count(),
                result.page_count()
            )
        },
    )
}

fn translator_formats(clients: ServiceClients) -> Probe {
    Probe::new(
        TRANSLATOR_FORMATS_PROBE,
        move || {
            let clients = clients.clone();
            async move { clients.translator()?.supported_document_formats().await }
        },
        |formats: Vec<String>| format!("Found {} formats", formats.len()),
    )
}

fn app_insights_direct(clients: ServiceClients) -> Probe {
    Probe::new(
        APP_INSIGHTS_DIRECT_PROBE,
        move || {
            let probe = clients.ingestion();
            async move { probe.run().await }
        },
        |response: IngestionResponse| describe_ingestion(&response),
    )
}

fn job_queue(clients: ServiceClients) -> Probe {
    Probe::new(
        JOB_QUEUE_PROBE,
        move || {
            let clients = clients.clone();
            async move {
                clients
                    .storage()?
                    .peek_messages(JOB_QUEUE, MAX_PEEK_MESSAGES)
                    .await
            }
        },
        |jobs: Vec<String>| format!("Found {} in queue", jobs.len()),
    )
}
