//! Diagnostic aggregator
//!
//! Runs a fixed set of probes concurrently and returns their results in
//! declaration order. Server probes run after every provisioning step has
//! succeeded; client probes run on their own.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use super::probe::Probe;
use super::result::{DiagnosticResult, ResultSummary};
use crate::network::TimeoutConfig;

/// Harness level errors
#[derive(Debug, Error)]
pub enum DiagError {
    /// A backing resource could not be created; no probe ran
    #[error("failed to provision {resource}")]
    Provisioning {
        resource: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to render diagnostics")]
    Render(#[from] minijinja::Error),
}

/// Idempotent creation of a resource the server probes depend on
#[async_trait]
pub trait ProvisionStep: Send + Sync {
    /// Name of the resource, used in logs and errors
    fn resource(&self) -> String;

    /// Create the resource unless it already exists
    async fn ensure(&self) -> anyhow::Result<()>;
}

/// The declared probe sets and provisioning steps
#[derive(Clone)]
pub struct Diagnostics {
    provisioning: Vec<Arc<dyn ProvisionStep>>,
    server: Vec<Probe>,
    client: Vec<Probe>,
    probe_timeout: Option<Duration>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<String> = self.provisioning.iter().map(|s| s.resource()).collect();
        f.debug_struct("Diagnostics")
            .field("provisioning", &steps)
            .field("server", &self.server)
            .field("client", &self.client)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            provisioning: Vec::new(),
            server: Vec::new(),
            client: Vec::new(),
            probe_timeout: TimeoutConfig::default().probe_timeout(),
        }
    }

    /// Add a provisioning step; steps run in the order they are added
    pub fn with_provisioning(mut self, step: impl ProvisionStep + 'static) -> Self {
        self.provisioning.push(Arc::new(step));
        self
    }

    pub fn with_server_probe(mut self, probe: Probe) -> Self {
        self.server.push(probe);
        self
    }

    pub fn with_client_probe(mut self, probe: Probe) -> Self {
        self.client.push(probe);
        self
    }

    /// Upper bound for each probe; `None` lets probes run unbounded
    pub fn with_probe_timeout(mut self, limit: Option<Duration>) -> Self {
        self.probe_timeout = limit;
        self
    }

    pub fn server_probes(&self) -> &[Probe] {
        &self.server
    }

    pub fn client_probes(&self) -> &[Probe] {
        &self.client
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout
    }

    /// Run every provisioning step in order, stopping at the first failure
    pub async fn provision(&self) -> Result<(), DiagError> {
        for step in &self.provisioning {
            let resource = step.resource();
            debug!(resource = %resource, "provisioning");
            step.ensure()
                .await
                .map_err(|source| DiagError::Provisioning { resource, source })?;
        }
        Ok(())
    }

    /// Provision, then run the server probes
    pub async fn run_server(&self) -> Result<Vec<DiagnosticResult>, DiagError> {
        self.provision().await?;
        Ok(self.run_probes("server", &self.server).await)
    }

    /// Run the client probes
    pub async fn run_client(&self) -> Vec<DiagnosticResult> {
        self.run_probes("client", &self.client).await
    }

    /// Server results followed by client results
    pub async fn run_all(&self) -> Result<Vec<DiagnosticResult>, DiagError> {
        let mut results = self.run_server().await?;
        results.extend(self.run_client().await);
        Ok(results)
    }

    async fn run_probes(&self, origin: &str, probes: &[Probe]) -> Vec<DiagnosticResult> {
        let started = Instant::now();
        let results = join_all(
            probes
                .iter()
                .map(|probe| probe.run_with_timeout(self.probe_timeout)),
        )
        .await;

        let summary = ResultSummary::from_results(&results);
        info!(
            origin,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "diagnostics run complete"
        );
        results
    }
}
