//! Shared server state

use azdiag::diagnostics::{DiagError, Diagnostics, PageRenderer};
use azdiag::telemetry::TelemetryClient;
use std::sync::Arc;

/// Everything a request handler needs. Cheap to clone; each request runs
/// its own diagnostics.
#[derive(Clone)]
pub struct AppState {
    pub diagnostics: Diagnostics,
    pub renderer: Arc<PageRenderer>,
    pub build_id: Option<String>,
    pub telemetry: TelemetryClient,
}

impl AppState {
    pub fn new(
        diagnostics: Diagnostics,
        build_id: Option<String>,
        telemetry: TelemetryClient,
    ) -> Result<Self, DiagError> {
        Ok(Self {
            diagnostics,
            renderer: Arc::new(PageRenderer::new()?),
            build_id,
            telemetry,
        })
    }
}
