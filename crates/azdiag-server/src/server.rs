//! HTTP server lifecycle

use anyhow::{Context, Result};
use azdiag::telemetry::{Properties, SeverityLevel};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::routes::router;
use crate::state::AppState;

/// Serve until ctrl-c, then flush buffered telemetry
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let telemetry = state.telemetry.clone();
    let flush_loop = telemetry.spawn_flush_loop();

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(address = %addr, "diagnostics available at http://{}/diag", addr);
    telemetry.track_trace(
        "azdiag server started",
        SeverityLevel::Information,
        Properties::from([("address".to_string(), addr.clone())]),
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(handle) = flush_loop {
        handle.abort();
    }
    match telemetry.flush().await {
        Ok(0) => {}
        Ok(count) => info!(count, "flushed telemetry on shutdown"),
        Err(e) => warn!(error = %e, "final telemetry flush failed"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
