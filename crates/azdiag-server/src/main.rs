//! azdiag - Azure dependency diagnostics
//!
//! `azdiag serve` hosts the diagnostics page, `azdiag run` prints a one-shot
//! report to the terminal.

mod commands;
mod logging;
mod routes;
mod server;
mod state;

use anyhow::{Context, Result};
use azdiag::config::Settings;
use azdiag::diagnostics::{build_diagnostics, ReportOptions};
use azdiag::network::{build_http_client, TimeoutConfig};
use azdiag::services::ServiceClients;
use azdiag::telemetry::TelemetryClient;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "azdiag", version, about = "Diagnostics for a chat application's Azure dependencies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the diagnostics page
    Serve {
        /// Interface to listen on (defaults to HOSTNAME or localhost)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (defaults to PORT or 3000)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run every probe once and print the results
    Run {
        /// Print the results as JSON
        #[arg(long)]
        json: bool,
        /// Show full content instead of truncating
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Arc::new(Settings::load().context("failed to load settings")?);
    logging::init(&settings);

    let http = build_http_client(&TimeoutConfig::from_settings(&settings))
        .context("failed to build HTTP client")?;
    let telemetry = TelemetryClient::from_settings(&settings, http.clone());
    let clients = ServiceClients::new(Arc::clone(&settings), http, telemetry.clone());
    let diagnostics = build_diagnostics(&clients);
    let build_id = settings.build_id();

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| settings.hostname());
            let port = port.unwrap_or_else(|| settings.port());
            info!(
                telemetry = telemetry.is_enabled(),
                probes = diagnostics.server_probes().len() + diagnostics.client_probes().len(),
                "starting azdiag"
            );
            let state = AppState::new(diagnostics, build_id, telemetry)?;
            server::serve(state, &host, port).await
        }
        Command::Run { json, full } => {
            let options = ReportOptions { full, json };
            commands::run(&diagnostics, build_id, &telemetry, &options).await
        }
    }
}
