//! azdiag - Azure dependency diagnostics
//!
//! Runs health probes against the Azure services a chat application depends
//! on and renders the outcome as an HTML page or a terminal report.

pub mod config;
pub mod diagnostics;
pub mod network;
pub mod services;
pub mod telemetry;
