//! HTTP routes
//!
//! `/diag` renders the page with the server results, `/diag/client` the
//! client card fragments it fetches afterwards. `/api/diag*` serve the same
//! runs as JSON.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use azdiag::diagnostics::{error_chain, DiagError, DiagnosticsReport};
use azdiag::telemetry::Properties;
use serde_json::json;
use std::time::Instant;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, Level};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/diag", get(diag_page))
        .route("/diag/client", get(diag_client))
        .route("/api/diag", get(api_diag))
        .route("/api/diag/client", get(api_diag_client))
        .route("/health", get(health))
        .layer(trace_layer)
        .with_state(state)
}

fn origin(origin: &str) -> Properties {
    Properties::from([("origin".to_string(), origin.to_string())])
}

fn record_failure(state: &AppState, err: &DiagError) {
    error!(error = %error_chain(err), "diagnostics could not run");
    state.telemetry.track_exception(err, origin("server"));
}

fn render_failed(err: DiagError) -> Response {
    error!(error = %error_chain(&err), "failed to render diagnostics");
    (StatusCode::INTERNAL_SERVER_ERROR, error_chain(&err)).into_response()
}

async fn diag_page(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let build_id = state.build_id.as_deref();
    match state.diagnostics.run_server().await {
        Ok(results) => {
            state
                .telemetry
                .track_duration_metric("diagnostics.duration", started, origin("server"));
            match state.renderer.render_page(&results, build_id) {
                Ok(html) => Html(html).into_response(),
                Err(e) => render_failed(e),
            }
        }
        Err(err) => {
            record_failure(&state, &err);
            match state.renderer.render_error_page(&err, build_id) {
                Ok(html) => (StatusCode::INTERNAL_SERVER_ERROR, Html(html)).into_response(),
                Err(e) => render_failed(e),
            }
        }
    }
}

async fn diag_client(State(state): State<AppState>) -> Response {
    let results = state.diagnostics.run_client().await;
    match state.renderer.render_cards(&results) {
        Ok(html) => Html(html).into_response(),
        Err(e) => render_failed(e),
    }
}

async fn api_diag(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    match state.diagnostics.run_server().await {
        Ok(results) => {
            state
                .telemetry
                .track_duration_metric("diagnostics.duration", started, origin("server"));
            Json(DiagnosticsReport::new(results, state.build_id.clone())).into_response()
        }
        Err(err) => {
            record_failure(&state, &err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error_chain(&err) })),
            )
                .into_response()
        }
    }
}

async fn api_diag_client(State(state): State<AppState>) -> Json<DiagnosticsReport> {
    let results = state.diagnostics.run_client().await;
    Json(DiagnosticsReport::new(results, state.build_id.clone()))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
