// rtl433 Relay Exporter - HTTP endpoints
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP routes.
//!
//! Handlers only hold read handles: a scrape loads the current log
//! snapshot and renders it, without ever waiting on ingestion.

use crate::metrics::{content_type, encode_metrics, record_scrape, update_ingest_metrics};
use crate::pipeline::{Pipeline, PipelineState};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use rtl433_relay::event::unix_now;
use rtl433_relay::{
    IngestStats, LogReader, MetricsRenderer, RelayConfig, StatsSnapshot, CONTENT_TYPE,
};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers.
pub struct AppState {
    pub reader: LogReader,
    pub renderer: MetricsRenderer,
    pub stats: Arc<IngestStats>,
    pub pipeline: Arc<PipelineState>,
    pub config: RelayConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: &Pipeline, config: RelayConfig) -> Self {
        Self {
            reader: pipeline.reader.clone(),
            renderer: pipeline.renderer.clone(),
            stats: Arc::clone(&pipeline.stats),
            pipeline: Arc::clone(&pipeline.state),
            config,
            start_time: Instant::now(),
        }
    }
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/relay/metrics", get(relay_metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>rtl433 Relay</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        h1 { color: #2c3e50; }
        a { color: #3498db; text-decoration: none; }
        a:hover { text-decoration: underline; }
        .endpoints { background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .endpoint { margin: 10px 0; }
    </style>
</head>
<body>
    <h1>rtl433 Relay</h1>
    <p>Prometheus scrape target for rtl_433 sensor readings.</p>

    <div class="endpoints">
        <h2>Endpoints</h2>
        <div class="endpoint"><a href="/metrics">/metrics</a> - Sensor readings</div>
        <div class="endpoint"><a href="/relay/metrics">/relay/metrics</a> - Relay self metrics</div>
        <div class="endpoint"><a href="/health">/health</a> - Health check</div>
        <div class="endpoint"><a href="/ready">/ready</a> - Readiness check</div>
        <div class="endpoint"><a href="/status">/status</a> - Status information (JSON)</div>
    </div>
</body>
</html>"#,
    )
}

/// Sensor readings in Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let started = Instant::now();
    let snapshot = state.reader.snapshot();
    let body = state.renderer.render(&snapshot, unix_now());
    record_scrape(started.elapsed().as_secs_f64(), body.lines().count());

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

/// Relay self metrics.
async fn relay_metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_ingest_metrics(&state.stats.snapshot(), state.reader.len());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type())],
        encode_metrics(),
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready while the ingestion thread is still consuming lines.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.pipeline.running.load(Ordering::SeqCst) {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Ingestion stopped")
    }
}

/// Status information response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    version: String,
    uptime_secs: u64,
    ingesting: bool,
    sources: Vec<String>,
    log_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    newest_entry_age_secs: Option<f64>,
    ingest: StatsSnapshot,
    config: RelayConfig,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snapshot = state.reader.snapshot();
    let now = unix_now();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        ingesting: state.pipeline.running.load(Ordering::SeqCst),
        sources: state.pipeline.sources.clone(),
        log_entries: snapshot.len(),
        newest_entry_age_secs: snapshot.newest_timestamp().map(|ts| now - ts),
        ingest: state.stats.snapshot(),
        config: state.config.clone(),
    })
}
