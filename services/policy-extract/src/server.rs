//! HTTP API for `serve`
//!
//! Routes:
//! - `POST /v1/extract?insurer=ID` raw PDF body, returns the record as a JSON download
//! - `POST /v1/extract/text` JSON `{text, insurer}`, returns the record
//! - `GET /health` mode, key usage and counters
//! - `GET /metrics` Prometheus text exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::pipeline::Pipeline;

/// How long in-flight extractions may run after a shutdown signal.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Counters reported on `/health`.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub extractions_total: Arc<AtomicU64>,
    pub extractions_failed: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            extractions_total: Arc::new(AtomicU64::new(0)),
            extractions_failed: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub metrics: ServiceMetrics,
    pub prometheus: PrometheusHandle,
}

/// Limits applied to the extraction routes.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_concurrent: usize,
    pub max_body_bytes: usize,
}

/// Build the axum router with all routes and shared state.
///
/// Both extraction routes share one concurrency budget; health and metrics
/// stay responsive while extractions queue.
pub fn build_router(state: AppState, limits: Limits) -> Router {
    let extract = Router::new()
        .route("/v1/extract", post(extract_pdf_handler))
        .route("/v1/extract/text", post(extract_text_handler))
        .layer(tower::limit::GlobalConcurrencyLimitLayer::new(
            limits.max_concurrent,
        ))
        .layer(DefaultBodyLimit::max(limits.max_body_bytes));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(extract)
        .with_state(state)
}

/// Bind, serve until SIGINT/SIGTERM, then drain for at most [`DRAIN_TIMEOUT`].
pub async fn run(app: Router, listen_addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "accepting requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ExtractParams {
    insurer: String,
}

#[derive(Debug, Deserialize)]
struct TextRequest {
    text: String,
    insurer: String,
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// JSON error body: `{"error": {"type", "message", "request_id"}}`.
fn error_response(err: &Error, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": err.kind(),
            "message": err.to_string(),
            "request_id": request_id,
        }
    });
    (err.status(), Json(body)).into_response()
}

/// Malformed request that never reached the pipeline.
fn reject(request_id: &str, reason: String) -> Response {
    let err = Error::InvalidRequest(reason);
    warn!(request_id, error = %err, "rejected request");
    error_response(&err, request_id)
}

fn finish(
    state: &AppState,
    request_id: &str,
    result: crate::error::Result<extraction::StructuredRecord>,
) -> Response {
    state
        .metrics
        .extractions_total
        .fetch_add(1, Ordering::Relaxed);
    match result {
        Ok(record) => {
            let disposition = format!("attachment; filename=\"{}\"", record.file_name());
            (
                StatusCode::OK,
                [(header::CONTENT_DISPOSITION, disposition)],
                Json(record),
            )
                .into_response()
        }
        Err(e) => {
            state
                .metrics
                .extractions_failed
                .fetch_add(1, Ordering::Relaxed);
            warn!(request_id, kind = e.kind(), status = e.status().as_u16(), "request failed");
            error_response(&e, request_id)
        }
    }
}

async fn extract_pdf_handler(
    State(state): State<AppState>,
    params: std::result::Result<Query<ExtractParams>, QueryRejection>,
    body: Bytes,
) -> Response {
    let request_id = new_request_id();
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return reject(&request_id, rejection.body_text()),
    };
    info!(
        request_id,
        insurer = %params.insurer,
        bytes = body.len(),
        "PDF extraction requested"
    );
    let result = state
        .pipeline
        .process_pdf(body.to_vec(), &params.insurer)
        .await;
    finish(&state, &request_id, result)
}

async fn extract_text_handler(
    State(state): State<AppState>,
    request: std::result::Result<Json<TextRequest>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => return reject(&request_id, rejection.body_text()),
    };
    info!(
        request_id,
        insurer = %request.insurer,
        chars = request.text.chars().count(),
        "text extraction requested"
    );
    let result = state
        .pipeline
        .process_text(request.text, &request.insurer)
        .await;
    finish(&state, &request_id, result)
}

/// Health endpoint: credential mode, per-key usage, uptime and counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.pipeline.orchestrator;
    let body = serde_json::json!({
        "status": "healthy",
        "mode": orchestrator.mode().await,
        "keys": orchestrator.key_stats().await,
        "insurers": orchestrator.registry().ids(),
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "extractions_total": state.metrics.extractions_total.load(Ordering::Relaxed),
        "extractions_failed": state.metrics.extractions_failed.load(Ordering::Relaxed),
    });
    (StatusCode::OK, Json(body))
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
