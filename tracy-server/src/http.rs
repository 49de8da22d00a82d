//! Tracy HTTP REST API
//!
//! Axum-based HTTP server over the event correlator. Each endpoint has a thin
//! axum handler that delegates to an inner function returning
//! `(StatusCode, Bytes)`, so the inner functions can be tested without axum
//! dispatch.
//!
//! Endpoints:
//! - GET  /health                  store reachability
//! - GET  /version                 server version info
//! - POST /tracers                 store a captured request and its tracers
//! - GET  /tracers/:id             one tracer
//! - PUT  /tracers/:id             edit a tracer (screenshot)
//! - GET  /tracers/:id/events      events recorded for a tracer
//! - POST /tracers/:id/events      record one event
//! - POST /events/bulk             record events by tracer string
//! - GET  /sessions/:uuid/tracers  every request of a session (cached)
//! - POST /cache/clear             reset the tracer cache
//! - GET  /cache/stats             tracer cache counters

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracy_core::{Request, StoreError, TracerEdit, TracerEvent, TracerEventBulk};

use crate::subsystems::cache::CacheError;
use crate::subsystems::correlator::{CorrelateError, EventCorrelator, EventStatus};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub correlator: EventCorrelator,
    /// `None` when running on the in-memory store.
    pub pool: Option<PgPool>,
    pub socket_path: String,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/tracers", post(add_tracer_handler))
        .route("/tracers/:id", get(get_tracer_handler).put(edit_tracer_handler))
        .route(
            "/tracers/:id/events",
            get(get_events_handler).post(add_event_handler),
        )
        .route("/events/bulk", post(add_events_handler))
        .route("/sessions/:uuid/tracers", get(get_tracers_handler))
        .route("/cache/clear", post(clear_cache_handler))
        .route("/cache/stats", get(cache_stats_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    addr: String,
    state: HttpState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Tracy HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Status mapping
// ============================================================================

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(status: &str, msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: status.to_string(),
        }
    }

    fn into_bytes(self) -> Bytes {
        serde_json::to_vec(&self).map(Bytes::from).unwrap_or_default()
    }
}

pub fn event_status_code(status: EventStatus) -> StatusCode {
    match status {
        EventStatus::Success => StatusCode::OK,
        EventStatus::Conflict => StatusCode::CONFLICT,
        EventStatus::Failure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_status_code(err: &CorrelateError) -> StatusCode {
    match err {
        CorrelateError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
        CorrelateError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        CorrelateError::Cache(CacheError::Unavailable { .. })
        | CorrelateError::Cache(CacheError::Timeout(_))
        | CorrelateError::Cache(CacheError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond(result: std::result::Result<Bytes, CorrelateError>) -> (StatusCode, Bytes) {
    match result {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            let status = error_status_code(&e);
            let label = if status == StatusCode::CONFLICT {
                EventStatus::Conflict.as_str()
            } else {
                EventStatus::Failure.as_str()
            };
            (status, ErrorResponse::new(label, e.to_string()).into_bytes())
        }
    }
}

/// Malformed or mistyped request bodies still get a JSON error body.
fn reject_body(rejection: JsonRejection) -> (StatusCode, Bytes) {
    tracing::debug!(status = %rejection.status(), "Rejected request body");
    (
        rejection.status(),
        ErrorResponse::new(EventStatus::Failure.as_str(), rejection.body_text()).into_bytes(),
    )
}

fn respond_event((status, body): (EventStatus, serde_json::Value)) -> (StatusCode, Bytes) {
    let bytes = serde_json::to_vec(&body).map(Bytes::from).unwrap_or_default();
    (event_status_code(status), bytes)
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Inner health check, returns (status_code, json_body).
pub async fn health_inner(pool: Option<&PgPool>, socket_path: &str) -> (StatusCode, serde_json::Value) {
    let store = match pool {
        Some(pool) => match tracy_core::db::health_check(pool).await {
            Ok(v) => v,
            Err(e) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::json!({
                        "status": "unhealthy",
                        "error": e.to_string(),
                    }),
                );
            }
        },
        None => "memory".to_string(),
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "store": store,
            "socket": socket_path,
        }),
    )
}

/// Inner version, returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "tracy/1",
    })
}

pub async fn add_tracer_inner(correlator: &EventCorrelator, request: Request) -> (StatusCode, Bytes) {
    respond(correlator.add_tracer(request).await)
}

pub async fn get_tracer_inner(correlator: &EventCorrelator, id: i64) -> (StatusCode, Bytes) {
    respond(correlator.get_tracer(id).await)
}

pub async fn edit_tracer_inner(
    correlator: &EventCorrelator,
    id: i64,
    edit: TracerEdit,
) -> (StatusCode, Bytes) {
    respond(correlator.edit_tracer(edit, id).await)
}

pub async fn get_tracers_inner(correlator: &EventCorrelator, uuid: &str) -> (StatusCode, Bytes) {
    respond(correlator.get_tracers(uuid).await)
}

pub async fn get_events_inner(correlator: &EventCorrelator, tracer_id: i64) -> (StatusCode, Bytes) {
    respond(correlator.get_events(tracer_id).await)
}

pub async fn add_event_inner(
    correlator: &EventCorrelator,
    tracer_id: i64,
    event: TracerEvent,
) -> (StatusCode, Bytes) {
    respond_event(correlator.add_event(tracer_id, event).await)
}

pub async fn add_events_inner(
    correlator: &EventCorrelator,
    batch: Vec<TracerEventBulk>,
) -> (StatusCode, Bytes) {
    respond_event(correlator.add_events(batch).await)
}

pub async fn clear_cache_inner(correlator: &EventCorrelator) -> (StatusCode, Bytes) {
    respond(
        correlator
            .clear_cache()
            .await
            .map(|()| Bytes::from_static(br#"{"status":"success"}"#)),
    )
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

fn json_bytes((status, body): (StatusCode, Bytes)) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.pool.as_ref(), &state.socket_path).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn add_tracer_handler(
    State(state): State<Arc<HttpState>>,
    payload: std::result::Result<Json<Request>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => json_bytes(add_tracer_inner(&state.correlator, request).await),
        Err(rejection) => json_bytes(reject_body(rejection)),
    }
}

pub async fn get_tracer_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<i64>,
) -> Response {
    json_bytes(get_tracer_inner(&state.correlator, id).await)
}

pub async fn edit_tracer_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<i64>,
    payload: std::result::Result<Json<TracerEdit>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(edit)) => json_bytes(edit_tracer_inner(&state.correlator, id, edit).await),
        Err(rejection) => json_bytes(reject_body(rejection)),
    }
}

pub async fn get_tracers_handler(
    State(state): State<Arc<HttpState>>,
    Path(uuid): Path<String>,
) -> Response {
    json_bytes(get_tracers_inner(&state.correlator, &uuid).await)
}

pub async fn get_events_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<i64>,
) -> Response {
    json_bytes(get_events_inner(&state.correlator, id).await)
}

pub async fn add_event_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<i64>,
    payload: std::result::Result<Json<TracerEvent>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(event)) => json_bytes(add_event_inner(&state.correlator, id, event).await),
        Err(rejection) => json_bytes(reject_body(rejection)),
    }
}

pub async fn add_events_handler(
    State(state): State<Arc<HttpState>>,
    payload: std::result::Result<Json<Vec<TracerEventBulk>>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(batch)) => json_bytes(add_events_inner(&state.correlator, batch).await),
        Err(rejection) => json_bytes(reject_body(rejection)),
    }
}

pub async fn clear_cache_handler(State(state): State<Arc<HttpState>>) -> Response {
    json_bytes(clear_cache_inner(&state.correlator).await)
}

pub async fn cache_stats_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.correlator.cache().stats()))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // TEST 1: version_inner is pure and returns correct fields
    // ========================================================================
    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "tracy/1");
    }

    // ========================================================================
    // TEST 2: event statuses map 1:1 to HTTP codes
    // ========================================================================
    #[test]
    fn test_event_status_codes() {
        assert_eq!(event_status_code(EventStatus::Success), StatusCode::OK);
        assert_eq!(event_status_code(EventStatus::Conflict), StatusCode::CONFLICT);
        assert_eq!(
            event_status_code(EventStatus::Failure),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    // ========================================================================
    // TEST 3: cache failures surface as 503, missing rows as 404
    // ========================================================================
    #[test]
    fn test_error_status_codes() {
        let unavailable = CorrelateError::Cache(CacheError::Unavailable {
            uuid: "s".to_string(),
            source: StoreError::Unavailable("down".to_string()),
        });
        assert_eq!(error_status_code(&unavailable), StatusCode::SERVICE_UNAVAILABLE);

        let missing = CorrelateError::Store(StoreError::NotFound("tracer 1".to_string()));
        assert_eq!(error_status_code(&missing), StatusCode::NOT_FOUND);

        let duplicate = CorrelateError::Store(StoreError::Conflict("dup".to_string()));
        assert_eq!(error_status_code(&duplicate), StatusCode::CONFLICT);
    }

    // ========================================================================
    // TEST 4: health without a pool reports the in-memory store
    // ========================================================================
    #[tokio::test]
    async fn test_health_inner_memory_store() {
        let (status, body) = health_inner(None, "/tmp/tracy.sock").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "memory");
        assert_eq!(body["socket"], "/tmp/tracy.sock");
    }
}
