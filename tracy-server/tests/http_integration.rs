//! Router-level tests: real axum dispatch over the in-memory store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request as HttpRequest, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use tracy_core::config::CacheConfig;
use tracy_core::MemoryStore;
use tracy_server::http::{build_router, HttpState};
use tracy_server::{BroadcastNotifier, EventCorrelator, TracerCache};

fn app() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let (cache, _task) = TracerCache::start(store.clone(), &CacheConfig::default());
    let correlator = EventCorrelator::new(
        store.clone(),
        cache,
        Arc::new(BroadcastNotifier::new(16)),
        10_000,
    );
    let state = HttpState {
        correlator,
        pool: None,
        socket_path: "/tmp/tracy-test.sock".to_string(),
    };
    (build_router(Arc::new(state)), store)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = HttpRequest::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn plant(app: &Router, uuid: &str, marker: &str) -> i64 {
    let (status, body) = call(
        app,
        Method::POST,
        "/tracers",
        Some(json!({
            "uuid": uuid,
            "raw_request": format!("GET /?q={} HTTP/1.1", marker),
            "request_method": "GET",
            "tracers": [{ "tracer_string": marker, "tracer_payload": format!("'\"<{}>", marker) }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["tracers"][0]["id"].as_i64().unwrap()
}

// ===========================================================================
// TEST 1: health and version
// ===========================================================================
#[tokio::test]
async fn test_health_and_version() {
    let (app, _) = app();

    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");

    let (status, body) = call(&app, Method::GET, "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["protocol"], "tracy/1");
}

// ===========================================================================
// TEST 2: event route maps success, conflict and validation failure
// ===========================================================================
#[tokio::test]
async fn test_event_route_status_codes() {
    let (app, _) = app();
    let id = plant(&app, "s", "zzA").await;
    let uri = format!("/tracers/{}/events", id);
    let observed = json!({ "data": "<img>", "location": "/home", "event_type": "mutation" });

    let (status, body) = call(&app, Method::POST, &uri, Some(observed.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tracer_id"], id);

    let (status, body) = call(&app, Method::POST, &uri, Some(observed)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "conflict");

    let (status, body) = call(
        &app,
        Method::POST,
        &uri,
        Some(json!({ "data": "<img>", "location": "/home", "event_type": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "The event type field for the event was empty.");

    let (status, body) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

// ===========================================================================
// TEST 3: bulk route reports the aggregate status
// ===========================================================================
#[tokio::test]
async fn test_bulk_route_conflict() {
    let (app, _) = app();
    let a = plant(&app, "s", "zzA").await;
    plant(&app, "s", "zzB").await;
    let observed = json!({ "data": "<img>", "location": "/home", "event_type": "mutation" });
    call(&app, Method::POST, &format!("/tracers/{}/events", a), Some(observed.clone())).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/events/bulk",
        Some(json!([{ "tracer_event": observed, "tracer_strings": ["zzA", "zzB"] }])),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["count"], 1);
}

// ===========================================================================
// TEST 4: missing tracer is 404, duplicate tracer string is 409
// ===========================================================================
#[tokio::test]
async fn test_tracer_route_errors() {
    let (app, _) = app();

    let (status, body) = call(&app, Method::GET, "/tracers/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");

    plant(&app, "s", "zzA").await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/tracers",
        Some(json!({ "uuid": "s", "tracers": [{ "tracer_string": "zzA" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "conflict");
}

// ===========================================================================
// TEST 5: session listing follows edits and survives a cache clear
// ===========================================================================
#[tokio::test]
async fn test_session_listing_and_edit() {
    let (app, store) = app();
    let id = plant(&app, "s", "zzA").await;

    let (status, body) = call(&app, Method::GET, "/sessions/s/tracers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app,
        Method::PUT,
        &format!("/tracers/{}", id),
        Some(json!({ "uuid": "s", "screenshot": "data:image/png;base64,AA" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["screenshot"], "data:image/png;base64,AA");

    let (_, body) = call(&app, Method::GET, "/sessions/s/tracers", None).await;
    assert_eq!(body[0]["tracers"][0]["screenshot"], "data:image/png;base64,AA");

    let (status, body) = call(&app, Method::POST, "/cache/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (_, body) = call(&app, Method::GET, "/sessions/s/tracers", None).await;
    assert_eq!(body[0]["tracers"][0]["screenshot"], "data:image/png;base64,AA");
    assert_eq!(store.session_queries(), 2);

    let (status, body) = call(&app, Method::GET, "/cache/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cold_loads"], 2);
}

// ===========================================================================
// TEST 6: store outage on a cold read is a 503
// ===========================================================================
#[tokio::test]
async fn test_session_listing_unavailable() {
    let (app, store) = app();
    store.set_unavailable(true);

    let (status, body) = call(&app, Method::GET, "/sessions/s/tracers", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");

    store.set_unavailable(false);
    let (status, body) = call(&app, Method::GET, "/sessions/s/tracers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

async fn send_raw(app: &Router, uri: &str, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut builder = HttpRequest::builder().method(Method::POST).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).expect("body must be JSON"))
}

// ===========================================================================
// TEST 7: unreadable request bodies are answered with a JSON error
// ===========================================================================
#[tokio::test]
async fn test_bad_bodies_get_json_errors() {
    let (app, _) = app();

    let (status, body) = send_raw(&app, "/tracers", Some("application/json"), "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(body["error"].is_string());

    let (status, body) = send_raw(&app, "/tracers", None, r#"{"uuid":"s"}"#).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["status"], "error");

    let (status, body) = send_raw(
        &app,
        "/tracers/1/events",
        Some("application/json"),
        r#"{"data": 5}"#,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "error");

    let (status, body) = send_raw(&app, "/events/bulk", Some("application/json"), "[{").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}
