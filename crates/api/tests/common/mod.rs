//! Common test utilities for integration tests.
//!
//! Every test gets its own in-memory stores and a recording transport, so
//! no database or network is needed.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use ehs_integrations_api::{
    app::{create_app, AppState},
    config::Config,
    services::transport::{OutboundRequest, TransportError, TransportResponse},
    services::WebhookTransport,
};
use persistence::Stores;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Base configuration: tiny Argon2 cost, no retry delay, standard tier of 5.
pub fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut overrides = vec![
        ("encryption.master_key", "integration-test-master-key"),
        ("security.admin_token", ADMIN_TOKEN),
        ("security.trust_forwarded_for", "true"),
        ("security.key_hash_memory_kib", "1024"),
        ("security.key_hash_iterations", "1"),
        ("rate_limits.standard", "5"),
        ("webhooks.initial_delay_secs", "0"),
        ("webhooks.max_delay_secs", "0"),
    ];
    overrides.extend_from_slice(extra);
    Config::load_for_test(&overrides).expect("test config")
}

/// Transport that records every request and answers with a fixed status,
/// optionally after a delay.
pub struct RecordingTransport {
    status: Mutex<u16>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sent: Mutex<Vec<OutboundRequest>>,
}

impl RecordingTransport {
    pub fn new(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_status(&self, status: u16) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Most requests ever outstanding at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.sent.lock().unwrap().push(request);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let status = *self.status.lock().unwrap();
        Ok(TransportResponse {
            status,
            status_text: if status < 300 { "OK" } else { "Internal Server Error" }.to_string(),
            body: "ok".to_string(),
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub transport: Arc<RecordingTransport>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config(&[]))
    }

    pub fn with_config(config: Config) -> Self {
        let transport = RecordingTransport::new(200);
        let state = AppState::new(config, Stores::in_memory(), transport.clone())
            .expect("app state");
        let router = create_app(state.clone());
        Self {
            state,
            router,
            transport,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Creates an API client through the admin API and returns its raw key.
    pub async fn create_client(&self, org: Uuid, body: Value) -> (Uuid, String) {
        let response = self
            .send(admin_request(
                Method::POST,
                &format!("/api/v1/admin/organisations/{}/api-clients", org),
                Some(body),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = parse_response_body(response).await;
        let id = body["id"].as_str().unwrap().parse().unwrap();
        (id, body["api_key"].as_str().unwrap().to_string())
    }

    /// Creates a webhook through the admin API and returns its id and secret.
    pub async fn create_webhook(&self, org: Uuid, event_types: &[&str], is_active: bool) -> (Uuid, String) {
        let response = self
            .send(admin_request(
                Method::POST,
                &format!("/api/v1/admin/organisations/{}/webhooks", org),
                Some(json!({
                    "name": "SIEM forwarder",
                    "target_url": "https://hooks.example.com/ehs",
                    "event_types": event_types,
                    "is_active": is_active,
                })),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = parse_response_body(response).await;
        let id = body["id"].as_str().unwrap().parse().unwrap();
        (id, body["secret"].as_str().unwrap().to_string())
    }

    /// Records an event through the public API with an `events:write` key.
    pub async fn record_event(&self, api_key: &str, event_type: &str) -> Value {
        let response = self
            .send(public_request(
                Method::POST,
                "/api/public/v1/events",
                api_key,
                Some(json!({
                    "event_type": event_type,
                    "entity_type": "incident",
                    "entity_id": "INC-1042",
                    "payload": {"title": "Chemical spill", "severity": "high"},
                })),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        parse_response_body(response).await
    }
}

pub fn admin_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN));
    with_body(builder, body)
}

pub fn public_request(method: Method, uri: &str, api_key: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-API-Key", api_key)
        .header("X-Forwarded-For", "198.51.100.20");
    with_body(builder, body)
}

fn with_body(builder: axum::http::request::Builder, body: Option<Value>) -> Request<Body> {
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn parse_response_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}
