//! Integration tests for the public API request gate.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{admin_request, parse_response_body, public_request, test_config, TestApp};
use serde_json::json;
use uuid::Uuid;

fn reader() -> serde_json::Value {
    json!({
        "name": "BI export",
        "scopes": ["incidents:read", "events:write"],
    })
}

#[tokio::test]
async fn test_missing_key_is_rejected() {
    let app = TestApp::new();

    let request = Request::builder()
        .uri("/api/public/v1/me")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "API_KEY_MISSING");
}

#[tokio::test]
async fn test_unknown_key_is_rejected() {
    let app = TestApp::new();

    let response = app
        .send(public_request(
            Method::GET,
            "/api/public/v1/me",
            "ehs_live_0000000000000000000000000000000000000000",
            None,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "API_KEY_INVALID");
}

#[tokio::test]
async fn test_whoami_returns_identity_and_rate_headers() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let (client_id, key) = app.create_client(org, reader()).await;

    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &key, None))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let body = parse_response_body(response).await;
    assert_eq!(body["client_id"], client_id.to_string());
    assert_eq!(body["organisation_id"], org.to_string());
    assert_eq!(body["rate_limit_tier"], "standard");
}

#[tokio::test]
async fn test_rate_limit_rejects_after_tier_limit() {
    let app = TestApp::new();
    let (_, key) = app.create_client(Uuid::new_v4(), reader()).await;

    for _ in 0..5 {
        let response = app
            .send(public_request(Method::GET, "/api/public/v1/me", &key, None))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &key, None))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let (_, first) = app.create_client(org, reader()).await;
    let (_, second) = app.create_client(org, reader()).await;

    for _ in 0..6 {
        app.send(public_request(Method::GET, "/api/public/v1/me", &first, None))
            .await;
    }

    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &second, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_collection_requires_matching_scope() {
    let app = TestApp::new();
    let (_, key) = app.create_client(Uuid::new_v4(), reader()).await;

    let response = app
        .send(public_request(
            Method::GET,
            "/api/public/v1/actions/events",
            &key,
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "INSUFFICIENT_SCOPE");

    let response = app
        .send(public_request(
            Method::GET,
            "/api/public/v1/incidents/events",
            &key,
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_collection_is_not_found() {
    let app = TestApp::new();
    let (_, key) = app.create_client(Uuid::new_v4(), reader()).await;

    let response = app
        .send(public_request(
            Method::GET,
            "/api/public/v1/invoices/events",
            &key,
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_recorded_event_is_listed_in_collection() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let (_, key) = app.create_client(org, reader()).await;

    let event = app.record_event(&key, "incident.created").await;
    assert_eq!(event["source"], "api");
    assert_eq!(event["organisation_id"], org.to_string());

    let response = app
        .send(public_request(
            Method::GET,
            "/api/public/v1/incidents/events",
            &key,
            None,
        ))
        .await;
    let body = parse_response_body(response).await;
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["id"], event["id"]);
}

#[tokio::test]
async fn test_record_event_requires_write_scope() {
    let app = TestApp::new();
    let (_, key) = app
        .create_client(
            Uuid::new_v4(),
            json!({"name": "Read only", "scopes": ["incidents:read"]}),
        )
        .await;

    let response = app
        .send(public_request(
            Method::POST,
            "/api/public/v1/events",
            &key,
            Some(json!({
                "event_type": "incident.created",
                "entity_type": "incident",
                "entity_id": "INC-1",
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_record_event_rejects_unknown_event_type() {
    let app = TestApp::new();
    let (_, key) = app.create_client(Uuid::new_v4(), reader()).await;

    let response = app
        .send(public_request(
            Method::POST,
            "/api/public/v1/events",
            &key,
            Some(json!({
                "event_type": "incident.exploded",
                "entity_type": "incident",
                "entity_id": "INC-1",
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "INVALID_EVENT_TYPE");
}

#[tokio::test]
async fn test_suspended_client_is_rejected_until_reactivated() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let (client_id, key) = app.create_client(org, reader()).await;
    let base = format!("/api/v1/admin/organisations/{}/api-clients/{}", org, client_id);

    let response = app
        .send(admin_request(Method::POST, &format!("{}/suspend", base), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &key, None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "API_KEY_INACTIVE");

    app.send(admin_request(Method::POST, &format!("{}/reactivate", base), None))
        .await;
    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &key, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_regenerated_key_replaces_old_key() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let (client_id, old_key) = app.create_client(org, reader()).await;

    let response = app
        .send(admin_request(
            Method::POST,
            &format!(
                "/api/v1/admin/organisations/{}/api-clients/{}/regenerate-key",
                org, client_id
            ),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    let new_key = body["api_key"].as_str().unwrap().to_string();
    assert_ne!(new_key, old_key);

    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &old_key, None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &new_key, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ip_allowlist_is_enforced() {
    let app = TestApp::new();
    let (_, key) = app
        .create_client(
            Uuid::new_v4(),
            json!({
                "name": "Locked down",
                "scopes": ["incidents:read"],
                "ip_allowlist": ["198.51.100.0/24"],
            }),
        )
        .await;

    // public_request sends X-Forwarded-For 198.51.100.20
    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &key, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/api/public/v1/me")
        .header("X-API-Key", &key)
        .header("X-Forwarded-For", "203.0.113.9")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "IP_NOT_ALLOWED");
}

#[tokio::test]
async fn test_allowlist_denies_when_ip_is_unknown() {
    let app = TestApp::with_config(test_config(&[("security.trust_forwarded_for", "false")]));
    let (_, key) = app
        .create_client(
            Uuid::new_v4(),
            json!({
                "name": "Locked down",
                "scopes": ["incidents:read"],
                "ip_allowlist": ["198.51.100.20"],
            }),
        )
        .await;

    // No ConnectInfo in a oneshot and the forwarded header is untrusted.
    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &key, None))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
