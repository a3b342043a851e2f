//! Integration tests for the admin API: API clients, the event log, jobs
//! and health.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{admin_request, parse_response_body, public_request, test_config, TestApp};
use fake::faker::company::en::CompanyName;
use fake::Fake;
use serde_json::json;
use uuid::Uuid;

fn clients_path(org: Uuid) -> String {
    format!("/api/v1/admin/organisations/{}/api-clients", org)
}

fn events_path(org: Uuid) -> String {
    format!("/api/v1/admin/organisations/{}/integration-events", org)
}

#[tokio::test]
async fn test_create_api_client_returns_key_once() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let name: String = CompanyName().fake();

    let response = app
        .send(admin_request(
            Method::POST,
            &clients_path(org),
            Some(json!({
                "name": name,
                "description": "Nightly warehouse sync",
                "scopes": ["incidents:read", "actions:read"],
                "rate_limit_tier": "premium",
            })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = parse_response_body(response).await;
    let key = created["api_key"].as_str().unwrap();
    assert!(key.starts_with(created["key_prefix"].as_str().unwrap()));
    assert_eq!(created["status"], "active");
    assert_eq!(created["rate_limit_tier"], "premium");

    let response = app
        .send(admin_request(
            Method::GET,
            &format!("{}/{}", clients_path(org), created["id"].as_str().unwrap()),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = parse_response_body(response).await;
    assert_eq!(fetched["name"], name.as_str());
    assert!(fetched.get("api_key").is_none());
    assert!(fetched.get("key_hash").is_none());
}

#[tokio::test]
async fn test_create_api_client_validation() {
    let app = TestApp::new();
    let org = Uuid::new_v4();

    let cases = [
        (json!({"name": "", "scopes": ["incidents:read"]}), "VALIDATION_ERROR"),
        (json!({"name": "No scopes", "scopes": []}), "VALIDATION_ERROR"),
        (json!({"name": "Bad scope", "scopes": ["incidents:delete"]}), "INVALID_SCOPE"),
        (
            json!({"name": "Bad IP", "scopes": ["incidents:read"], "ip_allowlist": ["10.0.0.0/99"]}),
            "INVALID_IP_ALLOWLIST",
        ),
    ];

    for (body, code) in cases {
        let response = app
            .send(admin_request(Method::POST, &clients_path(org), Some(body)))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = parse_response_body(response).await;
        assert_eq!(body["error"], code);
    }
}

#[tokio::test]
async fn test_list_api_clients_filters_by_status() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let scopes = json!(["incidents:read"]);
    let (first, _) = app
        .create_client(org, json!({"name": "First", "scopes": scopes}))
        .await;
    app.create_client(org, json!({"name": "Second", "scopes": scopes}))
        .await;
    app.create_client(Uuid::new_v4(), json!({"name": "Elsewhere", "scopes": scopes}))
        .await;

    app.send(admin_request(
        Method::POST,
        &format!("{}/{}/suspend", clients_path(org), first),
        None,
    ))
    .await;

    let response = app
        .send(admin_request(Method::GET, &clients_path(org), None))
        .await;
    let body = parse_response_body(response).await;
    assert_eq!(body["api_clients"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 2);

    let response = app
        .send(admin_request(
            Method::GET,
            &format!("{}?status=suspended", clients_path(org)),
            None,
        ))
        .await;
    let body = parse_response_body(response).await;
    let clients = body["api_clients"].as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["id"], first.to_string());
}

#[tokio::test]
async fn test_update_api_client() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let (id, _) = app
        .create_client(org, json!({"name": "Before", "scopes": ["incidents:read"]}))
        .await;

    let response = app
        .send(admin_request(
            Method::PATCH,
            &format!("{}/{}", clients_path(org), id),
            Some(json!({"name": "After", "scopes": ["incidents:read", "risks:read"]})),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["name"], "After");
    assert_eq!(body["scopes"], json!(["incidents:read", "risks:read"]));
}

#[tokio::test]
async fn test_status_transitions() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let (id, key) = app
        .create_client(org, json!({"name": "Lifecycle", "scopes": ["incidents:read"]}))
        .await;
    let base = format!("{}/{}", clients_path(org), id);

    let response = app
        .send(admin_request(Method::POST, &format!("{}/reactivate", base), None))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "INVALID_STATUS_TRANSITION");

    let response = app
        .send(admin_request(Method::DELETE, &base, None))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.send(admin_request(Method::GET, &base, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send(public_request(Method::GET, "/api/public/v1/me", &key, None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_usage_is_recorded() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let (id, key) = app
        .create_client(org, json!({"name": "Busy", "scopes": ["incidents:read"]}))
        .await;

    for _ in 0..3 {
        app.send(public_request(Method::GET, "/api/public/v1/me", &key, None))
            .await;
    }

    // Usage is written in the background.
    let stats_path = format!("{}/{}/stats", clients_path(org), id);
    let mut body = serde_json::Value::Null;
    for _ in 0..50 {
        let response = app
            .send(admin_request(Method::GET, &stats_path, None))
            .await;
        body = parse_response_body(response).await;
        if body["request_count"] == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(body["request_count"], 3);
    assert_eq!(body["last_used_ip"], "198.51.100.20");
}

#[tokio::test]
async fn test_event_log_queries() {
    let app = TestApp::new();
    let org = Uuid::new_v4();
    let (_, key) = app
        .create_client(org, json!({"name": "Feed", "scopes": ["events:write"]}))
        .await;

    let created = app.record_event(&key, "incident.created").await;
    app.record_event(&key, "incident.updated").await;
    app.record_event(&key, "incident.updated").await;

    let response = app
        .send(admin_request(
            Method::GET,
            &format!("{}?event_type=incident.updated", events_path(org)),
            None,
        ))
        .await;
    let body = parse_response_body(response).await;
    assert_eq!(body["events"].as_array().unwrap().len(), 2);

    let response = app
        .send(admin_request(
            Method::GET,
            &format!("{}/{}", events_path(org), created["id"].as_str().unwrap()),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(admin_request(
            Method::GET,
            &format!("{}/entity/incident/INC-1042", events_path(org)),
            None,
        ))
        .await;
    let body = parse_response_body(response).await;
    assert_eq!(body.as_array().unwrap().len(), 3);

    let response = app
        .send(admin_request(Method::GET, &format!("{}/stats", events_path(org)), None))
        .await;
    let body = parse_response_body(response).await;
    assert_eq!(body["total_events"], 3);
    assert_eq!(body["by_event_type"][0]["event_type"], "incident.updated");
    assert_eq!(body["by_event_type"][0]["count"], 2);

    // Another organisation sees nothing.
    let response = app
        .send(admin_request(Method::GET, &events_path(Uuid::new_v4()), None))
        .await;
    let body = parse_response_body(response).await;
    assert!(body["events"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_jobs_listing_and_manual_run() {
    let app = TestApp::with_config(test_config(&[("jobs.enabled", "false")]));

    let response = app
        .send(admin_request(Method::GET, "/api/v1/admin/jobs", None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["enabled"], false);
    let names: Vec<&str> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|job| job["name"].as_str().unwrap())
        .collect();
    for expected in [
        "webhook_delivery",
        "webhook_retry",
        "integration_event_cleanup",
        "rate_limit_purge",
    ] {
        assert!(names.contains(&expected), "missing job {}", expected);
    }

    let response = app
        .send(admin_request(
            Method::POST,
            "/api/v1/admin/jobs/webhook_retry/run",
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .send(admin_request(Method::POST, "/api/v1/admin/jobs/unknown/run", None))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoints_are_open() {
    let app = TestApp::new();

    let response = app
        .send(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["backend"], "memory");

    let response = app
        .send(Request::builder().uri("/api/health/live").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(Request::builder().uri("/api/health/ready").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = TestApp::new();

    let request = Request::builder()
        .uri("/api/health/live")
        .header("X-Request-ID", "req-abc-123")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.headers()["x-request-id"], "req-abc-123");
}
