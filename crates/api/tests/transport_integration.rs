//! HTTP transport against a local mock subscriber.

use std::time::Duration;

use ehs_integrations_api::services::dispatcher::{
    signed_request, EVENT_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, USER_AGENT,
};
use ehs_integrations_api::services::transport::TransportError;
use ehs_integrations_api::services::{HttpTransport, WebhookTransport};
use shared::signing::verify_signature;
use uuid::Uuid;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "whsec_transport_test";

fn transport(timeout: Duration) -> HttpTransport {
    HttpTransport::new(timeout).unwrap()
}

fn request_for(server: &MockServer, route: &str) -> ehs_integrations_api::services::transport::OutboundRequest {
    signed_request(
        &format!("{}{}", server.uri(), route),
        "incident.created",
        Uuid::new_v4(),
        br#"{"event_type":"incident.created"}"#.to_vec(),
        SECRET,
        1_760_000_000,
    )
}

#[tokio::test]
async fn test_posts_signed_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header(EVENT_HEADER, "incident.created"))
        .and(header("User-Agent", USER_AGENT))
        .and(header("Content-Type", "application/json"))
        .and(header_exists(SIGNATURE_HEADER))
        .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport(Duration::from_secs(5))
        .send(request_for(&server, "/hook"))
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.body, "accepted");

    let received = server.received_requests().await.unwrap();
    let received = &received[0];
    let timestamp: i64 = received.headers[TIMESTAMP_HEADER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let signature = received.headers[SIGNATURE_HEADER].to_str().unwrap();
    assert!(verify_signature(&received.body, SECRET, timestamp, signature));
}

#[tokio::test]
async fn test_server_error_is_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let response = transport(Duration::from_secs(5))
        .send(request_for(&server, "/hook"))
        .await
        .unwrap();
    assert!(!response.is_success());
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");
    assert_eq!(response.body, "maintenance");
}

#[tokio::test]
async fn test_redirect_is_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/elsewhere"))
        .mount(&server)
        .await;
    Mock::given(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let response = transport(Duration::from_secs(5))
        .send(request_for(&server, "/hook"))
        .await
        .unwrap();
    assert_eq!(response.status, 302);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_slow_subscriber_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let result = transport(Duration::from_millis(200))
        .send(request_for(&server, "/hook"))
        .await;
    assert_eq!(result, Err(TransportError::Timeout));
}

#[tokio::test]
async fn test_unreachable_host_is_a_connect_error() {
    // Port 9 on loopback has nothing listening.
    let request = signed_request(
        "http://127.0.0.1:9/hook",
        "incident.created",
        Uuid::new_v4(),
        b"{}".to_vec(),
        SECRET,
        1_760_000_000,
    );

    let result = transport(Duration::from_secs(2)).send(request).await;
    assert!(matches!(result, Err(TransportError::Connect(_))));
}
