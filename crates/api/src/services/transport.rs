//! Outbound HTTP for webhook deliveries.
//!
//! The dispatcher only sees [`WebhookTransport`], so tests can swap the
//! network out for a recording stub.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Upper bound on how much of a subscriber response body is read.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// A signed webhook POST, ready to send.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What the subscriber answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport. Redirects are never followed, so a signed
/// payload only ever reaches the configured URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.post(&request.url).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder.send().await.map_err(classify)?;
        let status = response.status();

        let mut body = Vec::new();
        while body.len() < MAX_RESPONSE_BYTES {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read webhook response body");
                    break;
                }
            }
        }
        body.truncate(MAX_RESPONSE_BYTES);

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = OutboundRequest {
            url: "https://example.com".to_string(),
            headers: vec![("X-EHS-Signature".to_string(), "abc".to_string())],
            body: vec![],
        };
        assert_eq!(request.header("x-ehs-signature"), Some("abc"));
        assert_eq!(request.header("X-EHS-Timestamp"), None);
    }

    #[test]
    fn test_success_range() {
        let response = |status| TransportResponse {
            status,
            status_text: String::new(),
            body: String::new(),
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(301).is_success());
        assert!(!response(500).is_success());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(TransportError::Timeout.to_string(), "Request timed out");
        assert_eq!(
            TransportError::Connect("refused".into()).to_string(),
            "Connection failed: refused"
        );
    }
}
