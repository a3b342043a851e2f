use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use persistence::StoreError;
use serde::Serialize;
use shared::crypto::CodecError;
use thiserror::Error;

use crate::middleware::gate::GateRejection;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Vec<ValidationDetail>,
    },

    #[error("Invalid webhook URL: {0}")]
    InvalidWebhookUrl(String),

    #[error("Invalid event type: {0}")]
    InvalidEventType(String),

    #[error("Invalid custom headers: {0}")]
    InvalidCustomHeaders(String),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Invalid IP allowlist: {0}")]
    InvalidIpAllowlist(String),

    #[error("Invalid status transition: {0}")]
    InvalidStatusTransition(String),

    #[error("Already delivered: {0}")]
    AlreadyDelivered(String),

    #[error("Delivery in progress: {0}")]
    DeliveryInProgress(String),

    #[error(transparent)]
    Gate(#[from] GateRejection),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationDetail>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationDetail {
    pub field: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::Gate(rejection) => return rejection.into_response(),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            ApiError::Validation { message, details } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                message,
                (!details.is_empty()).then_some(details),
            ),
            ApiError::InvalidWebhookUrl(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_WEBHOOK_URL", msg, None)
            }
            ApiError::InvalidEventType(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_EVENT_TYPE", msg, None)
            }
            ApiError::InvalidCustomHeaders(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_CUSTOM_HEADERS", msg, None)
            }
            ApiError::InvalidScope(msg) => (StatusCode::BAD_REQUEST, "INVALID_SCOPE", msg, None),
            ApiError::InvalidIpAllowlist(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_IP_ALLOWLIST", msg, None)
            }
            ApiError::InvalidStatusTransition(msg) => {
                (StatusCode::CONFLICT, "INVALID_STATUS_TRANSITION", msg, None)
            }
            ApiError::AlreadyDelivered(msg) => {
                (StatusCode::CONFLICT, "ALREADY_DELIVERED", msg, None)
            }
            ApiError::DeliveryInProgress(msg) => {
                (StatusCode::CONFLICT, "DELIVERY_IN_PROGRESS", msg, None)
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg, None)
            }
        };

        let body = ErrorBody {
            error: error_code,
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("Resource not found".into()),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Database(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some("23505") =>
            {
                ApiError::Conflict("Resource already exists".into())
            }
            StoreError::Database(e) => ApiError::Internal(format!("Database error: {}", e)),
        }
    }
}

impl From<CodecError> for ApiError {
    fn from(err: CodecError) -> Self {
        tracing::error!(error = %err, "Secret codec failure");
        ApiError::Internal(format!("Secret codec failure: {}", err))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<ValidationDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| ValidationDetail {
                    field: field.to_string(),
                    message: e
                        .message
                        .clone()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid {}", field)),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));

        let message = if details.len() == 1 {
            details[0].message.clone()
        } else {
            format!("{} validation errors", details.len())
        };

        ApiError::Validation { message, details }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use validator::Validate;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_client_error_codes() {
        let cases = [
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT, "CONFLICT"),
            (ApiError::validation("x"), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (
                ApiError::InvalidWebhookUrl("x".into()),
                StatusCode::BAD_REQUEST,
                "INVALID_WEBHOOK_URL",
            ),
            (
                ApiError::InvalidEventType("x".into()),
                StatusCode::BAD_REQUEST,
                "INVALID_EVENT_TYPE",
            ),
            (
                ApiError::InvalidCustomHeaders("x".into()),
                StatusCode::BAD_REQUEST,
                "INVALID_CUSTOM_HEADERS",
            ),
            (ApiError::InvalidScope("x".into()), StatusCode::BAD_REQUEST, "INVALID_SCOPE"),
            (
                ApiError::InvalidIpAllowlist("x".into()),
                StatusCode::BAD_REQUEST,
                "INVALID_IP_ALLOWLIST",
            ),
            (
                ApiError::InvalidStatusTransition("x".into()),
                StatusCode::CONFLICT,
                "INVALID_STATUS_TRANSITION",
            ),
            (
                ApiError::AlreadyDelivered("x".into()),
                StatusCode::CONFLICT,
                "ALREADY_DELIVERED",
            ),
            (
                ApiError::DeliveryInProgress("x".into()),
                StatusCode::CONFLICT,
                "DELIVERY_IN_PROGRESS",
            ),
        ];

        for (error, status, code) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), status);
            let body = body_json(response).await;
            assert_eq!(body["error"], code);
            assert_eq!(body["message"], "x");
        }
    }

    #[tokio::test]
    async fn test_internal_error_hides_message() {
        let response = ApiError::Internal("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "INTERNAL_ERROR");
        assert_eq!(body["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn test_validation_errors_carry_details() {
        #[derive(Validate)]
        struct Input {
            #[validate(length(min = 1, message = "Name is required"))]
            name: String,
        }

        let errors = Input {
            name: String::new(),
        }
        .validate()
        .unwrap_err();
        let response = ApiError::from(errors).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["message"], "Name is required");
        assert_eq!(body["details"][0]["field"], "name");
    }

    #[test]
    fn test_from_store_error() {
        assert!(matches!(
            ApiError::from(StoreError::NotFound),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(StoreError::Conflict("dup".into())),
            ApiError::Conflict(msg) if msg == "dup"
        ));
        assert!(matches!(
            ApiError::from(StoreError::Database(sqlx::Error::PoolTimedOut)),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn test_from_codec_error_is_internal() {
        let error = ApiError::from(CodecError::EmptyMasterKey);
        assert!(matches!(error, ApiError::Internal(_)));
    }

    #[test]
    fn test_api_error_display() {
        assert_eq!(ApiError::NotFound("Webhook".into()).to_string(), "Not found: Webhook");
        assert_eq!(
            ApiError::validation("bad").to_string(),
            "Validation error: bad"
        );
    }
}
