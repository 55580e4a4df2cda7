//! # Web API Error Types
//!
//! Error types specific to the HTTP surface and their response conversions,
//! using thiserror for structure and Axum's `IntoResponse` for the HTTP
//! mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::messaging::{MessagingError, RequeueError};
use crate::queue::QueueError;

/// Web API errors with HTTP status code mappings
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found")]
    NotFound,

    #[error("Service temporarily unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// Create a BadRequest error with a custom message
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a ServiceUnavailable error with a custom message
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Queue(QueueError::Full { .. }) => {
                Self::service_unavailable("service unavailable, queue full")
            }
            DispatchError::Queue(other) => Self::service_unavailable(other.to_string()),
            DispatchError::Broker(other) => Self::service_unavailable(other.to_string()),
        }
    }
}

impl From<RequeueError> for ApiError {
    fn from(err: RequeueError) -> Self {
        match &err.source {
            MessagingError::InvalidArgument { .. } => Self::bad_request(err.to_string()),
            MessagingError::QueueNotFound { .. } => Self::NotFound,
            _ => Self::service_unavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OperationType;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::bad_request("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::service_unavailable("x").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_full_queue_maps_to_service_unavailable() {
        let err: ApiError = DispatchError::Queue(QueueError::Full {
            operation: OperationType::Load,
            capacity: 100,
        })
        .into();
        assert!(matches!(err, ApiError::ServiceUnavailable { .. }));
        assert!(err.to_string().contains("queue full"));
    }
}
