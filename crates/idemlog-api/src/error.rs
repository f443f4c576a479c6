//! idemlog — API error types.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use idemlog_core::error::IngestError;
use serde::Serialize;
use thiserror::Error;

/// Seconds a producer is told to wait after `QueueFull`.
const QUEUE_FULL_RETRY_AFTER_SECS: u64 = 1;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The dedup store or intake queue could not be set up.
    #[error("ingestion setup error: {0}")]
    Ingest(#[from] IngestError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
    /// Events of a multi-event request already queued before the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<usize>,
}

/// HTTP-layer wrapper around `IngestError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub IngestError);

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_response_with_queued(None)
    }
}

impl ApiError {
    /// Renders the error, reporting how many events of the request were
    /// queued before it occurred.
    #[must_use]
    pub fn into_response_with_queued(self, queued: Option<usize>) -> Response {
        let (status, error_code) = match &self.0 {
            IngestError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            IngestError::QueueFull { .. } => (StatusCode::SERVICE_UNAVAILABLE, "queue_full"),
            IngestError::QueueClosed => (StatusCode::SERVICE_UNAVAILABLE, "queue_closed"),
            IngestError::StoreUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable")
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
            queued,
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self.0, IngestError::QueueFull { .. }) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(QUEUE_FULL_RETRY_AFTER_SECS),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn status_of(err: IngestError) -> StatusCode {
        let response = ApiError(err).into_response();
        response.status()
    }

    #[test]
    fn test_validation_maps_to_400() {
        assert_eq!(
            status_of(IngestError::Validation("bad input".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_queue_full_maps_to_503_with_retry_after() {
        let response = ApiError(IngestError::QueueFull { capacity: 1 }).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from(QUEUE_FULL_RETRY_AFTER_SECS)
        );
    }

    #[test]
    fn test_queue_closed_maps_to_503() {
        assert_eq!(
            status_of(IngestError::QueueClosed),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_unavailable_maps_to_500() {
        assert_eq!(
            status_of(IngestError::StoreUnavailable("disk I/O error".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_omits_queued_unless_given() {
        let plain = serde_json::to_value(ErrorBody {
            error: "queue_full",
            message: "full".into(),
            queued: None,
        })
        .unwrap();
        let partial = serde_json::to_value(ErrorBody {
            error: "queue_full",
            message: "full".into(),
            queued: Some(3),
        })
        .unwrap();

        assert!(plain.get("queued").is_none());
        assert_eq!(partial["queued"], 3);
    }
}
