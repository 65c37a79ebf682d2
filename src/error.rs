use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Element not found")]
    ElementNotFound,

    #[error("Not found")]
    RouteNotFound,

    #[error("Request was throttled")]
    Throttled { retry_after: u64 },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::ElementNotFound,
            StoreError::Sqlite(e) => ApiError::StoreUnavailable(e.to_string()),
            StoreError::Poisoned => ApiError::StoreUnavailable("store lock poisoned".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// JSON body of every error response. Carries no internal detail.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
            retry_after: None,
        }
    }

    pub fn from_api_error(err: &ApiError) -> (StatusCode, Self) {
        match err {
            ApiError::ElementNotFound => (StatusCode::NOT_FOUND, Self::new("Element not found")),
            ApiError::RouteNotFound => (StatusCode::NOT_FOUND, Self::new("Not found")),
            ApiError::Throttled { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                Self {
                    error: "Request was throttled".to_string(),
                    retry_after: Some(*retry_after),
                },
            ),
            ApiError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, Self::new("Service unavailable"))
            }
            ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Self::new("Internal server error"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = ErrorResponse::from_api_error(&self);

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let mut resp = (status, Json(body)).into_response();
        if let ApiError::Throttled { retry_after } = self {
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_body_has_only_error_key() {
        let (status, body) = ErrorResponse::from_api_error(&ApiError::ElementNotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            serde_json::json!({"error": "Element not found"})
        );
    }

    #[test]
    fn test_internal_detail_is_not_leaked() {
        let err = ApiError::StoreUnavailable("disk I/O error at /var/db".to_string());
        let (status, body) = ErrorResponse::from_api_error(&err);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.error.contains("/var/db"));
    }

    #[test]
    fn test_throttled_sets_retry_after() {
        let resp = ApiError::Throttled { retry_after: 42 }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn test_missing_element_maps_to_not_found() {
        let err: ApiError = StoreError::NotFound(119).into();
        assert!(matches!(err, ApiError::ElementNotFound));
    }
}
