//! Shared API types
//!
//! Error responses share one JSON shape: `{"error", "code", "message"}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::data::topics::TopicError;
use crate::domain::debug::DebugError;
use crate::domain::query::QueryError;

/// Body of every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: &'static str,
    pub code: String,
    pub message: String,
}

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    NotFound { code: String, message: String },
    ServiceUnavailable { message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::MissingParameter(_) => Self::bad_request("MISSING_PARAMETER", e.to_string()),
            QueryError::Parameter { .. } => Self::bad_request("INVALID_PARAMETER", e.to_string()),
            QueryError::MetricQueryDisabled => Self::service_unavailable(e.to_string()),
            QueryError::Storage(_) | QueryError::MetricQuery(_) => {
                tracing::error!(error = %e, "Trace query failed");
                Self::internal("Trace query failed")
            }
        }
    }
}

impl From<DebugError> for ApiError {
    fn from(e: DebugError) -> Self {
        match e {
            DebugError::MissingParameter(_) => Self::bad_request("MISSING_PARAMETER", e.to_string()),
            DebugError::InvalidParameter { .. } => {
                Self::bad_request("INVALID_PARAMETER", e.to_string())
            }
            DebugError::NotFound { .. } => Self::not_found("DEBUG_REQUEST_NOT_FOUND", e.to_string()),
            DebugError::Database(_) | DebugError::Serialization(_) | DebugError::Client(_) => {
                tracing::error!(error = %e, "Debug request operation failed");
                Self::internal("Debug request operation failed")
            }
        }
    }
}

impl From<TopicError> for ApiError {
    fn from(e: TopicError) -> Self {
        tracing::error!(error = %e, "Topic operation failed");
        Self::service_unavailable("Message bus unavailable")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code, message) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message)
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, "not_found", code, message),
            Self::ServiceUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "SERVICE_UNAVAILABLE".to_string(),
                message,
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "INTERNAL".to_string(),
                message,
            ),
        };
        (
            status,
            Json(ErrorBody {
                error,
                code,
                message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sqlite::SqliteError;

    fn status_of(e: impl Into<ApiError>) -> StatusCode {
        e.into().into_response().status()
    }

    #[test]
    fn test_query_errors_map_to_status() {
        assert_eq!(
            status_of(QueryError::MissingParameter("scope_id")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(QueryError::parameter("duration", "missing min or max duration")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(QueryError::MetricQueryDisabled),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(QueryError::MetricQuery("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_debug_errors_map_to_status() {
        assert_eq!(
            status_of(DebugError::not_found("s", "r")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DebugError::invalid("url", "bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DebugError::Database(SqliteError::Conflict("dup".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_topic_error_is_unavailable() {
        assert_eq!(
            status_of(TopicError::ChannelClosed),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
