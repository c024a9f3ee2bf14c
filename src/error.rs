//! # Error Handling
//!
//! Unified problem+json error responses for the publisher API, with trace ID propagation and
//! mappings from the domain error types of each layer.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::handshake::HandshakeError;
use crate::pipeline::PipelineError;
use crate::providers::{AdapterError, ProviderKind, RegistryError};
use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the active tracing span (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                // Fallback: generate a correlation ID for basic client-server log correlation
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_UNIQUE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code = code.as_ref();
        code == PG_UNIQUE || SQLITE_UNIQUE_CODES.contains(&code)
    })
}

/// Upstream provider failure details
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderError {
    /// Provider identifier (e.g., "webflow", "shopify")
    pub provider: String,
    /// Classified failure reason
    pub reason: String,
    /// Classified message; provider bodies inside it are already truncated
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        // Add Retry-After header if present
        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        // Log the full error for debugging
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "An internal error occurred",
        )
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "conflict", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "not_found",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Query(query_err) => {
                tracing::error!("Database query error: {:?}", query_err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Database error occurred",
                )
            }
            sea_orm::DbErr::Exec(exec_err) => {
                tracing::error!("Database execution error: {:?}", exec_err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Database error occurred",
                )
            }
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Maps a classified adapter failure onto an HTTP error with provider details.
pub fn provider_error(provider: ProviderKind, error: &AdapterError) -> ApiError {
    let (status, message) = match error {
        AdapterError::ProviderRejected { .. } | AdapterError::MalformedResponse { .. } => {
            (StatusCode::BAD_GATEWAY, format!("{provider} rejected the request"))
        }
        AdapterError::Unauthorized { .. } => (
            StatusCode::BAD_GATEWAY,
            format!("{provider} no longer accepts the stored credentials; reconnect the account"),
        ),
        AdapterError::RateLimited { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            format!("{provider} is rate limiting requests"),
        ),
        AdapterError::Transient { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{provider} is temporarily unavailable"),
        ),
        AdapterError::Configuration { message } => (StatusCode::BAD_REQUEST, message.clone()),
        AdapterError::Unsupported { operation } => (
            StatusCode::BAD_REQUEST,
            format!("{provider} does not support {operation}"),
        ),
    };
    let code = match error {
        AdapterError::Transient { .. } => "provider_unavailable",
        other => other.reason_code(),
    };

    let details = ProviderError {
        provider: provider.to_string(),
        reason: error.reason_code().to_string(),
        message: error.to_string(),
    };
    let api_error = ApiError::new(status, code, &message).with_details(json!(details));
    match error {
        AdapterError::RateLimited {
            retry_after_secs: Some(secs),
        } => api_error.with_retry_after(*secs),
        _ => api_error,
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    let mut error = ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", msg);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation_failed", message).with_details(field_errors)
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        validation_error(
            "Request body is not valid JSON for this endpoint",
            json!({ "body": rejection.body_text() }),
        )
    }
}

impl From<RegistryError> for ApiError {
    fn from(error: RegistryError) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "provider_not_configured",
            &error.to_string(),
        )
    }
}

impl From<HandshakeError> for ApiError {
    fn from(error: HandshakeError) -> Self {
        let status = match &error {
            HandshakeError::InvalidState
            | HandshakeError::ExpiredState
            | HandshakeError::MissingCode
            | HandshakeError::InvalidRedirectUri(_)
            | HandshakeError::InvalidAuthorizationUrl(_)
            | HandshakeError::Configuration(_)
            | HandshakeError::ProviderNotConfigured(_) => StatusCode::BAD_REQUEST,
            HandshakeError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
            HandshakeError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HandshakeError::Storage(inner) => {
                tracing::error!(error = ?inner, "Handshake storage failure");
                return Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred",
                );
            }
        };
        Self::new(status, error.reason_code(), &error.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            // Foreign jobs are indistinguishable from missing ones
            PipelineError::JobNotFound(_) | PipelineError::NotOwner => {
                Self::new(StatusCode::NOT_FOUND, "not_found", "Job not found")
            }
            PipelineError::NotRetryable(status) => Self::new(
                StatusCode::CONFLICT,
                "not_retryable",
                &format!("Job in status '{status}' cannot be retried"),
            ),
            PipelineError::Storage(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "validation_failed",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("validation_failed"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "bad_request", "Test error message")
            .with_details(json!({"field": "value"}));

        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
    }

    #[test]
    fn test_from_anyhow() {
        let api_error: ApiError = anyhow::anyhow!("Something went wrong").into();

        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.code, Box::from("internal_error"));
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_content_type_header() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "validation_failed", "Test error");
        let response = error.into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_retry_after_header() {
        let error = ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Rate limit exceeded",
        )
        .with_retry_after(60);

        let response = error.into_response();
        assert_eq!(response.headers().get("retry-after").unwrap(), "60");
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Test");

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[tokio::test]
    async fn test_trace_id_from_task_context() {
        let context = telemetry::TraceContext {
            trace_id: "trace-abc".to_string(),
        };
        let error = telemetry::with_trace_context(context, async {
            ApiError::new(StatusCode::BAD_REQUEST, "validation_failed", "Test")
        })
        .await;

        assert_eq!(error.trace_id.as_deref(), Some("trace-abc"));
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("test_record".to_string()).into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert_eq!(api_error.code, Box::from("not_found"));
        assert!(api_error.message.contains("test_record"));
    }

    #[test]
    fn test_provider_error_mapping() {
        let rejected = provider_error(
            ProviderKind::Shopify,
            &AdapterError::rejected("shopify returned 422: handle taken"),
        );
        assert_eq!(rejected.status, StatusCode::BAD_GATEWAY);
        assert_eq!(rejected.code, Box::from("provider_rejected"));
        let details = rejected.details.unwrap();
        assert_eq!(details["provider"], "shopify");
        assert_eq!(details["reason"], "provider_rejected");

        let unavailable = provider_error(
            ProviderKind::Webflow,
            &AdapterError::Transient {
                message: "timeout".to_string(),
            },
        );
        assert_eq!(unavailable.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.code, Box::from("provider_unavailable"));

        let limited = provider_error(
            ProviderKind::Webflow,
            &AdapterError::RateLimited {
                retry_after_secs: Some(30),
            },
        );
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.retry_after, Some(30));

        let unauthorized = provider_error(
            ProviderKind::Ghost,
            &AdapterError::Unauthorized {
                message: "ghost returned 401".to_string(),
            },
        );
        assert_eq!(unauthorized.code, Box::from("reconnect_required"));
    }

    #[test]
    fn test_handshake_error_mapping() {
        let cases = [
            (HandshakeError::InvalidState, StatusCode::BAD_REQUEST, "invalid_state"),
            (HandshakeError::ExpiredState, StatusCode::BAD_REQUEST, "expired_state"),
            (
                HandshakeError::ProviderRejected("bad code".to_string()),
                StatusCode::BAD_GATEWAY,
                "provider_rejected",
            ),
            (
                HandshakeError::ProviderUnavailable("timeout".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
                "provider_unavailable",
            ),
        ];

        for (error, status, code) in cases {
            let api_error: ApiError = error.into();
            assert_eq!(api_error.status, status);
            assert_eq!(api_error.code.as_ref(), code);
        }
    }

    #[test]
    fn test_pipeline_error_hides_foreign_jobs() {
        let missing: ApiError = PipelineError::JobNotFound(uuid::Uuid::new_v4()).into();
        let foreign: ApiError = PipelineError::NotOwner.into();

        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(foreign.status, StatusCode::NOT_FOUND);
        assert_eq!(missing.message, foreign.message);
    }

    #[test]
    fn test_auth_error_helpers() {
        let auth_error = unauthorized(None);
        assert_eq!(auth_error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(auth_error.message, Box::from("Authentication required"));

        let validation = validation_error("Validation failed", json!({"jobId": "required"}));
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);
        assert_eq!(validation.details, Some(Box::new(json!({"jobId": "required"}))));
    }
}
