//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use custodian_metadata::MetadataError;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// When a rate-limited job may run again (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_allowed_at: Option<String>,
    /// Valid destination states for a rejected transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    /// Database error code behind a failed audit write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_code: Option<String>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("required schema object missing: {0}")]
    SchemaMissing(String),

    #[error("job {job_id} is rate limited until {next_allowed_at}")]
    RateLimited {
        job_id: String,
        next_allowed_at: OffsetDateTime,
    },

    #[error("cannot verify rate limit: {0}")]
    RateLimitUnverifiable(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("audit write failed: {message}")]
    AuditWriteFailed {
        code: Option<String>,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Validation(_) => "validation_error",
            Self::SchemaMissing(_) => "schema_missing",
            Self::RateLimited { .. } => "rate_limited",
            Self::RateLimitUnverifiable(_) => "rate_limit_unverifiable",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotAllowed(_) => "not_allowed",
            Self::AuditWriteFailed { .. } => "audit_write_failed",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::SchemaMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RateLimitUnverifiable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidTransition { .. } | Self::NotAllowed(_) | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::AuditWriteFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MetadataError> for ApiError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(msg) => Self::NotFound(msg),
            MetadataError::AlreadyExists(msg) => Self::Conflict(msg),
            MetadataError::InvalidStateTransition { from, to, allowed } => {
                Self::InvalidTransition { from, to, allowed }
            }
            MetadataError::NotAllowed(msg) => Self::NotAllowed(msg),
            MetadataError::AuditWrite { code, message } => {
                Self::AuditWriteFailed { code, message }
            }
            other => {
                // Database details stay in the log, not in the response.
                tracing::error!(error = %other, "Record store operation failed");
                Self::Internal("record store operation failed".to_string())
            }
        }
    }
}

impl From<custodian_core::Error> for ApiError {
    fn from(err: custodian_core::Error) -> Self {
        use custodian_core::Error as CoreError;
        match err {
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::InvalidTransition { from, to, allowed } => {
                Self::InvalidTransition { from, to, allowed }
            }
            CoreError::NotAllowed(msg) => Self::NotAllowed(msg),
            other @ CoreError::UnknownVariant { .. } => Self::Validation(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            next_allowed_at: None,
            allowed: None,
            db_code: None,
        };
        match self {
            Self::RateLimited {
                next_allowed_at, ..
            } => body.next_allowed_at = next_allowed_at.format(&Rfc3339).ok(),
            Self::InvalidTransition { allowed, .. } => body.allowed = Some(allowed),
            Self::AuditWriteFailed { code, .. } => body.db_code = code,
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
