//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::extract::Request;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Maximum request body size for admin endpoints (1 MiB).
pub const MAX_ADMIN_BODY_SIZE: usize = 1024 * 1024;

/// Read and decode a JSON body. An empty body decodes as `{}`.
pub async fn read_json_body<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_ADMIN_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &bytes
    };
    serde_json::from_slice(bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

pub fn parse_uuid(value: &str, field: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| ApiError::BadRequest(format!("invalid {field}: {e}")))
}

pub fn format_timestamp(t: OffsetDateTime) -> ApiResult<String> {
    t.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
}

pub fn format_optional(t: Option<OffsetDateTime>) -> ApiResult<Option<String>> {
    t.map(format_timestamp).transpose()
}
