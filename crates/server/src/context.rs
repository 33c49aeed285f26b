//! Request context middleware: trace id and acting operator.
//!
//! Authorization happens upstream; this layer only records who is acting so
//! audit events can name them.

use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the caller's correlation id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Header naming the operator on whose behalf the request runs.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Maximum length for trace IDs.
const MAX_TRACE_ID_LEN: usize = 128;

/// Maximum length for actor IDs; they are stored in every audit event.
const MAX_ACTOR_ID_LEN: usize = 128;

/// Keep printable ASCII only, bounded by character count.
fn sanitize(value: &str, max_len: usize) -> String {
    value
        .chars()
        .take(max_len)
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Sanitized client-provided value, or a fresh id if nothing usable remains.
    pub fn from_client(value: &str) -> Self {
        let sanitized = sanitize(value, MAX_TRACE_ID_LEN);
        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operator identity from `x-actor-id`. Absent means `system`.
#[derive(Clone, Debug, Default)]
pub struct ActorId(pub Option<String>);

impl ActorId {
    pub fn from_client(value: &str) -> Self {
        let sanitized = sanitize(value, MAX_ACTOR_ID_LEN);
        if sanitized.is_empty() {
            Self(None)
        } else {
            Self(Some(sanitized))
        }
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

fn header_value<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Attach [`TraceId`] and [`ActorId`] to the request and run it inside a
/// `request` span.
pub async fn request_context_middleware(
    State(_state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace_id = header_value(&req, TRACE_ID_HEADER)
        .map(TraceId::from_client)
        .unwrap_or_default();
    let actor_id = header_value(&req, ACTOR_ID_HEADER)
        .map(ActorId::from_client)
        .unwrap_or_default();

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        actor = actor_id.as_deref().unwrap_or("system"),
    );

    req.extensions_mut().insert(trace_id);
    req.extensions_mut().insert(actor_id);

    next.run(req).instrument(span).await
}

/// Get the actor from request extensions.
pub fn get_actor(req: &Request) -> Option<&str> {
    req.extensions().get::<ActorId>().and_then(ActorId::as_deref)
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_sanitized() {
        let id = TraceId::from_client("abc\n\u{7}def");
        assert_eq!(id.as_str(), "abcdef");

        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);

        // Nothing printable left: a generated id is used instead.
        let generated = TraceId::from_client("\u{1}\u{2}");
        assert!(Uuid::parse_str(generated.as_str()).is_ok());
    }

    #[test]
    fn test_actor_id_blank_means_system() {
        assert_eq!(ActorId::from_client("  ").as_deref(), None);
        assert_eq!(ActorId::from_client("ops@example").as_deref(), Some("ops@example"));
    }
}
