//! Envelope - the self-routing unit of work.
//!
//! An envelope carries an arbitrary JSON payload through an ordered list of
//! actors. The route's `current` cursor marks the next actor to execute;
//! `current == actors.len()` signals end-of-route. Envelopes are mutated only
//! by handlers, one whole-envelope replacement per hop, and every replacement
//! is checked against the invariants in [`validate`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::EnvelopeId;

pub mod validate;

/// Ordered actor list plus cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub actors: Vec<String>,
    pub current: usize,
}

impl Route {
    pub fn new(actors: Vec<String>) -> Self {
        Self { actors, current: 0 }
    }

    /// Actor the cursor points at, or `None` past the end of the route.
    ///
    /// A cursor at or beyond `actors.len()` means end-of-route; callers route
    /// such envelopes to the happy-end actor. Over-incremented cursors from
    /// legacy handlers are tolerated here rather than rejected.
    pub fn current_actor(&self) -> Option<&str> {
        self.actors.get(self.current).map(String::as_str)
    }

    /// Whether the cursor has reached (or passed) the end of the route.
    pub fn is_exhausted(&self) -> bool {
        self.current >= self.actors.len()
    }

    /// Copy of this route with the cursor advanced by one.
    pub fn advanced(&self) -> Self {
        Self {
            actors: self.actors.clone(),
            current: self.current + 1,
        }
    }
}

/// Wire error kinds surfaced in runtime responses and error-end records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Framing or socket I/O failed against the runtime.
    ConnectionError,
    /// Input envelope malformed at the runtime or transport boundary.
    MsgParsingError,
    /// Handler failed or produced an invariant-violating output envelope.
    ProcessingError,
    /// Per-hop deadline elapsed.
    TimeoutError,
    /// Host memory exhaustion raised by the handler.
    OomError,
    /// GPU memory exhaustion raised by the handler.
    CudaOomError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionError => "connection_error",
            Self::MsgParsingError => "msg_parsing_error",
            Self::ProcessingError => "processing_error",
            Self::TimeoutError => "timeout_error",
            Self::OomError => "oom_error",
            Self::CudaOomError => "cuda_oom_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connection_error" => Some(Self::ConnectionError),
            "msg_parsing_error" => Some(Self::MsgParsingError),
            "processing_error" => Some(Self::ProcessingError),
            "timeout_error" => Some(Self::TimeoutError),
            "oom_error" => Some(Self::OomError),
            "cuda_oom_error" => Some(Self::CudaOomError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure context attached to an [`ErrorRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,

    /// Short failure type name, e.g. `HandlerError` or `io::Error`.
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Error record persisted by the error-end actor alongside the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            type_name: kind.as_str().to_string(),
            traceback: None,
        }
    }

    pub fn with_details(kind: ErrorKind, details: ErrorDetails) -> Self {
        Self {
            kind,
            message: details.message,
            type_name: details.type_name,
            traceback: details.traceback,
        }
    }
}

/// The message traveling through the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Process-wide unique identifier, assigned at creation by the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<EnvelopeId>,

    /// Set on fan-out children; points at the envelope they were spawned from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EnvelopeId>,

    pub route: Route,

    /// Propagated unchanged across hops unless a handler rewrites them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,

    /// Required field; the value itself may be `null`.
    pub payload: Value,

    /// Attached by the sidecar before publishing to the error-end actor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl Envelope {
    /// New envelope at the head of a route, with a fresh id.
    pub fn new(actors: Vec<String>, payload: Value) -> Self {
        Self {
            id: Some(EnvelopeId::new()),
            parent_id: None,
            route: Route::new(actors),
            headers: None,
            payload,
            error: None,
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Fan-out child: fresh id, lineage recorded through `parent_id`.
    pub fn child(&self, payload: Value, route: Route) -> Self {
        Self {
            id: Some(EnvelopeId::new()),
            parent_id: self.id.clone(),
            route,
            headers: self.headers.clone(),
            payload,
            error: None,
        }
    }

    /// Copy annotated with an error record, original fields preserved verbatim.
    pub fn with_error(&self, error: ErrorRecord) -> Self {
        let mut out = self.clone();
        out.error = Some(error);
        out
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(actors: &[&str], current: usize) -> Envelope {
        let mut e = Envelope::new(actors.iter().map(|s| s.to_string()).collect(), json!({"k": 1}));
        e.route.current = current;
        e
    }

    #[test]
    fn current_actor_none_past_end() {
        let e = envelope(&["a", "b"], 2);
        assert_eq!(e.route.current_actor(), None);
        assert!(e.route.is_exhausted());
    }

    #[test]
    fn advanced_preserves_actors() {
        let e = envelope(&["a", "b"], 0);
        let next = e.route.advanced();
        assert_eq!(next.current, 1);
        assert_eq!(next.actors, e.route.actors);
    }

    #[test]
    fn child_records_lineage() {
        let parent = envelope(&["fanout"], 0);
        let child = parent.child(json!({"index": 0}), parent.route.advanced());
        assert_eq!(child.parent_id, parent.id);
        assert_ne!(child.id, parent.id);
        assert_eq!(child.headers, parent.headers);
    }

    #[test]
    fn sibling_children_get_distinct_ids() {
        let parent = envelope(&["fanout"], 0);
        let ids: std::collections::HashSet<EnvelopeId> = (0..3)
            .map(|i| {
                parent
                    .child(json!({"index": i}), parent.route.advanced())
                    .id
                    .unwrap()
            })
            .collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn with_error_preserves_fields() {
        let e = envelope(&["a"], 0);
        let annotated = e.with_error(ErrorRecord::new(ErrorKind::ProcessingError, "boom"));
        assert_eq!(annotated.payload, e.payload);
        assert_eq!(annotated.route, e.route);
        assert_eq!(annotated.id, e.id);
        assert_eq!(annotated.error.as_ref().map(|r| r.kind), Some(ErrorKind::ProcessingError));
    }

    #[test]
    fn serde_round_trip_skips_absent_fields() {
        let e = envelope(&["a"], 0);
        let value = serde_json::to_value(&e).unwrap();
        assert!(value.get("parent_id").is_none());
        assert!(value.get("headers").is_none());
        assert!(value.get("error").is_none());
        let back = Envelope::from_json(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn error_kind_strings_round_trip() {
        for kind in [
            ErrorKind::ConnectionError,
            ErrorKind::MsgParsingError,
            ErrorKind::ProcessingError,
            ErrorKind::TimeoutError,
            ErrorKind::OomError,
            ErrorKind::CudaOomError,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("weird_error"), None);
    }
}
