//! Runtime response classification.
//!
//! The runtime always answers with a JSON array: empty (abort routing), a
//! list of output envelopes (continue or fan out), or a one-element error
//! array. Anything else is a broken contract and classifies as a processing
//! error.

use serde_json::Value;

use crate::envelope::{ErrorKind, ErrorRecord};

/// What the sidecar should do with a runtime response.
#[derive(Debug, PartialEq)]
pub enum Classification {
    /// Empty array: deliver the original envelope to happy-end.
    AbortToHappyEnd,
    /// Output envelopes to route to their next hops.
    Outputs(Vec<Value>),
    /// Recognized error element: annotate the original and route to error-end.
    Error(ErrorRecord),
}

/// Classify a framed runtime response body.
pub fn classify_response(body: &[u8]) -> Classification {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            return Classification::Error(ErrorRecord::new(
                ErrorKind::ProcessingError,
                format!("runtime response is not valid JSON: {}", e),
            ))
        }
    };

    let Value::Array(items) = value else {
        return Classification::Error(ErrorRecord::new(
            ErrorKind::ProcessingError,
            "runtime response is not a JSON array",
        ));
    };

    if items.is_empty() {
        return Classification::AbortToHappyEnd;
    }

    if items.len() == 1 {
        if let Some(record) = parse_error_element(&items[0]) {
            return Classification::Error(record);
        }
    }

    Classification::Outputs(items)
}

/// Parse `{ "error": kind, "details": {...} }`. Unrecognized kinds still
/// classify as errors (processing) so a newer runtime cannot smuggle a
/// failure past an older sidecar.
fn parse_error_element(item: &Value) -> Option<ErrorRecord> {
    let kind_str = item.get("error")?.as_str()?;
    let details = item.get("details");
    let message = details
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let type_name = details
        .and_then(|d| d.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let traceback = details
        .and_then(|d| d.get("traceback"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let record = match ErrorKind::parse(kind_str) {
        Some(kind) => ErrorRecord {
            kind,
            message,
            type_name,
            traceback,
        },
        None => ErrorRecord {
            kind: ErrorKind::ProcessingError,
            message: format!("unrecognized error kind '{}': {}", kind_str, message),
            type_name,
            traceback,
        },
    };
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_array_aborts_to_happy_end() {
        assert_eq!(classify_response(b"[]"), Classification::AbortToHappyEnd);
    }

    #[test]
    fn outputs_pass_through() {
        let body = serde_json::to_vec(&json!([
            {"payload": {"v": 1}, "route": {"actors": ["a"], "current": 1}},
            {"payload": {"v": 2}, "route": {"actors": ["a"], "current": 1}},
        ]))
        .unwrap();
        match classify_response(&body) {
            Classification::Outputs(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn recognized_error_kind_classifies_as_error() {
        let body = serde_json::to_vec(&json!([
            {"error": "processing_error", "details": {"message": "boom", "type": "ValueError"}}
        ]))
        .unwrap();
        match classify_response(&body) {
            Classification::Error(record) => {
                assert_eq!(record.kind, ErrorKind::ProcessingError);
                assert_eq!(record.message, "boom");
                assert_eq!(record.type_name, "ValueError");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn unrecognized_error_kind_downgrades_to_processing() {
        let body = serde_json::to_vec(&json!([
            {"error": "quantum_error", "details": {"message": "??"}}
        ]))
        .unwrap();
        match classify_response(&body) {
            Classification::Error(record) => {
                assert_eq!(record.kind, ErrorKind::ProcessingError);
                assert!(record.message.contains("quantum_error"));
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn single_non_error_output_is_an_output() {
        let body = serde_json::to_vec(&json!([
            {"payload": {}, "route": {"actors": ["a"], "current": 1}}
        ]))
        .unwrap();
        assert!(matches!(classify_response(&body), Classification::Outputs(_)));
    }

    #[test]
    fn garbage_is_a_processing_error() {
        assert!(matches!(
            classify_response(b"not json"),
            Classification::Error(_)
        ));
        assert!(matches!(
            classify_response(b"{\"an\": \"object\"}"),
            Classification::Error(_)
        ));
    }
}
