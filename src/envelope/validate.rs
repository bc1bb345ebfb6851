//! Envelope invariant checks.
//!
//! Validation happens twice per hop: the runtime checks the inbound envelope
//! before invoking the handler, and re-checks every outbound envelope against
//! the inbound route (envelope mode only; payload-mode outputs are
//! synthesized by the runtime and correct by construction).

use serde_json::Value;

use super::{Envelope, Route};
use crate::types::{EnvelopeId, Error, Result};

/// Structurally validate a decoded envelope value.
///
/// Mirrors the wire contract: `payload` and `route` are required,
/// `route.actors` is a non-empty string list, `route.current` defaults to 0
/// when absent and must satisfy `0 <= current <= len(actors)` (equality marks
/// end-of-route). Unknown fields are dropped from the result.
pub fn validate_envelope(value: &Value) -> Result<Envelope> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::validation("envelope must be a JSON object"))?;

    if !obj.contains_key("payload") {
        return Err(Error::validation("missing required field 'payload' in envelope"));
    }

    let route = obj
        .get("route")
        .ok_or_else(|| Error::validation("missing required field 'route' in envelope"))?;
    let route_obj = route
        .as_object()
        .ok_or_else(|| Error::validation("field 'route' must be an object"))?;

    let actors = route_obj
        .get("actors")
        .ok_or_else(|| Error::validation("missing required field 'actors' in route"))?;
    let actors = actors
        .as_array()
        .ok_or_else(|| Error::validation("field 'route.actors' must be a list"))?;
    if actors.is_empty() {
        return Err(Error::validation("field 'route.actors' cannot be empty"));
    }
    let mut actor_names = Vec::with_capacity(actors.len());
    for actor in actors {
        match actor.as_str() {
            Some(name) => actor_names.push(name.to_string()),
            None => return Err(Error::validation("field 'route.actors' must contain strings")),
        }
    }

    // The sidecar may omit `current`; treat that as the head of the route.
    let current = match route_obj.get("current") {
        None => {
            tracing::debug!("field 'route.current' missing, defaulting to 0");
            0
        }
        Some(v) => {
            let raw = v
                .as_i64()
                .ok_or_else(|| Error::validation("field 'route.current' must be an integer"))?;
            if raw < 0 || raw as usize > actor_names.len() {
                return Err(Error::validation(format!(
                    "invalid route.current={}: out of bounds for actors of length {}",
                    raw,
                    actor_names.len()
                )));
            }
            raw as usize
        }
    };

    let headers = match obj.get("headers") {
        None => None,
        Some(Value::Object(map)) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                match v.as_str() {
                    Some(s) => {
                        out.insert(k.clone(), s.to_string());
                    }
                    None => {
                        return Err(Error::validation("field 'headers' must map strings to strings"))
                    }
                }
            }
            Some(out)
        }
        Some(_) => return Err(Error::validation("field 'headers' must be an object")),
    };

    let id = match obj.get("id") {
        None => None,
        Some(Value::String(s)) => {
            Some(EnvelopeId::from_string(s.clone()).map_err(Error::validation)?)
        }
        Some(_) => return Err(Error::validation("field 'id' must be a string")),
    };
    let parent_id = match obj.get("parent_id") {
        None => None,
        Some(Value::String(s)) => {
            Some(EnvelopeId::from_string(s.clone()).map_err(Error::validation)?)
        }
        Some(_) => return Err(Error::validation("field 'parent_id' must be a string")),
    };

    Ok(Envelope {
        id,
        parent_id,
        route: Route {
            actors: actor_names,
            current,
        },
        headers,
        payload: obj.get("payload").cloned().unwrap_or(Value::Null),
        error: None,
    })
}

/// Validate a handler output envelope against the route it was produced from.
///
/// Enforces the processed-prefix rule: positions `0..=input.current` of the
/// output route must equal the input's, the actor at the input position must
/// be unchanged, and the cursor must not move backwards.
pub fn validate_output(
    output: &Value,
    input_route: &Route,
    expected_current_actor: Option<&str>,
) -> Result<Envelope> {
    let envelope = validate_envelope(output)?;

    let prefix_len = (input_route.current + 1).min(input_route.actors.len());
    let processed = &input_route.actors[..prefix_len];
    let output_prefix: &[String] = envelope
        .route
        .actors
        .get(..processed.len())
        .unwrap_or(&envelope.route.actors);

    if output_prefix != processed {
        return Err(Error::validation(format!(
            "route modification error: already-processed actors cannot be erased; \
             input route had {:?} (actors 0-{}), but output route starts with {:?}",
            processed, input_route.current, output_prefix
        )));
    }

    if envelope.route.current < input_route.current {
        return Err(Error::validation(format!(
            "route modification error: route.current moved backwards ({} -> {})",
            input_route.current, envelope.route.current
        )));
    }

    if let Some(expected) = expected_current_actor {
        if let Some(actual) = envelope.route.actors.get(input_route.current) {
            if actual != expected {
                return Err(Error::validation(format!(
                    "route mismatch: input route points to '{}' at position {}, but output \
                     route has '{}' at that position",
                    expected, input_route.current, actual
                )));
            }
        }
    }

    Ok(envelope)
}
