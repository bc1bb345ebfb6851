//! Sample handlers.
//!
//! These back the demo deployments and the integration suites: each mirrors a
//! pipeline shape the sidecar has to handle (pass-through, chained math,
//! fan-out, failure, empty response, slow handler, stateful instance), plus
//! envelope-mode variants that manage their own routes.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::handler::{FnHandler, Handler, HandlerError, HandlerOutput, HandlerRegistry};
use crate::types::Result;

/// Echo the payload back under an `echoed` key.
fn echo(input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    let message = input.get("message").cloned().unwrap_or(Value::Null);
    Ok(json!({ "echoed": message }).into())
}

fn doubler(input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    let value = number_field(&input, "value")?;
    Ok(json!({ "value": value * 2, "operation": "doubled" }).into())
}

fn incrementer(input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    let value = number_field(&input, "value")?;
    Ok(json!({ "value": value + 5, "operation": "incremented" }).into())
}

/// Spawn `count` continuations differing only in `index`.
fn fanout(input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    let count = input.get("count").and_then(Value::as_u64).unwrap_or(0);
    let outputs: Vec<Value> = (0..count)
        .map(|index| json!({ "index": index }))
        .collect();
    Ok(outputs.into())
}

/// Fail on demand; used to exercise the error-end path.
fn error(input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    if input.get("should_fail").and_then(Value::as_bool).unwrap_or(false) {
        return Err(HandlerError::processing("intentional failure requested by payload"));
    }
    Ok(input.into())
}

/// Abort routing: the sidecar delivers the original envelope to happy-end.
fn empty(_input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    Ok(HandlerOutput::Empty)
}

/// Raise host-memory exhaustion; recoverable at the orchestration layer.
fn oom(input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    let requested = input.get("size_gb").and_then(Value::as_u64).unwrap_or(128);
    Err(HandlerError::oom(format!(
        "allocation of {} GiB exceeded available memory",
        requested
    )))
}

/// Raise GPU-memory exhaustion.
fn cuda_oom(_input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    Err(HandlerError::cuda_oom("CUDA out of memory while loading weights"))
}

/// Return deeply nested data; exercises payload fidelity across hops.
fn nested_data(input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    Ok(json!({
        "nested": { "level1": { "level2": { "original": input } } },
        "list": [1, [2, [3, [4]]]],
    })
    .into())
}

/// Preserve explicit nulls; a lossy reserialization would drop them.
fn null_values(input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    Ok(json!({
        "explicit_null": Value::Null,
        "had_value": input.get("value").cloned().unwrap_or(Value::Null),
    })
    .into())
}

/// Stateful generator of large responses; `size_mb` of filler per request.
struct LargePayload {
    request_count: u64,
}

#[async_trait]
impl Handler for LargePayload {
    async fn process(&mut self, input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
        self.request_count += 1;
        let size_mb = input.get("size_mb").and_then(Value::as_u64).unwrap_or(10);
        let data = "X".repeat((size_mb as usize) * 1024 * 1024);
        Ok(json!({
            "size": data.len(),
            "data": data,
            "request_count": self.request_count,
        })
        .into())
    }
}

/// Sleep for `sleep` seconds; used to exercise the per-hop deadline.
struct Sleeper;

#[async_trait]
impl Handler for Sleeper {
    async fn process(&mut self, input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
        let secs = input.get("sleep").and_then(Value::as_f64).unwrap_or(0.0).max(0.0);
        tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
        Ok(json!({ "slept": secs }).into())
    }
}

/// Stateful instance handler: one instance for the process lifetime.
struct Counter {
    count: u64,
    requests: Vec<String>,
}

#[async_trait]
impl Handler for Counter {
    async fn process(&mut self, input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
        let request_id = input
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        self.requests.push(request_id.clone());
        self.count += 1;
        Ok(json!({
            "request_id": request_id,
            "count": self.count,
            "total_requests": self.requests.len(),
        })
        .into())
    }
}

fn number_field(input: &Value, key: &str) -> std::result::Result<i64, HandlerError> {
    input
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| HandlerError::processing(format!("payload field '{}' must be an integer", key)))
}

// =============================================================================
// Envelope-mode samples
// =============================================================================

/// Lift a payload handler into envelope mode: extract the payload, call the
/// inner function, rebuild the envelope with the cursor advanced and the
/// input headers carried over.
fn wrap_payload(
    inner: fn(Value) -> std::result::Result<HandlerOutput, HandlerError>,
) -> impl FnMut(Value) -> std::result::Result<HandlerOutput, HandlerError> {
    move |envelope: Value| {
        let payload = envelope.get("payload").cloned().unwrap_or(Value::Null);
        let route = envelope.get("route").cloned().unwrap_or(Value::Null);
        let current = route.get("current").and_then(Value::as_u64).unwrap_or(0);
        let mut output_route = route;
        output_route["current"] = json!(current + 1);

        let rebuild = |p: Value| {
            let mut out = json!({ "payload": p, "route": output_route.clone() });
            if let Some(headers) = envelope.get("headers") {
                out["headers"] = headers.clone();
            }
            out
        };

        Ok(match inner(payload)? {
            HandlerOutput::Empty => HandlerOutput::Empty,
            HandlerOutput::One(p) => HandlerOutput::One(rebuild(p)),
            HandlerOutput::Many(ps) => {
                HandlerOutput::Many(ps.into_iter().map(rebuild).collect())
            }
        })
    }
}

/// Advance the route but omit headers entirely; the runtime is expected to
/// copy the input's headers onto the output.
fn headerless_echo(envelope: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    let route = envelope.get("route").cloned().unwrap_or(Value::Null);
    let current = route.get("current").and_then(Value::as_u64).unwrap_or(0);
    let mut output_route = route;
    output_route["current"] = json!(current + 1);
    Ok(json!({
        "payload": envelope.get("payload").cloned().unwrap_or(Value::Null),
        "route": output_route,
    })
    .into())
}

/// Route by payload content: appends the actor named in `next` to the route
/// before advancing. Extending the unprocessed tail is legal; the processed
/// prefix stays intact.
fn conditional_router(envelope: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    let payload = envelope.get("payload").cloned().unwrap_or(Value::Null);
    let route = envelope.get("route").cloned().unwrap_or(Value::Null);
    let current = route.get("current").and_then(Value::as_u64).unwrap_or(0);

    let mut output_route = route;
    if let Some(next) = payload.get("next").and_then(Value::as_str) {
        if let Some(actors) = output_route.get_mut("actors").and_then(Value::as_array_mut) {
            actors.push(json!(next));
        }
    }
    output_route["current"] = json!(current + 1);

    let mut out = json!({ "payload": payload, "route": output_route });
    if let Some(headers) = envelope.get("headers") {
        out["headers"] = headers.clone();
    }
    Ok(out.into())
}

/// Set the cursor far past the end of the route. Only runs under a
/// validation-off runtime; the sidecar routes the result to happy-end.
fn overshoot_cursor(envelope: Value) -> std::result::Result<HandlerOutput, HandlerError> {
    let route = envelope.get("route").cloned().unwrap_or(Value::Null);
    let len = route
        .get("actors")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0) as u64;
    let mut output_route = route;
    output_route["current"] = json!(len + 5);
    let mut out = json!({
        "payload": envelope.get("payload").cloned().unwrap_or(Value::Null),
        "route": output_route,
    });
    if let Some(headers) = envelope.get("headers") {
        out["headers"] = headers.clone();
    }
    Ok(out.into())
}

/// Register every sample under its `handlers.*` descriptor.
pub fn register_samples(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register("handlers.echo", || Box::new(FnHandler(echo)))?;
    registry.register("handlers.doubler", || Box::new(FnHandler(doubler)))?;
    registry.register("handlers.incrementer", || Box::new(FnHandler(incrementer)))?;
    registry.register("handlers.fanout", || Box::new(FnHandler(fanout)))?;
    registry.register("handlers.error", || Box::new(FnHandler(error)))?;
    registry.register("handlers.empty", || Box::new(FnHandler(empty)))?;
    registry.register("handlers.oom", || Box::new(FnHandler(oom)))?;
    registry.register("handlers.cuda_oom", || Box::new(FnHandler(cuda_oom)))?;
    registry.register("handlers.nested_data", || Box::new(FnHandler(nested_data)))?;
    registry.register("handlers.null_values", || Box::new(FnHandler(null_values)))?;
    registry.register("handlers.sleeper", || Box::new(Sleeper))?;
    registry.register("handlers.Counter.process", || {
        Box::new(Counter {
            count: 0,
            requests: Vec::new(),
        })
    })?;
    registry.register("handlers.LargePayload.process", || {
        Box::new(LargePayload { request_count: 0 })
    })?;

    // Envelope-mode variants
    registry.register("envelope_handlers.echo", || {
        Box::new(FnHandler(wrap_payload(echo)))
    })?;
    registry.register("envelope_handlers.doubler", || {
        Box::new(FnHandler(wrap_payload(doubler)))
    })?;
    registry.register("envelope_handlers.fanout", || {
        Box::new(FnHandler(wrap_payload(fanout)))
    })?;
    registry.register("envelope_handlers.headerless_echo", || {
        Box::new(FnHandler(headerless_echo))
    })?;
    registry.register("envelope_handlers.conditional_router", || {
        Box::new(FnHandler(conditional_router))
    })?;
    registry.register("envelope_handlers.overshoot_cursor", || {
        Box::new(FnHandler(overshoot_cursor))
    })?;
    Ok(())
}
