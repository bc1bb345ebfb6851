//! Runtime Unix-socket server.
//!
//! Serves one connection at a time over a bound Unix domain socket: read a
//! framed envelope, invoke the handler, write the framed response array,
//! close. The sidecar serializes its own requests, so there is no
//! per-connection spawning here and exactly one request is ever in flight.
//! That single-threaded contract is what lets handlers keep mutable state
//! without locks.

use futures::FutureExt;
use serde_json::{json, Value};
use std::os::unix::fs::PermissionsExt;
use std::panic::AssertUnwindSafe;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use crate::envelope::{validate, ErrorDetails, ErrorKind, Route};
use crate::ipc::codec::{read_frame, write_frame};
use crate::runtime::handler::Handler;
use crate::types::{Error, HandlerMode, Result, RuntimeConfig};

/// Outcome of servicing one framed request.
enum RequestOutcome {
    /// Output envelopes to send back as a JSON array.
    Responses(Vec<Value>),
    /// Failure to send back as a one-element error array.
    Failure(ErrorKind, ErrorDetails),
}

/// The runtime server. Owns the handler instance for the process lifetime.
pub struct RuntimeServer {
    config: RuntimeConfig,
    handler: Box<dyn Handler>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RuntimeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeServer")
            .field("config", &self.config)
            .finish()
    }
}

impl RuntimeServer {
    pub fn new(config: RuntimeConfig, handler: Box<dyn Handler>) -> Self {
        Self {
            config,
            handler,
            cancel: CancellationToken::new(),
        }
    }

    /// Token to request graceful shutdown from signal handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bind the socket, write the ready marker, and serve until cancelled.
    ///
    /// The socket file and the ready marker are removed on the way out.
    pub async fn serve(&mut self) -> Result<()> {
        let socket_path = self.config.socket_path();
        tokio::fs::create_dir_all(&self.config.socket_dir).await?;

        // A stale socket file from a previous run blocks bind.
        match tokio::fs::remove_file(&socket_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&socket_path)?;
        if let Some(mode) = self.config.socket_mode()? {
            let perms = std::fs::Permissions::from_mode(mode);
            tokio::fs::set_permissions(&socket_path, perms).await?;
            tracing::info!("Socket permissions set to {}", self.config.socket_chmod);
        }
        tracing::info!("Socket server listening on {}", socket_path.display());

        self.write_ready_marker().await?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Runtime shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, _addr) = match accept {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::debug!("Accept error: {}", e);
                            break;
                        }
                    };
                    // One request per connection, strictly serialized.
                    if let Err(e) = self.handle_connection(stream).await {
                        tracing::warn!("Connection error: {}", e);
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Signal the sidecar that the runtime accepts requests. Written to a
    /// temp file first so the marker appears atomically.
    async fn write_ready_marker(&self) -> Result<()> {
        let ready = self.config.ready_path();
        let tmp = ready.with_extension("tmp");
        tokio::fs::write(&tmp, b"ready").await?;
        tokio::fs::rename(&tmp, &ready).await?;
        tracing::info!("Runtime ready signal created: {}", ready.display());
        Ok(())
    }

    async fn cleanup(&self) {
        for path in [self.config.socket_path(), self.config.ready_path()] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }

    async fn handle_connection(&mut self, stream: UnixStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::with_capacity(self.config.chunk_size, read_half);

        let outcome = match read_frame(&mut reader, self.config.max_frame_bytes).await {
            Ok(Some(body)) => self.handle_request(&body).await,
            Ok(None) => RequestOutcome::Failure(
                ErrorKind::ConnectionError,
                io_details("connection closed while reading"),
            ),
            Err(e) => RequestOutcome::Failure(ErrorKind::ConnectionError, io_details(e)),
        };

        let response = match outcome {
            RequestOutcome::Responses(outputs) => {
                tracing::debug!("Handler completed: returning {} response(s)", outputs.len());
                Value::Array(outputs)
            }
            RequestOutcome::Failure(kind, details) => {
                tracing::error!("Request failed with {}: {}", kind, details.message);
                error_response(kind, details)
            }
        };

        let body = serde_json::to_vec(&response)?;
        if let Err(e) = write_frame(&mut write_half, &body).await {
            match e.kind() {
                std::io::ErrorKind::BrokenPipe => tracing::warn!("Client disconnected"),
                _ => tracing::error!("Failed to send response: {}", e),
            }
        }
        Ok(())
    }

    async fn handle_request(&mut self, body: &[u8]) -> RequestOutcome {
        // Parse the envelope
        let raw: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                return RequestOutcome::Failure(
                    ErrorKind::MsgParsingError,
                    parse_details(e.to_string()),
                )
            }
        };
        tracing::debug!("Received envelope: {} bytes", body.len());

        let validated = if self.config.enable_validation {
            match validate::validate_envelope(&raw) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    return RequestOutcome::Failure(
                        ErrorKind::MsgParsingError,
                        parse_details(e.to_string()),
                    )
                }
            }
        } else {
            None
        };

        match self.config.mode {
            HandlerMode::Payload => self.run_payload_mode(&raw, validated).await,
            HandlerMode::Envelope => self.run_envelope_mode(&raw, validated).await,
        }
    }

    /// Payload mode: the handler sees only the payload; the runtime owns the
    /// route, advancing the cursor by one and replicating per output.
    async fn run_payload_mode(
        &mut self,
        raw: &Value,
        validated: Option<crate::envelope::Envelope>,
    ) -> RequestOutcome {
        let (payload, input_route, headers) = match &validated {
            Some(envelope) => (
                envelope.payload.clone(),
                envelope.route.clone(),
                envelope.headers.as_ref().map(|h| json!(h)),
            ),
            None => {
                // Validation off: extract loosely, failures are handler-phase errors.
                let payload = match raw.get("payload") {
                    Some(p) => p.clone(),
                    None => {
                        return RequestOutcome::Failure(
                            ErrorKind::ProcessingError,
                            parse_details("missing required field 'payload' in envelope"),
                        )
                    }
                };
                let route: Route = match raw
                    .get("route")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                {
                    Ok(Some(r)) => r,
                    _ => {
                        return RequestOutcome::Failure(
                            ErrorKind::ProcessingError,
                            parse_details("missing or invalid field 'route' in envelope"),
                        )
                    }
                };
                (payload, route, raw.get("headers").cloned())
            }
        };

        let outputs = match self.invoke(payload).await {
            Ok(outputs) => outputs,
            Err(outcome) => return outcome,
        };

        let output_route = json!(input_route.advanced());
        let out_list = outputs
            .into_iter()
            .map(|p| {
                let mut out = json!({ "payload": p, "route": output_route });
                if let Some(h) = &headers {
                    out["headers"] = h.clone();
                }
                out
            })
            .collect();
        RequestOutcome::Responses(out_list)
    }

    /// Envelope mode: the handler sees the whole envelope and owns the output
    /// routes, subject to re-validation against the input.
    async fn run_envelope_mode(
        &mut self,
        raw: &Value,
        validated: Option<crate::envelope::Envelope>,
    ) -> RequestOutcome {
        let input = match &validated {
            Some(envelope) => match serde_json::to_value(envelope) {
                Ok(v) => v,
                Err(e) => {
                    return RequestOutcome::Failure(
                        ErrorKind::ProcessingError,
                        parse_details(e.to_string()),
                    )
                }
            },
            None => raw.clone(),
        };

        let outputs = match self.invoke(input).await {
            Ok(outputs) => outputs,
            Err(outcome) => return outcome,
        };

        // Output validation (only when enabled)
        let Some(input_envelope) = &validated else {
            return RequestOutcome::Responses(outputs);
        };

        let expected_actor = input_envelope.route.current_actor();
        let total = outputs.len();
        let mut out_list = Vec::with_capacity(total);
        for (i, out) in outputs.into_iter().enumerate() {
            match validate::validate_output(&out, &input_envelope.route, expected_actor) {
                Ok(mut envelope) => {
                    // Handlers that do not set headers inherit the input's.
                    if envelope.headers.is_none() {
                        envelope.headers = input_envelope.headers.clone();
                    }
                    match serde_json::to_value(&envelope) {
                        Ok(v) => out_list.push(v),
                        Err(e) => {
                            return RequestOutcome::Failure(
                                ErrorKind::ProcessingError,
                                parse_details(e.to_string()),
                            )
                        }
                    }
                }
                Err(e) => {
                    return RequestOutcome::Failure(
                        ErrorKind::ProcessingError,
                        parse_details(format!(
                            "invalid output envelope [{}/{}]: {}",
                            i, total, e
                        )),
                    )
                }
            }
        }
        RequestOutcome::Responses(out_list)
    }

    /// Invoke the handler, converting failures and panics into error outcomes.
    async fn invoke(&mut self, input: Value) -> std::result::Result<Vec<Value>, RequestOutcome> {
        let call = AssertUnwindSafe(self.handler.process(input)).catch_unwind();
        match call.await {
            Ok(Ok(output)) => Ok(output.into_vec()),
            Ok(Err(handler_error)) => Err(RequestOutcome::Failure(
                handler_error.kind,
                handler_error.details(),
            )),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Handler panicked: {}", message);
                Err(RequestOutcome::Failure(
                    ErrorKind::ProcessingError,
                    ErrorDetails {
                        message,
                        type_name: "panic".to_string(),
                        traceback: None,
                    },
                ))
            }
        }
    }
}

/// Standardized one-element error array.
pub fn error_response(kind: ErrorKind, details: ErrorDetails) -> Value {
    json!([{ "error": kind.as_str(), "details": details }])
}

fn io_details(e: impl ToString) -> ErrorDetails {
    ErrorDetails {
        message: e.to_string(),
        type_name: "io".to_string(),
        traceback: None,
    }
}

fn parse_details(message: impl Into<String>) -> ErrorDetails {
    ErrorDetails {
        message: message.into(),
        type_name: "ValueError".to_string(),
        traceback: None,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Resolve the configured handler from a registry and enforce the end-actor
/// startup invariant before the socket is bound.
pub fn build_server(
    config: RuntimeConfig,
    registry: &crate::runtime::handler::HandlerRegistry,
) -> Result<RuntimeServer> {
    config.validate()?;
    let handler = registry.resolve(&config.handler).map_err(|e| match e {
        Error::NotFound(msg) => Error::NotFound(format!(
            "{}; registered: [{}]",
            msg,
            registry.descriptors().collect::<Vec<_>>().join(", ")
        )),
        other => other,
    })?;
    tracing::info!(
        "Asya runtime starting with handler: {} (mode: {}, validation: {})",
        config.handler,
        config.mode.as_str(),
        config.enable_validation
    );
    Ok(RuntimeServer::new(config, handler))
}
