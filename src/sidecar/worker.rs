//! Sidecar consume loop.
//!
//! Per message: Received -> Framing -> AwaitResp -> Classify -> Publish ->
//! Ack, with the reconnect and error-route transitions owned by
//! [`RuntimeClient`] and [`classify`]. Within one envelope the sidecar is
//! strictly sequential; the input message is acknowledged only after every
//! next-hop (or error-end) publish has been accepted by the transport, so a
//! crash anywhere before that leaves the message eligible for redelivery.

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::envelope::{Envelope, ErrorKind, ErrorRecord, Route};
use crate::progress::{EnvelopeStatus, ProgressReporter, ProgressSink, ProgressUpdate};
use crate::sidecar::classify::{classify_response, Classification};
use crate::sidecar::client::RuntimeClient;
use crate::transport::{Delivery, QueueName, Transport};
use crate::types::{EnvelopeId, Error, Result, SidecarConfig};

/// The sidecar: owns transport I/O, framing, retries, and progress for one
/// actor.
pub struct Sidecar {
    config: SidecarConfig,
    transport: Arc<dyn Transport>,
    client: RuntimeClient,
    reporter: ProgressReporter,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Sidecar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sidecar").field("actor", &self.config.actor).finish()
    }
}

/// Routing metadata extracted leniently from an inbound message.
///
/// The sidecar tolerates what the runtime's validator would reject — in
/// particular a cursor past the end of the route, which legacy handlers
/// produce and which routes to happy-end rather than error-end.
struct InboundView {
    id: Option<EnvelopeId>,
    actors: Vec<String>,
    current: usize,
    error_message: Option<String>,
}

impl InboundView {
    fn parse(raw: &Value) -> std::result::Result<Self, String> {
        let route = raw
            .get("route")
            .ok_or_else(|| "missing required field 'route' in envelope".to_string())?;
        let actors_value = route
            .get("actors")
            .and_then(Value::as_array)
            .ok_or_else(|| "field 'route.actors' must be a list".to_string())?;
        if actors_value.is_empty() {
            return Err("field 'route.actors' cannot be empty".to_string());
        }
        let mut actors = Vec::with_capacity(actors_value.len());
        for actor in actors_value {
            match actor.as_str() {
                Some(name) => actors.push(name.to_string()),
                None => return Err("field 'route.actors' must contain strings".to_string()),
            }
        }
        let current = match route.get("current") {
            None => 0,
            Some(v) => match v.as_i64() {
                Some(n) if n >= 0 => n as usize,
                _ => return Err("field 'route.current' must be a non-negative integer".to_string()),
            },
        };
        // Lenient on the id too: an empty id is as useless as a missing one.
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| EnvelopeId::from_string(s.to_string()).ok());
        let error_message = raw
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            id,
            actors,
            current,
            error_message,
        })
    }

    fn envelope_id(&self) -> &str {
        self.id.as_ref().map(EnvelopeId::as_str).unwrap_or("unknown")
    }
}

impl Sidecar {
    pub fn new(
        config: SidecarConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let client = RuntimeClient::new(&config);
        Self {
            config,
            transport,
            client,
            reporter: ProgressReporter::spawn(sink),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn input_queue(&self) -> QueueName {
        QueueName::for_actor(&self.config.namespace, &self.config.actor)
    }

    fn queue_for(&self, actor: &str) -> QueueName {
        QueueName::for_actor(&self.config.namespace, actor)
    }

    fn is_happy_end(&self) -> bool {
        self.config.actor == self.config.happy_end_actor
    }

    fn is_error_end(&self) -> bool {
        self.config.actor == self.config.error_end_actor
    }

    /// Consume the actor's input queue until cancelled.
    pub async fn run(&self) -> Result<()> {
        let queue = self.input_queue();
        let mut deliveries = self.transport.consume(&queue).await?;
        tracing::info!(
            "Sidecar for actor '{}' consuming from '{}'",
            self.config.actor,
            queue
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Sidecar shutting down");
                    break;
                }
                delivery = deliveries.recv() => {
                    let Some(delivery) = delivery else {
                        return Err(Error::transport("consume channel closed unexpectedly"));
                    };
                    self.handle_delivery(delivery).await;
                }
            }
        }
        Ok(())
    }

    /// Drive one delivery through the full state machine. Never panics; every
    /// failure path ends in error-end routing, redelivery, or a logged drop.
    pub async fn handle_delivery(&self, delivery: Delivery) {
        let raw: Value = match serde_json::from_slice(&delivery.body) {
            Ok(v) => v,
            Err(e) => {
                self.handle_malformed(delivery, format!("invalid JSON: {}", e)).await;
                return;
            }
        };
        let view = match InboundView::parse(&raw) {
            Ok(view) => view,
            Err(message) => {
                self.handle_malformed(delivery, message).await;
                return;
            }
        };

        let span =
            crate::observability::hop_span(view.envelope_id(), &self.config.actor, view.current);
        self.dispatch_hop(delivery, raw, view).instrument(span).await;
    }

    /// Received -> Framing -> AwaitResp -> Classify -> Publish -> Ack for one
    /// parsed message.
    async fn dispatch_hop(&self, delivery: Delivery, raw: Value, view: InboundView) {
        let envelope_id = view.envelope_id().to_string();
        let route_len = view.actors.len();
        self.emit_progress(&envelope_id, view.current, route_len, EnvelopeStatus::Running, "received");
        self.emit_progress(&envelope_id, view.current, route_len, EnvelopeStatus::Running, "processing");

        let response = match self.client.request(&delivery.body).await {
            Ok(response) => response,
            Err(record) => {
                tracing::warn!(
                    "Hop failed for envelope {} with {}: {}",
                    envelope_id,
                    record.kind,
                    record.message
                );
                self.finish_with_error(delivery, &raw, &view, record).await;
                return;
            }
        };

        match classify_response(&response) {
            Classification::AbortToHappyEnd => {
                if self.is_happy_end() || self.is_error_end() {
                    // End actors return empty by contract; the route is done.
                    self.ack_and_finish(delivery, &view).await;
                    return;
                }
                if self
                    .publish_envelope_bytes(&self.config.happy_end_actor, delivery.body.clone())
                    .await
                    .is_err()
                {
                    self.leave_for_redelivery(delivery).await;
                    return;
                }
                self.ack_and_finish(delivery, &view).await;
            }
            Classification::Error(record) => {
                self.finish_with_error(delivery, &raw, &view, record).await;
            }
            Classification::Outputs(outputs) => {
                self.route_outputs(delivery, &view, outputs).await;
            }
        }
    }

    /// Publish each output envelope to the actor its route points at, then ack.
    async fn route_outputs(&self, delivery: Delivery, view: &InboundView, outputs: Vec<Value>) {
        let fan_out = outputs.len() > 1;
        let mut prepared = Vec::with_capacity(outputs.len());
        for output in outputs {
            let mut envelope: Envelope = match serde_json::from_value(output) {
                Ok(e) => e,
                Err(e) => {
                    let record = ErrorRecord::new(
                        ErrorKind::ProcessingError,
                        format!("runtime returned a malformed output envelope: {}", e),
                    );
                    let raw = serde_json::from_slice(&delivery.body).unwrap_or(Value::Null);
                    self.finish_with_error(delivery, &raw, view, record).await;
                    return;
                }
            };

            // Identity: a lone continuation keeps the input's id; fan-out
            // children get fresh ids with lineage through parent_id.
            if envelope.id.is_none() {
                if fan_out {
                    envelope.id = Some(EnvelopeId::new());
                    envelope.parent_id = view.id.clone();
                } else {
                    envelope.id = view.id.clone();
                }
            }

            let destination = match envelope.route.current_actor() {
                Some(actor) => actor.to_string(),
                // Cursor at or past the end of the route, including
                // over-increments from validation-off runtimes.
                None => self.config.happy_end_actor.clone(),
            };
            prepared.push((destination, envelope));
        }

        for (destination, envelope) in &prepared {
            let body = match serde_json::to_vec(envelope) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!("Failed to serialize output envelope: {}", e);
                    self.leave_for_redelivery(delivery).await;
                    return;
                }
            };
            if self.publish_envelope_bytes(destination, body).await.is_err() {
                self.leave_for_redelivery(delivery).await;
                return;
            }
        }

        self.ack_and_finish(delivery, view).await;
    }

    /// Annotate the original envelope and route it to error-end.
    async fn finish_with_error(
        &self,
        delivery: Delivery,
        raw: &Value,
        view: &InboundView,
        record: ErrorRecord,
    ) {
        if self.is_error_end() {
            // The recorder of failures failed; requeueing a deterministic
            // failure would loop, so give up loudly.
            tracing::error!(
                "Error-end actor failed for envelope {}: {} ({})",
                view.envelope_id(),
                record.message,
                record.kind
            );
            self.ack_and_finish(delivery, view).await;
            return;
        }

        let mut annotated = raw.clone();
        if let Some(obj) = annotated.as_object_mut() {
            match serde_json::to_value(&record) {
                Ok(value) => {
                    obj.insert("error".to_string(), value);
                }
                Err(e) => tracing::error!("Failed to serialize error record: {}", e),
            }
        }

        let body = match serde_json::to_vec(&annotated) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to serialize annotated envelope: {}", e);
                self.leave_for_redelivery(delivery).await;
                return;
            }
        };
        if self
            .publish_envelope_bytes(&self.config.error_end_actor, body)
            .await
            .is_err()
        {
            self.leave_for_redelivery(delivery).await;
            return;
        }
        self.ack_and_finish(delivery, view).await;
    }

    /// Malformed input: never silently dropped, always recorded by error-end.
    async fn handle_malformed(&self, delivery: Delivery, message: String) {
        tracing::warn!("Malformed message on '{}': {}", self.input_queue(), message);
        if self.is_error_end() {
            tracing::error!("Error-end received an undecodable message, dropping: {}", message);
            if let Err(e) = delivery.ack().await {
                tracing::warn!("Ack failed: {}", e);
            }
            return;
        }

        let record = ErrorRecord::new(ErrorKind::MsgParsingError, message);
        let envelope = Envelope {
            id: None,
            parent_id: None,
            route: Route {
                actors: vec![self.config.error_end_actor.clone()],
                current: 0,
            },
            headers: None,
            payload: Value::String(String::from_utf8_lossy(&delivery.body).into_owned()),
            error: Some(record),
        };
        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to serialize parse-error envelope: {}", e);
                self.leave_for_redelivery(delivery).await;
                return;
            }
        };
        if self
            .publish_envelope_bytes(&self.config.error_end_actor, body)
            .await
            .is_err()
        {
            self.leave_for_redelivery(delivery).await;
            return;
        }
        if let Err(e) = delivery.ack().await {
            tracing::warn!("Ack failed: {}", e);
        }
    }

    async fn publish_envelope_bytes(&self, actor: &str, body: Vec<u8>) -> Result<()> {
        let queue = self.queue_for(actor);
        self.transport.publish(&queue, body).await.map_err(|e| {
            tracing::error!("Publish to '{}' failed: {}", queue, e);
            e
        })
    }

    /// Ack the input and emit the finished progress event. The terminal
    /// status comes from which actor this sidecar fronts: happy-end finishes
    /// an envelope as succeeded, error-end as failed, everything else keeps
    /// it running.
    async fn ack_and_finish(&self, delivery: Delivery, view: &InboundView) {
        if let Err(e) = delivery.ack().await {
            tracing::warn!("Ack failed, transport will redeliver: {}", e);
            return;
        }
        let (status, message) = if self.is_happy_end() {
            (EnvelopeStatus::Succeeded, "finished".to_string())
        } else if self.is_error_end() {
            let message = view
                .error_message
                .clone()
                .unwrap_or_else(|| "finished".to_string());
            (EnvelopeStatus::Failed, message)
        } else {
            (EnvelopeStatus::Running, "finished".to_string())
        };
        self.emit_progress(
            view.envelope_id(),
            view.current + 1,
            view.actors.len(),
            status,
            &message,
        );
    }

    /// Do not ack: the transport redelivers after its visibility window.
    async fn leave_for_redelivery(&self, delivery: Delivery) {
        if let Err(e) = delivery.nack().await {
            tracing::warn!("Nack failed: {}", e);
        }
    }

    fn emit_progress(
        &self,
        envelope_id: &str,
        index: usize,
        route_len: usize,
        status: EnvelopeStatus,
        message: &str,
    ) {
        self.reporter.emit(
            ProgressUpdate::new(envelope_id, &self.config.actor, index, route_len, status)
                .with_message(message),
        );
    }
}
