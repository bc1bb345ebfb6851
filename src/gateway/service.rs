//! Envelope creation and status lookup.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::registry::ProgressRegistry;
use crate::envelope::Envelope;
use crate::progress::{EnvelopeStatus, ProgressUpdate};
use crate::transport::{QueueName, Transport};
use crate::types::{EnvelopeId, Error, GatewayConfig, Result};

/// Response to a successful tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEnvelope {
    pub envelope_id: EnvelopeId,
    pub status_url: String,
    pub stream_url: String,
    pub message: String,
}

/// Creates envelopes from tool calls and answers status reads.
pub struct EnvelopeService {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<ProgressRegistry>,
}

impl std::fmt::Debug for EnvelopeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeService")
            .field("tools", &self.config.tools.len())
            .finish()
    }
}

impl EnvelopeService {
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<ProgressRegistry>,
    ) -> Self {
        Self {
            config,
            transport,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ProgressRegistry> {
        &self.registry
    }

    /// Create an envelope for a tool call and publish it to the first hop.
    pub async fn create(&self, tool_name: &str, arguments: Value) -> Result<CreatedEnvelope> {
        let tool = self
            .config
            .tool(tool_name)
            .ok_or_else(|| Error::not_found(format!("unknown tool '{}'", tool_name)))?;
        if tool.actors.is_empty() {
            return Err(Error::validation(format!(
                "tool '{}' declares no actors",
                tool_name
            )));
        }

        let envelope = Envelope::new(tool.actors.clone(), arguments);
        let Some(envelope_id) = envelope.id.clone() else {
            return Err(Error::internal("freshly created envelope has no id"));
        };
        let first_actor = &tool.actors[0];
        let queue = QueueName::for_actor(&self.config.namespace, first_actor);

        // Register as pending before the first sidecar can possibly report.
        self.registry
            .init(envelope_id.as_str(), first_actor, tool.actors.len());
        let body = envelope.to_json()?;
        self.transport.publish(&queue, body).await?;

        tracing::info!(
            "Created envelope {} for tool '{}' -> queue '{}'",
            envelope_id,
            tool_name,
            queue
        );
        Ok(CreatedEnvelope {
            status_url: format!("{}/envelopes/{}", self.config.public_url, envelope_id),
            stream_url: format!("{}/envelopes/{}/stream", self.config.public_url, envelope_id),
            message: format!("Envelope created successfully with ID: {}", envelope_id),
            envelope_id,
        })
    }

    /// Most recent progress snapshot; `unknown` when never observed.
    pub fn status(&self, envelope_id: &str) -> ProgressUpdate {
        self.registry.snapshot(envelope_id).unwrap_or_else(|| {
            ProgressUpdate::new(envelope_id, "", 0, 0, EnvelopeStatus::Unknown)
        })
    }
}
