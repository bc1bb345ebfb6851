//! Core types for the Asya envelope pipeline.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: strongly-typed envelope identifier
//! - **Errors**: application error types with thiserror derives
//! - **Config**: configuration structures for runtime, sidecar, gateway,
//!   transport, and storage

mod config;
mod errors;
mod ids;

pub use config::{
    GatewayConfig, HandlerMode, RuntimeConfig, SidecarConfig, StorageConfig, ToolRoute,
    TransportConfig, TransportKind,
};
pub use errors::{Error, Result};
pub use ids::EnvelopeId;
