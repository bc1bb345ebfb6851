//! Gateway envelope service.
//!
//! The slice of the gateway the pipeline depends on: envelope creation with
//! first-hop publish, the progress registry fed by sidecar updates, and the
//! status/stream read surface.

pub mod registry;
pub mod routes;
pub mod service;

pub use registry::ProgressRegistry;
pub use routes::{router, AppState};
pub use service::{CreatedEnvelope, EnvelopeService};
