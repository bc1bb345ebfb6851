//! # Asya Core - Envelope Execution Pipeline
//!
//! Message-driven actor pipeline: envelopes travel through an ordered list
//! of actors, each a co-located sidecar + runtime pair, terminating at
//! built-in end actors that persist outcomes to object storage.
//!
//! ## Architecture
//!
//! ```text
//!  gateway ──publish──▶ queue ──▶ ┌───────────────────────────┐
//!                                 │  sidecar  ◀──UDS──▶ runtime│
//!                                 │  (routing)        (handler)│
//!                                 └───────┬───────────────────┘
//!                                         │ publish next hop
//!                                         ▼
//!                                  ... ──▶ happy-end / error-end ──▶ S3
//! ```
//!
//! Two wire contracts connect the processes: envelope JSON on a named queue
//! per actor, and length-prefixed envelope JSON on a local Unix socket
//! between each sidecar and its runtime.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod endactor;
pub mod envelope;
pub mod gateway;
pub mod ipc;
pub mod progress;
pub mod runtime;
pub mod sidecar;
pub mod storage;
pub mod transport;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Error, Result};
