//! Actor sidecar: transport I/O, runtime framing, retries, and progress.

pub mod classify;
pub mod client;
pub mod worker;

pub use classify::{classify_response, Classification};
pub use client::RuntimeClient;
pub use worker::Sidecar;
