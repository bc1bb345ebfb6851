//! Actor runtime: loads one handler and serves it over a Unix socket.
//!
//! Single-threaded cooperative by design (one request in flight, ever); see
//! the concurrency notes on [`server::RuntimeServer`].

pub mod handler;
pub mod samples;
pub mod server;

pub use handler::{FnHandler, Handler, HandlerError, HandlerOutput, HandlerRegistry};
pub use server::{build_server, RuntimeServer};
