//! Framed request client for the runtime socket.
//!
//! The socket is local but the runtime restarts independently, so every
//! request opens a fresh connection and connect/write failures retry with
//! bounded exponential backoff until the configured budget elapses. The read
//! side is governed by the per-hop deadline instead: a handler that never
//! responds is abandoned, not retried.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::net::UnixStream;

use crate::envelope::{ErrorKind, ErrorRecord};
use crate::ipc::codec::{read_frame, write_frame};
use crate::types::SidecarConfig;

/// One-request-per-connection client with reconnect backoff.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    socket_path: PathBuf,
    hop_timeout: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    budget: Duration,
    max_frame_bytes: u32,
}

impl RuntimeClient {
    pub fn new(config: &SidecarConfig) -> Self {
        Self {
            socket_path: config.socket_path(),
            hop_timeout: config.hop_timeout,
            initial_backoff: config.reconnect_initial_backoff,
            max_backoff: config.reconnect_max_backoff,
            budget: config.reconnect_budget,
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    /// Send one framed envelope and await the framed response.
    ///
    /// Connection-level failures (refused connect, broken write, short read)
    /// retry within the backoff budget and surface as `connection_error` once
    /// it is exhausted. A deadline expiry surfaces as `timeout_error` without
    /// retrying: the handler may still be running and redelivering to it
    /// would double the work.
    pub async fn request(&self, body: &[u8]) -> Result<Vec<u8>, ErrorRecord> {
        let started = Instant::now();
        let mut delay = self.initial_backoff;
        let mut last_error = String::new();

        loop {
            match self.attempt(body).await {
                Ok(response) => return Ok(response),
                Err(AttemptError::Timeout) => {
                    return Err(ErrorRecord::new(
                        ErrorKind::TimeoutError,
                        format!(
                            "runtime produced no response within {:?}",
                            self.hop_timeout
                        ),
                    ));
                }
                Err(AttemptError::Connection(message)) => {
                    last_error = message;
                }
            }

            if started.elapsed() + delay > self.budget {
                return Err(ErrorRecord::new(
                    ErrorKind::ConnectionError,
                    format!(
                        "runtime unreachable after {:?} (last error: {})",
                        started.elapsed(),
                        last_error
                    ),
                ));
            }

            tracing::debug!(
                "Runtime connection failed ({}), retrying in {:?}",
                last_error,
                delay
            );
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.max_backoff);
        }
    }

    async fn attempt(&self, body: &[u8]) -> Result<Vec<u8>, AttemptError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| AttemptError::Connection(format!("connect: {}", e)))?;
        let (mut reader, mut writer) = stream.into_split();

        write_frame(&mut writer, body)
            .await
            .map_err(|e| AttemptError::Connection(format!("write: {}", e)))?;

        let read = tokio::time::timeout(
            self.hop_timeout,
            read_frame(&mut reader, self.max_frame_bytes),
        )
        .await;

        match read {
            Err(_elapsed) => Err(AttemptError::Timeout),
            Ok(Err(e)) => Err(AttemptError::Connection(format!("read: {}", e))),
            Ok(Ok(None)) => Err(AttemptError::Connection(
                "runtime closed the connection before responding".to_string(),
            )),
            Ok(Ok(Some(response))) => Ok(response),
        }
    }
}

enum AttemptError {
    Connection(String),
    Timeout,
}
