//! Handler trait and the closed-world descriptor registry.
//!
//! The deployment contract names handlers by dotted descriptor strings
//! (`handlers.echo`, `models.Classifier.process`). Here the descriptor is a
//! lookup key into a registry of init-once factories rather than a
//! dynamically resolved path: factories run exactly once at startup, and the
//! resulting instance serves every request for the life of the process.
//!
//! `process` takes `&mut self` deliberately. The runtime services one request
//! at a time, so handlers may keep mutable state (counters, caches, loaded
//! models) without any locking.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::envelope::{ErrorDetails, ErrorKind};
use crate::types::{Error, Result};

/// Normalized handler return value.
///
/// Mirrors the wire contract: no output aborts routing, one output continues
/// the route, many outputs fan out into independent envelopes.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutput {
    Empty,
    One(Value),
    Many(Vec<Value>),
}

impl HandlerOutput {
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            Self::Empty => Vec::new(),
            Self::One(v) => vec![v],
            Self::Many(vs) => vs,
        }
    }
}

impl From<Value> for HandlerOutput {
    fn from(v: Value) -> Self {
        Self::One(v)
    }
}

impl From<Option<Value>> for HandlerOutput {
    fn from(v: Option<Value>) -> Self {
        match v {
            None => Self::Empty,
            Some(v) => Self::One(v),
        }
    }
}

impl From<Vec<Value>> for HandlerOutput {
    fn from(vs: Vec<Value>) -> Self {
        Self::Many(vs)
    }
}

/// A failure raised by a handler, tagged with its wire error kind.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
    pub type_name: String,
    pub traceback: Option<String>,
}

impl HandlerError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ProcessingError,
            message: message.into(),
            type_name: "HandlerError".to_string(),
            traceback: None,
        }
    }

    pub fn oom(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::OomError,
            message: message.into(),
            type_name: "OutOfMemory".to_string(),
            traceback: None,
        }
    }

    pub fn cuda_oom(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::CudaOomError,
            message: message.into(),
            type_name: "CudaOutOfMemory".to_string(),
            traceback: None,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    pub fn details(&self) -> ErrorDetails {
        ErrorDetails {
            message: self.message.clone(),
            type_name: self.type_name.clone(),
            traceback: self.traceback.clone(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {}

/// A user-supplied request handler.
///
/// `input` is the payload in payload mode, the whole envelope object in
/// envelope mode.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process(&mut self, input: Value) -> std::result::Result<HandlerOutput, HandlerError>;
}

/// Adapter turning a closure into a [`Handler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: FnMut(Value) -> std::result::Result<HandlerOutput, HandlerError> + Send + Sync,
{
    async fn process(&mut self, input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
        (self.0)(input)
    }
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnHandler")
    }
}

/// Factory producing one handler instance. Runs once at startup.
pub type HandlerFactory = Box<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

/// Registry of handler factories keyed by descriptor string.
pub struct HandlerRegistry {
    entries: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a factory under a descriptor. The descriptor must match the
    /// deployment contract's dotted-path shape.
    pub fn register<F>(&mut self, descriptor: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Handler> + Send + Sync + 'static,
    {
        if !is_valid_descriptor(descriptor) {
            return Err(Error::validation(format!(
                "invalid handler descriptor format: '{}'; expected 'module.path.function' \
                 or 'module.path.Class.method'",
                descriptor
            )));
        }
        self.entries.insert(descriptor.to_string(), Box::new(factory));
        Ok(())
    }

    /// Instantiate the handler registered under `descriptor`.
    pub fn resolve(&self, descriptor: &str) -> Result<Box<dyn Handler>> {
        if !is_valid_descriptor(descriptor) {
            return Err(Error::validation(format!(
                "invalid handler descriptor format: '{}'",
                descriptor
            )));
        }
        let factory = self.entries.get(descriptor).ok_or_else(|| {
            Error::not_found(format!("no handler registered for descriptor '{}'", descriptor))
        })?;
        Ok(factory())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("descriptors", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Check a descriptor against `[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)+`.
pub fn is_valid_descriptor(s: &str) -> bool {
    let segments: Vec<&str> = s.split('.').collect();
    if segments.len() < 2 {
        return false;
    }
    segments.iter().all(|seg| {
        let mut chars = seg.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}
