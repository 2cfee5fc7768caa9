use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Dial, read or write failure. Retried with backoff, never fatal.
    Transport,
    /// Frame that could not be decoded. Dropped, the session continues.
    Decode,
    /// Well-formed frame lacking the expected fields.
    SemanticMismatch,
    /// Unusable endpoint set, reported before any connection starts.
    Configuration,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct MonitorError {
    pub kind: ErrorKind,
    pub message: String,
}

impl MonitorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transport
    }
}
