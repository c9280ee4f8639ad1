//! Closed failure taxonomy.
//!
//! Kinds are attached at the failure site and travel on replies, so retry
//! classification is a match on this enum — never an inspection of error
//! text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Every way a send or a handler can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The transport rejected or lost the outbound message.
    Transport,
    /// No matching reply arrived before the deadline.
    Timeout,
    /// The request was explicitly aborted (cleanup or `cancel_request`).
    Cancelled,
    /// The pending-request cap rejected the send locally. Says nothing about
    /// transport health.
    Backpressure,
    Validation,
    NotFound,
    Forbidden,
    Unauthorized,
    /// The circuit breaker blocked the send before it reached the transport.
    CircuitOpen,
}

impl ErrorKind {
    /// Transient failures worth another attempt. Everything else is terminal.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transport | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Backpressure => "backpressure",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Unauthorized => "unauthorized",
            Self::CircuitOpen => "circuit_open",
        };
        f.write_str(name)
    }
}

/// Failure reported by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The host primitive refused the message.
    #[error("transport send failed: {0}")]
    Send(String),
    /// No listening context is reachable on the other end.
    #[error("no listening context is available")]
    Disconnected,
}

/// Typed handler failure. Handlers return this (through `anyhow`) when they
/// want a specific kind on the failure reply; plain `anyhow` errors dispatch
/// as kind-less failures.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }
}
