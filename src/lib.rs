#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::uninlined_format_args
)]

//! Request/response correlation and reliability layer for one-way transports.
//!
//! Isolated execution contexts exchange request/response pairs over a
//! transport that only supports fire-and-forget delivery. This crate
//! synthesizes RPC-style semantics above that primitive: correlation ids,
//! timeouts, exponential-backoff retries, a circuit breaker, and fan-out
//! handler dispatch. Lost messages surface as timeouts, never as blocked
//! sends.

pub mod breaker;
pub mod config;
pub mod correlation;
pub mod error;
pub mod message;
pub mod registry;
pub mod retry;
pub mod service;
pub mod stats;
pub mod transport;

pub use breaker::BreakerState;
pub use config::{BreakerConfig, MessagingConfig, RetryConfig};
pub use correlation::PendingRequestInfo;
pub use error::{ErrorKind, HandlerError, TransportError};
pub use message::{Envelope, Reply, SendResult, Source};
pub use registry::{handler_fn, HandlerRegistry, ListenerGuard, MessageHandler};
pub use retry::RetryOptions;
pub use service::{MessageService, ServiceStatus};
pub use stats::Statistics;
pub use transport::{local::LocalTransport, InboundListener, ReplyHandle, SenderInfo, Transport};
