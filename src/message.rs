//! Wire types for the correlation layer.
//!
//! Everything that crosses a transport is an [`Envelope`]: an action name for
//! registry dispatch, an optional correlation id for reply matching, a source
//! tag so the layer's own replies are never re-dispatched as user traffic,
//! and a flattened JSON payload.

use crate::error::ErrorKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Origin tag carried on every envelope.
///
/// Replies emitted by the layer itself are tagged [`Source::Service`] so an
/// inbound reply can never loop back into user handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Service,
    #[default]
    User,
}

/// Structured message record exchanged over the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Action name consulted by the handler registry on inbound dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Attached on outbound requests, echoed verbatim on their replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub source: Source,
    /// Arbitrary payload fields, flattened onto the wire record.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Outbound user request for `action`.
    pub fn request(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    /// Attach a payload field, builder style.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Build the service-tagged reply envelope for `request`, echoing its
    /// correlation id and carrying `reply` as the payload.
    pub fn reply_to(request: &Envelope, reply: &Reply) -> Self {
        let payload = match serde_json::to_value(reply) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            action: None,
            correlation_id: request.correlation_id.clone(),
            source: Source::Service,
            payload,
        }
    }

    /// Interpret the payload as a reply body. Malformed payloads degrade to a
    /// failure reply rather than an error: the correlation side must always
    /// resolve with something.
    pub fn as_reply(&self) -> Reply {
        serde_json::from_value(Value::Object(self.payload.clone())).unwrap_or_else(|_| Reply {
            success: false,
            data: None,
            error: Some("malformed reply payload".to_string()),
            kind: None,
        })
    }
}

/// Reply body produced by handler dispatch and carried in reply envelopes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl Reply {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn fail(kind: Option<ErrorKind>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            kind,
        }
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Terminal outcome of one `send_message` call.
///
/// Every send resolves to one of these; failures are values, never errors
/// crossing the service boundary. Callers branch on `success`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub timeout: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub circuit_breaker_open: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub retries_exhausted: bool,
}

impl SendResult {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            ..Self::default()
        }
    }

    /// Failure with its kind attached at the failure site. The `timeout` and
    /// `circuit_breaker_open` flags mirror the kind so callers can branch
    /// without matching on it.
    pub fn failure(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            timeout: kind == ErrorKind::Timeout,
            circuit_breaker_open: kind == ErrorKind::CircuitOpen,
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn from_reply(reply: Reply) -> Self {
        Self {
            success: reply.success,
            data: reply.data,
            error: reply.error,
            kind: reply.kind,
            ..Self::default()
        }
    }

    /// Mark a terminal failure as having consumed the whole retry budget.
    #[must_use]
    pub fn with_retries_exhausted(mut self) -> Self {
        self.retries_exhausted = true;
        self
    }

    /// Whether a retry loop may attempt this send again.
    pub fn is_retryable(&self) -> bool {
        !self.success && self.kind.is_some_and(ErrorKind::is_retryable)
    }
}

/// Correlation id source for one service instance.
///
/// Format: `<instance>-<unix_millis>-<seq>`. The monotonic sequence breaks
/// same-millisecond ties, so ids are never reused within an instance, and the
/// instance component keeps independent contexts from colliding.
#[derive(Debug)]
pub(crate) struct CorrelationIds {
    instance: String,
    seq: AtomicU64,
}

impl CorrelationIds {
    pub(crate) fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn next(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.instance, Utc::now().timestamp_millis(), seq)
    }
}
