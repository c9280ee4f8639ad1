//! Transport seam.
//!
//! The host hands the layer a one-way, at-most-once send primitive plus a
//! single inbound-listener slot. Everything RPC-like (correlation, timeouts,
//! retries) is synthesized above this trait; implementations stay dumb.

pub mod local;

use crate::error::TransportError;
use crate::message::Envelope;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Identity of the context an inbound message arrived from.
#[derive(Debug, Clone, Default)]
pub struct SenderInfo {
    pub context: String,
}

/// One-shot reply channel handed to the inbound listener.
///
/// Keep-open is explicit through ownership: holding the handle keeps the
/// reply channel open, dropping it closes the channel without a reply.
#[derive(Debug)]
pub struct ReplyHandle {
    tx: Option<oneshot::Sender<Envelope>>,
}

impl ReplyHandle {
    pub fn channel() -> (Self, oneshot::Receiver<Envelope>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A handle whose channel is already closed. Used by transports that have
    /// no way to route a reply for this delivery.
    pub fn closed() -> Self {
        Self { tx: None }
    }

    /// Send the reply envelope. Returns false when the requesting side is
    /// gone or the handle carries no channel.
    pub fn send(mut self, envelope: Envelope) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }
}

/// Callback occupying a transport's inbound-listener slot.
#[async_trait]
pub trait InboundListener: Send + Sync {
    async fn on_message(&self, envelope: Envelope, sender: SenderInfo, reply: ReplyHandle);
}

/// Host-provided one-way delivery primitive.
///
/// One listener slot per transport. The host may silently drop a
/// registration across reloads, so callers re-claim the slot on every
/// `initialize()` rather than trusting an earlier registration.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name, for logs.
    fn name(&self) -> &str;

    /// Fire-and-forget send. An `Err` means the transport itself refused the
    /// message; `Ok` acknowledges nothing beyond hand-off.
    async fn send_one_way(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Claim the inbound-listener slot, displacing any stale occupant.
    /// Returns true when a previous registration was displaced.
    fn register_inbound_listener(&self, listener: Arc<dyn InboundListener>) -> bool;

    /// Release the slot only if it still holds exactly this listener
    /// instance. Returns whether anything was released.
    fn unregister_inbound_listener(&self, listener: &Arc<dyn InboundListener>) -> bool;
}
