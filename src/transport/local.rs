//! In-process loopback transport.
//!
//! Links two contexts living in the same process: each half delivers into
//! the other half's listener slot. Used by the integration tests and by
//! embedders that co-locate contexts. Failure injection switches exercise
//! the transport-error and silent-loss paths without a real host.

use super::{InboundListener, ReplyHandle, SenderInfo, Transport};
use crate::error::TransportError;
use crate::message::Envelope;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Slot = Arc<Mutex<Option<Arc<dyn InboundListener>>>>;

pub struct LocalTransport {
    name: String,
    peer_name: String,
    slot: Slot,
    peer_slot: Slot,
    fail_sends: AtomicBool,
    drop_deliveries: AtomicBool,
}

impl LocalTransport {
    /// Create two cross-linked halves.
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Arc<Self>, Arc<Self>) {
        let a = a.into();
        let b = b.into();
        let slot_a: Slot = Arc::new(Mutex::new(None));
        let slot_b: Slot = Arc::new(Mutex::new(None));

        let half_a = Arc::new(Self {
            name: a.clone(),
            peer_name: b.clone(),
            slot: slot_a.clone(),
            peer_slot: slot_b.clone(),
            fail_sends: AtomicBool::new(false),
            drop_deliveries: AtomicBool::new(false),
        });
        let half_b = Arc::new(Self {
            name: b,
            peer_name: a,
            slot: slot_b,
            peer_slot: slot_a,
            fail_sends: AtomicBool::new(false),
            drop_deliveries: AtomicBool::new(false),
        });
        (half_a, half_b)
    }

    /// Make every `send_one_way` return a transport error.
    pub fn set_fail_sends(&self, on: bool) {
        self.fail_sends.store(on, Ordering::SeqCst);
    }

    /// Accept sends but never deliver them (silent loss).
    pub fn set_drop_deliveries(&self, on: bool) {
        self.drop_deliveries.store(on, Ordering::SeqCst);
    }

    pub fn has_listener(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_one_way(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("injected send failure".to_string()));
        }
        if self.drop_deliveries.load(Ordering::SeqCst) {
            return Ok(());
        }

        let listener = self.peer_slot.lock().clone();
        let Some(listener) = listener else {
            return Err(TransportError::Disconnected);
        };

        let (handle, rx) = ReplyHandle::channel();
        let sender = SenderInfo {
            context: self.name.clone(),
        };
        tokio::spawn(async move {
            listener.on_message(envelope, sender, handle).await;
        });

        // Route the reply (if the callee produces one) back into this half's
        // own listener as a plain inbound envelope.
        let own_slot = self.slot.clone();
        let peer_name = self.peer_name.clone();
        tokio::spawn(async move {
            if let Ok(reply) = rx.await {
                let listener = own_slot.lock().clone();
                if let Some(listener) = listener {
                    let sender = SenderInfo { context: peer_name };
                    listener.on_message(reply, sender, ReplyHandle::closed()).await;
                }
            }
        });

        Ok(())
    }

    fn register_inbound_listener(&self, listener: Arc<dyn InboundListener>) -> bool {
        let mut slot = self.slot.lock();
        let displaced = slot.is_some();
        *slot = Some(listener);
        displaced
    }

    fn unregister_inbound_listener(&self, listener: &Arc<dyn InboundListener>) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, listener) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}
