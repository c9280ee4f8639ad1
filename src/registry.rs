//! Inbound action dispatch with fan-out.
//!
//! Any number of handlers may serve one action. All of them run for each
//! inbound request; the first successful result becomes the combined reply,
//! otherwise the individual error messages are joined into one failure. A
//! handler returning `Err` is converted to a failure result at this
//! boundary, so one faulty handler can neither suppress the others' results
//! nor corrupt dispatch for other actions.

use crate::error::HandlerError;
use crate::message::{Envelope, Reply};
use crate::transport::SenderInfo;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Externally registered handler for one action.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope, sender: &SenderInfo) -> anyhow::Result<Value>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope, SenderInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(&self, envelope: &Envelope, sender: &SenderInfo) -> anyhow::Result<Value> {
        (self.f)(envelope.clone(), sender.clone()).await
    }
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Envelope, SenderInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

struct Registered {
    id: u64,
    handler: Arc<dyn MessageHandler>,
}

/// Guard returned by registration. Unregisters exactly the instance that was
/// registered; dropping the guard without calling [`ListenerGuard::unregister`]
/// leaves the handler in place.
pub struct ListenerGuard {
    registry: Weak<HandlerRegistry>,
    action: String,
    id: u64,
}

impl ListenerGuard {
    /// Remove the handler this guard was issued for. Returns whether it was
    /// still registered.
    pub fn unregister(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        registry.remove(&self.action, self.id)
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    entries: Mutex<HashMap<String, Vec<Registered>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add(
        self: Arc<Self>,
        action: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> ListenerGuard {
        let action = action.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .entry(action.clone())
            .or_default()
            .push(Registered { id, handler });
        ListenerGuard {
            registry: Arc::downgrade(&self),
            action,
            id,
        }
    }

    fn remove(&self, action: &str, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let Some(handlers) = entries.get_mut(action) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|registered| registered.id != id);
        let removed = handlers.len() != before;
        // The entry itself goes away once its handler list is empty.
        if handlers.is_empty() {
            entries.remove(action);
        }
        removed
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn action_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn handler_count(&self, action: &str) -> usize {
        self.entries.lock().get(action).map_or(0, Vec::len)
    }

    /// Run every handler registered for the envelope's action.
    ///
    /// `None` means no handlers are registered (the caller closes the reply
    /// channel). Handlers run outside the registry lock, so they may freely
    /// register or unregister during dispatch.
    pub(crate) async fn dispatch(&self, envelope: &Envelope, sender: &SenderInfo) -> Option<Reply> {
        let action = envelope.action.as_deref()?;
        let handlers: Vec<Arc<dyn MessageHandler>> = {
            let entries = self.entries.lock();
            let registered = entries.get(action)?;
            registered.iter().map(|r| r.handler.clone()).collect()
        };
        if handlers.is_empty() {
            return None;
        }

        let mut winner: Option<Value> = None;
        let mut errors: Vec<String> = Vec::new();
        let mut first_kind = None;
        for handler in handlers {
            match handler.handle(envelope, sender).await {
                Ok(data) => {
                    if winner.is_none() {
                        winner = Some(data);
                    }
                }
                Err(err) => {
                    if first_kind.is_none() {
                        first_kind = err.downcast_ref::<HandlerError>().map(|e| e.kind);
                    }
                    errors.push(err.to_string());
                }
            }
        }

        Some(match winner {
            Some(data) => Reply::ok(data),
            None => Reply::fail(first_kind, errors.join("; ")),
        })
    }
}
