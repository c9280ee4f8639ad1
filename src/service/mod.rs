//! `MessageService`: the public facade.
//!
//! Composes the correlator, retry policy, circuit breaker, handler registry,
//! and statistics behind one object per execution context. Collaborators are
//! injected through the constructor; the service owns no global state.
//!
//! No error type crosses this boundary: every send resolves to a
//! [`SendResult`] and callers branch on `success`.

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::MessagingConfig;
use crate::correlation::{PendingRequestInfo, RequestCorrelator};
use crate::error::ErrorKind;
use crate::message::{CorrelationIds, Envelope, SendResult, Source};
use crate::registry::{HandlerRegistry, ListenerGuard, MessageHandler};
use crate::retry::{RetryOptions, RetryPolicy};
use crate::stats::{Statistics, StatisticsCollector};
use crate::transport::{InboundListener, ReplyHandle, SenderInfo, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Administrative snapshot returned by [`MessageService::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub instance_id: String,
    pub initialized: bool,
    pub pending_requests: usize,
    pub max_pending_requests: usize,
    pub breaker_state: BreakerState,
    pub breaker_failure_count: u32,
    pub breaker_cooldown_remaining_ms: Option<u64>,
    pub registered_actions: usize,
}

struct ServiceInner {
    instance_id: String,
    config: MessagingConfig,
    transport: Arc<dyn Transport>,
    correlator: RequestCorrelator,
    breaker: CircuitBreaker,
    registry: Arc<HandlerRegistry>,
    stats: StatisticsCollector,
    ids: CorrelationIds,
    /// The exact listener instance occupying the transport slot, kept so
    /// cleanup unregisters the same instance it registered.
    listener: Mutex<Option<Arc<dyn InboundListener>>>,
}

/// One per execution context. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MessageService {
    inner: Arc<ServiceInner>,
}

struct ServiceListener {
    inner: Weak<ServiceInner>,
}

#[async_trait]
impl InboundListener for ServiceListener {
    async fn on_message(&self, envelope: Envelope, sender: SenderInfo, reply: ReplyHandle) {
        // A service that was cleaned up while a delivery was in flight just
        // drops the message.
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_inbound(envelope, sender, reply).await;
        }
    }
}

impl MessageService {
    pub fn new(transport: Arc<dyn Transport>, config: MessagingConfig) -> Self {
        let full = Uuid::new_v4().simple().to_string();
        let instance_id = full[..8].to_string();
        let inner = Arc::new(ServiceInner {
            correlator: RequestCorrelator::new(config.max_pending_requests),
            breaker: CircuitBreaker::new(
                config.breaker.failure_threshold,
                config.cooldown(),
            ),
            registry: HandlerRegistry::new(),
            stats: StatisticsCollector::new(),
            ids: CorrelationIds::new(&instance_id),
            listener: Mutex::new(None),
            instance_id,
            config,
            transport,
        });
        Self { inner }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Claim the transport's inbound-listener slot. Idempotent, and always
    /// re-registers: the host may have silently dropped an earlier
    /// registration across a reload, so every call reclaims the slot.
    pub fn initialize(&self) {
        let listener = {
            let mut slot = self.inner.listener.lock();
            slot.get_or_insert_with(|| {
                Arc::new(ServiceListener {
                    inner: Arc::downgrade(&self.inner),
                }) as Arc<dyn InboundListener>
            })
            .clone()
        };
        let displaced = self.inner.transport.register_inbound_listener(listener);
        if displaced {
            tracing::debug!(
                transport = self.inner.transport.name(),
                "displaced a stale inbound listener registration"
            );
        }
        tracing::info!(
            instance = %self.inner.instance_id,
            transport = self.inner.transport.name(),
            "message service initialized"
        );
    }

    /// Release the listener slot, cancel all pending requests, and clear the
    /// handler registry. Idempotent.
    pub fn cleanup(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            self.inner.transport.unregister_inbound_listener(&listener);
        }
        let cancelled = self.inner.correlator.cancel_all();
        self.inner.registry.clear();
        tracing::info!(
            instance = %self.inner.instance_id,
            cancelled,
            "message service cleaned up"
        );
    }

    /// Register a handler for an action. Multiple handlers per action fan
    /// out; the returned guard unregisters exactly this registration.
    pub fn add_message_listener(
        &self,
        action: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> ListenerGuard {
        self.inner.registry.clone().add(action, handler)
    }

    /// Send a request and wait for its terminal outcome. `None` timeout uses
    /// the configured default.
    pub async fn send_message(&self, envelope: Envelope, timeout: Option<Duration>) -> SendResult {
        let inner = &self.inner;
        // Every attempt counts as sent, including ones the breaker blocks,
        // so `failed` never exceeds `sent` in the snapshot.
        inner.stats.record_sent();

        // Gate before touching the correlator; an open breaker consumes
        // nothing.
        if let Err(remaining) = inner.breaker.check() {
            inner.stats.record_failure();
            return SendResult::failure(
                ErrorKind::CircuitOpen,
                format!(
                    "circuit breaker open, retry in {}ms",
                    remaining.as_millis()
                ),
            );
        }

        let id = inner.ids.next();
        let timeout = timeout.unwrap_or_else(|| inner.config.default_timeout());
        let started = Instant::now();
        let result = inner
            .correlator
            .send(&inner.transport, envelope, id, timeout)
            .await;

        match result.kind {
            None if result.success => {
                inner.breaker.record_success();
                inner.stats.record_success(started.elapsed());
            }
            Some(ErrorKind::Timeout) => {
                inner.breaker.record_failure();
                inner.stats.record_timeout();
            }
            Some(ErrorKind::Transport) => {
                inner.breaker.record_failure();
                inner.stats.record_failure();
            }
            Some(ErrorKind::Cancelled) => {
                inner.breaker.record_cancelled();
                inner.stats.record_failure();
            }
            // Local backpressure: the transport was never consulted, so the
            // breaker learns nothing either way.
            Some(ErrorKind::Backpressure) => {
                inner.stats.record_failure();
            }
            // Application-level failure replies: the round trip worked, so
            // the transport is healthy.
            _ => {
                inner.breaker.record_success();
                inner.stats.record_failure();
            }
        }
        result
    }

    /// Send with exponential backoff. Non-retryable outcomes short-circuit
    /// immediately, even on the first attempt; a blocked breaker aborts the
    /// loop without consuming the budget.
    pub async fn send_message_with_retry(
        &self,
        envelope: Envelope,
        options: RetryOptions,
    ) -> SendResult {
        let policy = RetryPolicy::new(options.retry_delay, options.max_delay);
        let mut last = SendResult::failure(ErrorKind::Cancelled, "no attempt made");
        for attempt in 0..=options.max_retries {
            let result = self
                .send_message(envelope.clone(), Some(options.timeout))
                .await;
            if result.success || result.circuit_breaker_open || !result.is_retryable() {
                return result;
            }
            last = result;
            if attempt < options.max_retries {
                let delay = policy.delay(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "send failed with retryable outcome, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
        tracing::warn!(
            max_retries = options.max_retries,
            "retry budget exhausted"
        );
        last.with_retries_exhausted()
    }

    pub fn get_statistics(&self) -> Statistics {
        self.inner.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.inner.stats.reset();
    }

    pub fn get_status(&self) -> ServiceStatus {
        ServiceStatus {
            instance_id: self.inner.instance_id.clone(),
            initialized: self.inner.listener.lock().is_some(),
            pending_requests: self.inner.correlator.pending_count(),
            max_pending_requests: self.inner.config.max_pending_requests,
            breaker_state: self.inner.breaker.state(),
            breaker_failure_count: self.inner.breaker.failure_count(),
            breaker_cooldown_remaining_ms: self
                .inner
                .breaker
                .remaining_cooldown()
                .map(|d| d.as_millis() as u64),
            registered_actions: self.inner.registry.action_count(),
        }
    }

    pub fn get_pending_requests(&self) -> Vec<PendingRequestInfo> {
        self.inner.correlator.snapshot()
    }

    pub fn cancel_request(&self, correlation_id: &str) -> bool {
        self.inner.correlator.cancel(correlation_id)
    }

    pub fn cancel_all_requests(&self) -> usize {
        self.inner.correlator.cancel_all()
    }
}

impl ServiceInner {
    async fn handle_inbound(&self, envelope: Envelope, sender: SenderInfo, reply: ReplyHandle) {
        self.stats.record_received();

        // Service-tagged traffic is reply plumbing; it never reaches user
        // handlers, which is what prevents feedback loops.
        if envelope.source == Source::Service {
            if let Some(id) = envelope.correlation_id.clone() {
                let result = SendResult::from_reply(envelope.as_reply());
                if self.correlator.resolve(&id, result).is_none() {
                    tracing::debug!(correlation_id = %id, "late or unknown reply dropped");
                }
            }
            return;
        }

        match self.registry.dispatch(&envelope, &sender).await {
            None => {
                tracing::trace!(
                    action = envelope.action.as_deref().unwrap_or(""),
                    "no handlers registered, closing reply channel"
                );
                drop(reply);
            }
            Some(body) => {
                self.stats.record_handled();
                let out = Envelope::reply_to(&envelope, &body);
                if !reply.send(out.clone()) {
                    // No live reply channel for this delivery; fall back to a
                    // one-way reply envelope the peer can correlate.
                    if out.correlation_id.is_some() {
                        if let Err(err) = self.transport.send_one_way(out).await {
                            tracing::warn!(error = %err, "failed to deliver reply envelope");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::handler_fn;
    use crate::transport::local::LocalTransport;
    use serde_json::json;

    fn service_pair() -> (MessageService, MessageService, Arc<LocalTransport>, Arc<LocalTransport>) {
        let (a, b) = LocalTransport::pair("panel", "background");
        let svc_a = MessageService::new(a.clone(), MessagingConfig::default());
        let svc_b = MessageService::new(b.clone(), MessagingConfig::default());
        svc_a.initialize();
        svc_b.initialize();
        (svc_a, svc_b, a, b)
    }

    #[tokio::test]
    async fn initialize_and_cleanup_are_idempotent() {
        let (a, _b) = LocalTransport::pair("panel", "background");
        let service = MessageService::new(a.clone(), MessagingConfig::default());

        service.initialize();
        service.initialize();
        assert!(service.get_status().initialized);
        assert!(a.has_listener());

        service.cleanup();
        service.cleanup();
        assert!(!service.get_status().initialized);
        assert!(!a.has_listener());
    }

    #[tokio::test]
    async fn initialize_reclaims_a_dropped_slot() {
        let (a, _b) = LocalTransport::pair("panel", "background");
        let service = MessageService::new(a.clone(), MessagingConfig::default());

        service.initialize();
        // Host silently drops the registration (reload).
        {
            let listener = service.inner.listener.lock().clone().unwrap();
            a.unregister_inbound_listener(&listener);
        }
        assert!(!a.has_listener());

        service.initialize();
        assert!(a.has_listener());
    }

    #[tokio::test]
    async fn service_tagged_traffic_never_reaches_handlers() {
        let (svc_a, svc_b, _ta, _tb) = service_pair();
        let _guard = svc_b.add_message_listener(
            "echo",
            handler_fn(|_, _| async { Ok(json!("should not fire")) }),
        );

        let mut envelope = Envelope::request("echo");
        envelope.source = Source::Service;
        envelope.correlation_id = Some("unknown-1-0".to_string());
        let result = svc_a.send_message(envelope, Some(Duration::from_millis(80))).await;

        // The callee treats it as reply plumbing with an unknown id and
        // drops it, so the caller times out instead of getting the handler's
        // reply.
        assert!(!result.success);
        assert!(result.timeout);
        assert_eq!(svc_b.get_statistics().handled, 0);
    }

    #[tokio::test]
    async fn status_reflects_breaker_and_pending_state() {
        let (svc_a, _svc_b, _ta, _tb) = service_pair();
        let status = svc_a.get_status();
        assert!(status.initialized);
        assert_eq!(status.pending_requests, 0);
        assert_eq!(status.breaker_state, BreakerState::Closed);
        assert_eq!(status.breaker_cooldown_remaining_ms, None);
    }
}
