//! Outbound request tracking.
//!
//! One entry per in-flight send, keyed by correlation id. Exactly one
//! terminal transition fires per entry: resolved, timed out, cancelled, or
//! transport error. Both the reply path and the timer path remove the entry
//! before resolving, so a race between them can never double-resolve.

use crate::error::{ErrorKind, TransportError};
use crate::message::{Envelope, SendResult};
use crate::transport::Transport;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

struct PendingRequest {
    resolver: oneshot::Sender<SendResult>,
    sent_at: Instant,
    action: Option<String>,
}

/// Snapshot of one in-flight request, for the administrative surface.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequestInfo {
    pub correlation_id: String,
    pub action: Option<String>,
    pub age_ms: u64,
}

pub(crate) struct RequestCorrelator {
    pending: Mutex<HashMap<String, PendingRequest>>,
    max_pending: usize,
}

impl RequestCorrelator {
    pub(crate) fn new(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_pending: max_pending.max(1),
        }
    }

    /// Send `envelope` under `id` and wait for its terminal outcome.
    ///
    /// Fails fast when the pending cap is reached: no entry, no timer. If the
    /// transport refuses the send, the entry is cleared immediately and the
    /// caller never starts waiting.
    pub(crate) async fn send(
        &self,
        transport: &Arc<dyn Transport>,
        mut envelope: Envelope,
        id: String,
        timeout: Duration,
    ) -> SendResult {
        let mut rx = {
            let mut pending = self.pending.lock();
            if pending.len() >= self.max_pending {
                tracing::warn!(
                    pending = pending.len(),
                    cap = self.max_pending,
                    "pending-request cap reached, rejecting send"
                );
                return SendResult::failure(
                    ErrorKind::Backpressure,
                    format!("pending request cap reached ({})", self.max_pending),
                );
            }
            let (tx, rx) = oneshot::channel();
            pending.insert(
                id.clone(),
                PendingRequest {
                    resolver: tx,
                    sent_at: Instant::now(),
                    action: envelope.action.clone(),
                },
            );
            rx
        };

        envelope.correlation_id = Some(id.clone());
        if let Err(err) = transport.send_one_way(envelope).await {
            self.remove(&id);
            return match err {
                TransportError::Send(msg) => SendResult::failure(ErrorKind::Transport, msg),
                other => SendResult::failure(ErrorKind::Transport, other.to_string()),
            };
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            // Resolver dropped without a value: explicit cancellation.
            Ok(Err(_)) => SendResult::failure(ErrorKind::Cancelled, "request cancelled"),
            Err(_elapsed) => {
                if self.remove(&id).is_some() {
                    tracing::debug!(correlation_id = %id, "request timed out");
                    SendResult::failure(ErrorKind::Timeout, "no reply before deadline")
                } else {
                    // A reply won the race against the timer; it is already
                    // buffered in the channel.
                    match rx.try_recv() {
                        Ok(result) => result,
                        Err(_) => SendResult::failure(ErrorKind::Cancelled, "request cancelled"),
                    }
                }
            }
        }
    }

    fn remove(&self, id: &str) -> Option<PendingRequest> {
        self.pending.lock().remove(id)
    }

    /// Resolve the pending request matching `id`. Returns the round-trip
    /// elapsed time on a match, `None` for late or unknown replies (which
    /// are dropped by the caller).
    pub(crate) fn resolve(&self, id: &str, result: SendResult) -> Option<Duration> {
        let entry = self.pending.lock().remove(id)?;
        let elapsed = entry.sent_at.elapsed();
        // The receiver may already be gone (caller timed out between our
        // remove and this send); single resolution still holds.
        let _ = entry.resolver.send(result);
        Some(elapsed)
    }

    /// Explicit abort: drops the resolver without a value, which the waiting
    /// side reports as a cancelled outcome.
    pub(crate) fn cancel(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    pub(crate) fn cancel_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<PendingRequestInfo> {
        self.pending
            .lock()
            .iter()
            .map(|(id, entry)| PendingRequestInfo {
                correlation_id: id.clone(),
                action: entry.action.clone(),
                age_ms: entry.sent_at.elapsed().as_millis() as u64,
            })
            .collect()
    }
}
