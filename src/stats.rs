//! Message counters and timing averages.
//!
//! Counters are raw and monotonic; rates and averages are derived at read
//! time so rounding never compounds across increments. Reset swaps the whole
//! counter block under one lock, so a request completing concurrently cannot
//! partially resurrect cleared fields.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
struct Counters {
    sent: u64,
    succeeded: u64,
    failed: u64,
    timed_out: u64,
    received: u64,
    handled: u64,
    total_response_ms: u64,
    responses: u64,
}

/// Derived snapshot returned by `get_statistics()`.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub sent: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub received: u64,
    pub handled: u64,
    /// Percentage of sent messages that resolved successfully.
    pub success_rate: f64,
    pub avg_response_ms: f64,
}

#[derive(Default)]
pub(crate) struct StatisticsCollector {
    counters: Mutex<Counters>,
}

impl StatisticsCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&self) {
        self.counters.lock().sent += 1;
    }

    pub(crate) fn record_success(&self, elapsed: Duration) {
        let mut counters = self.counters.lock();
        counters.succeeded += 1;
        counters.responses += 1;
        counters.total_response_ms += elapsed.as_millis() as u64;
    }

    pub(crate) fn record_failure(&self) {
        self.counters.lock().failed += 1;
    }

    pub(crate) fn record_timeout(&self) {
        self.counters.lock().timed_out += 1;
    }

    pub(crate) fn record_received(&self) {
        self.counters.lock().received += 1;
    }

    pub(crate) fn record_handled(&self) {
        self.counters.lock().handled += 1;
    }

    pub(crate) fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }

    pub(crate) fn snapshot(&self) -> Statistics {
        let counters = self.counters.lock().clone();
        let success_rate = if counters.sent == 0 {
            0.0
        } else {
            counters.succeeded as f64 / counters.sent as f64 * 100.0
        };
        let avg_response_ms = if counters.responses == 0 {
            0.0
        } else {
            counters.total_response_ms as f64 / counters.responses as f64
        };
        Statistics {
            sent: counters.sent,
            succeeded: counters.succeeded,
            failed: counters.failed,
            timed_out: counters.timed_out,
            received: counters.received,
            handled: counters.handled,
            success_rate,
            avg_response_ms,
        }
    }
}
