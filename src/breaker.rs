//! Failure-rate gate shared by all sends from one service instance.
//!
//! Closed → Open after `threshold` consecutive transport-level failures;
//! Open → HalfOpen after the cooldown, permitting exactly one probe;
//! HalfOpen → Closed on probe success, back to Open on probe failure.
//! Only transport-health signals (transport errors, timeouts) count as
//! failures; an application-level failure reply proves the transport works.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub(crate) struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub(crate) fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// Gate check before a send attempt. `Err(remaining)` blocks the send
    /// without touching the correlator. An expired cooldown transitions to
    /// HalfOpen and admits the caller as the single probe.
    pub(crate) fn check(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::ZERO, |at| at.elapsed());
                if elapsed >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!("circuit breaker half-open, admitting one probe");
                    Ok(())
                } else {
                    Err(self.cooldown - elapsed)
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(Duration::ZERO)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Reset the counter and force Closed.
    pub(crate) fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed || inner.failure_count > 0 {
            tracing::info!(
                previous_failures = inner.failure_count,
                "circuit breaker closed after success"
            );
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub(crate) fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                tracing::warn!("circuit breaker probe failed, reopening");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.threshold {
                    tracing::warn!(
                        failure_count = inner.failure_count,
                        threshold = self.threshold,
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "failure threshold reached, opening circuit breaker"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Cancelled sends are neither health nor sickness; they only release a
    /// half-open probe slot so cleanup cannot wedge the breaker.
    pub(crate) fn record_cancelled(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    pub(crate) fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub(crate) fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Remaining cooldown while Open, `None` otherwise.
    pub(crate) fn remaining_cooldown(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != BreakerState::Open {
            return None;
        }
        let elapsed = inner.opened_at.map_or(Duration::ZERO, |at| at.elapsed());
        Some(self.cooldown.saturating_sub(elapsed))
    }
}
