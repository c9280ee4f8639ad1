//! Integration tests for circuit breaker behavior.
//!
//! Drives the breaker through the service facade: consecutive transport
//! failures open it, the cooldown admits one probe, and a probe success
//! closes it again.

use crosswire::{
    handler_fn, Envelope, ErrorKind, LocalTransport, MessageService, MessagingConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn breaker_pair(
    threshold: u32,
    cooldown_ms: u64,
) -> (MessageService, MessageService, Arc<LocalTransport>) {
    let mut config = MessagingConfig::default();
    config.breaker.failure_threshold = threshold;
    config.breaker.cooldown_ms = cooldown_ms;

    let (a, b) = LocalTransport::pair("panel", "background");
    let caller = MessageService::new(a.clone(), config.clone());
    let callee = MessageService::new(b, config);
    caller.initialize();
    callee.initialize();
    // The guard is dropped here; handlers stay registered until explicitly
    // unregistered or cleaned up.
    let _ = callee.add_message_listener("ping", handler_fn(|_, _| async { Ok(json!("pong")) }));
    (caller, callee, a)
}

#[tokio::test]
async fn breaker_opens_after_threshold_consecutive_failures() {
    let (caller, _callee, transport) = breaker_pair(3, 60_000);
    transport.set_fail_sends(true);

    for _ in 0..3 {
        let result = caller
            .send_message(Envelope::request("ping"), Some(Duration::from_millis(100)))
            .await;
        assert!(!result.success);
        assert!(!result.circuit_breaker_open, "breaker must not trip early");
    }

    // Fourth send is blocked by the open breaker without reaching the
    // transport, even though sends would now succeed.
    transport.set_fail_sends(false);
    let started = Instant::now();
    let result = caller
        .send_message(Envelope::request("ping"), Some(Duration::from_secs(5)))
        .await;

    assert!(!result.success);
    assert!(result.circuit_breaker_open);
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(caller.get_pending_requests().len(), 0);
}

#[tokio::test]
async fn cooldown_admits_one_probe_which_closes_on_success() {
    let (caller, _callee, transport) = breaker_pair(2, 100);
    transport.set_fail_sends(true);

    for _ in 0..2 {
        caller
            .send_message(Envelope::request("ping"), Some(Duration::from_millis(100)))
            .await;
    }
    assert!(caller
        .send_message(Envelope::request("ping"), Some(Duration::from_millis(100)))
        .await
        .circuit_breaker_open);

    // Heal the transport and wait out the cooldown.
    transport.set_fail_sends(false);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // The probe goes through and closes the breaker.
    let probe = caller
        .send_message(Envelope::request("ping"), Some(Duration::from_secs(1)))
        .await;
    assert!(probe.success, "probe should succeed: {probe:?}");

    let after = caller
        .send_message(Envelope::request("ping"), Some(Duration::from_secs(1)))
        .await;
    assert!(after.success);
    assert_eq!(caller.get_status().breaker_failure_count, 0);
}

#[tokio::test]
async fn failed_probe_reopens_the_breaker() {
    let (caller, _callee, transport) = breaker_pair(1, 80);
    transport.set_fail_sends(true);

    caller
        .send_message(Envelope::request("ping"), Some(Duration::from_millis(100)))
        .await;
    assert!(caller
        .send_message(Envelope::request("ping"), Some(Duration::from_millis(100)))
        .await
        .circuit_breaker_open);

    // Cooldown elapses but the transport is still broken: the one probe
    // fails and the circuit reopens.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let probe = caller
        .send_message(Envelope::request("ping"), Some(Duration::from_millis(100)))
        .await;
    assert!(!probe.success);
    assert!(!probe.circuit_breaker_open, "the probe itself reaches the transport");

    let blocked = caller
        .send_message(Envelope::request("ping"), Some(Duration::from_millis(100)))
        .await;
    assert!(blocked.circuit_breaker_open);
}

#[tokio::test]
async fn backpressure_rejections_do_not_trip_the_breaker() {
    let mut config = MessagingConfig::default();
    config.max_pending_requests = 1;
    config.breaker.failure_threshold = 2;
    config.breaker.cooldown_ms = 60_000;

    let (a, b) = LocalTransport::pair("panel", "background");
    let caller = MessageService::new(a, config.clone());
    let callee = MessageService::new(b, config);
    caller.initialize();
    callee.initialize();
    let _ping = callee.add_message_listener("ping", handler_fn(|_, _| async { Ok(json!("pong")) }));
    let _hang = callee.add_message_listener(
        "hang",
        handler_fn(|_, _| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!(null))
        }),
    );

    // Fill the single pending slot, then get rejected twice at the cap. The
    // transport is perfectly healthy throughout.
    let hanging = {
        let caller = caller.clone();
        tokio::spawn(async move {
            caller
                .send_message(Envelope::request("hang"), Some(Duration::from_secs(10)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    for _ in 0..2 {
        let rejected = caller
            .send_message(Envelope::request("ping"), Some(Duration::from_secs(1)))
            .await;
        assert!(!rejected.success);
        assert_eq!(rejected.kind, Some(ErrorKind::Backpressure));
        assert!(!rejected.circuit_breaker_open);
    }

    // Drain the slot; subsequent sends must go straight through.
    caller.cancel_all_requests();
    let _ = hanging.await;
    let result = caller
        .send_message(Envelope::request("ping"), Some(Duration::from_secs(1)))
        .await;
    assert!(result.success, "breaker must stay closed after backpressure: {result:?}");
    assert_eq!(caller.get_status().breaker_failure_count, 0);
}

#[tokio::test]
async fn blocked_sends_still_count_as_sent_in_statistics() {
    let (caller, _callee, transport) = breaker_pair(1, 60_000);
    transport.set_fail_sends(true);

    caller
        .send_message(Envelope::request("ping"), Some(Duration::from_millis(100)))
        .await;
    let blocked = caller
        .send_message(Envelope::request("ping"), Some(Duration::from_millis(100)))
        .await;
    assert!(blocked.circuit_breaker_open);

    let stats = caller.get_statistics();
    assert_eq!(stats.sent, 2, "blocked attempts count as sent");
    assert_eq!(stats.failed, 2);
    assert!(stats.failed <= stats.sent);
}

#[tokio::test]
async fn application_failures_do_not_trip_the_breaker() {
    let mut config = MessagingConfig::default();
    config.breaker.failure_threshold = 2;

    let (a, b) = LocalTransport::pair("panel", "background");
    let caller = MessageService::new(a, config.clone());
    let callee = MessageService::new(b, config);
    caller.initialize();
    callee.initialize();
    let _guard = callee.add_message_listener(
        "reject",
        handler_fn(|_, _| async { Err(anyhow::anyhow!("domain says no")) }),
    );

    // Plenty of app-level failures: round trips work, so the breaker stays
    // closed.
    for _ in 0..5 {
        let result = caller
            .send_message(Envelope::request("reject"), Some(Duration::from_secs(1)))
            .await;
        assert!(!result.success);
        assert!(!result.circuit_breaker_open);
    }

    let status = caller.get_status();
    assert_eq!(status.breaker_failure_count, 0);
}
