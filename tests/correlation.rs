//! End-to-end transport tests against an in-process fake peer.
//!
//! The fake peer drives the remote side of a memory duplex pair, which
//! lets these tests exercise the full client path: envelope merge,
//! correlation, out-of-order responses, heartbeats, and retry
//! composition.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use peerlink::transport::memory::{MemoryChannel, MemoryConnector, duplex_pair};
use peerlink::transport::{ChannelReader, ChannelWriter, Channel};
use peerlink::{
    ClientConfig, CorrelatedClient, Error, LinkEvent, ScheduleParams, schedule_action,
};

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a client wired to a fake-peer channel.
fn staged_client(config: ClientConfig) -> (CorrelatedClient<MemoryConnector>, MemoryChannel) {
    let (local, remote) = duplex_pair();
    let connector = MemoryConnector::new();
    connector.stage(local);
    let client = CorrelatedClient::new(connector, config).expect("client");
    (client, remote)
}

fn quiet_config() -> ClientConfig {
    ClientConfig::new().call_timeout(None).heartbeat_after(None)
}

/// Extracts `id` and `method` from an outbound frame.
fn frame_parts(text: &str) -> (u64, String) {
    let frame: Value = serde_json::from_str(text).expect("valid envelope");
    let id = frame["id"].as_u64().expect("numeric id");
    let method = frame["method"].as_str().unwrap_or_default().to_string();
    (id, method)
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn response_resolves_only_the_matching_call() {
    init_tracing();
    let (client, remote) = staged_client(quiet_config());
    client.connect().await.expect("connect");

    let first = client.clone();
    let call_a = tokio::spawn(async move { first.send(json!({"method": "a"})).await });
    let second = client.clone();
    let call_b = tokio::spawn(async move { second.send(json!({"method": "b"})).await });

    let (mut remote_tx, mut remote_rx) = remote.split();
    let frame_one = remote_rx.read().await.expect("frame").expect("text");
    let frame_two = remote_rx.read().await.expect("frame").expect("text");

    let (id_one, method_one) = frame_parts(&frame_one);
    let (id_two, _) = frame_parts(&frame_two);
    let (id_a, id_b) = if method_one == "a" {
        (id_one, id_two)
    } else {
        (id_two, id_one)
    };

    // Answer only call "a"; call "b" must stay pending.
    remote_tx
        .write(json!({"id": id_a, "data": "alpha"}).to_string())
        .await
        .expect("respond");

    let value = call_a.await.expect("task").expect("resolved");
    assert_eq!(value, json!("alpha"));
    assert!(!call_b.is_finished());
    assert_eq!(client.pending_count(), 1);

    // Now settle "b" too, out of order relative to send order.
    remote_tx
        .write(json!({"id": id_b, "data": "beta"}).to_string())
        .await
        .expect("respond");
    let value = call_b.await.expect("task").expect("resolved");
    assert_eq!(value, json!("beta"));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn stale_and_malformed_frames_are_ignored() {
    init_tracing();
    let (client, remote) = staged_client(quiet_config());
    client.connect().await.expect("connect");

    let caller = client.clone();
    let call = tokio::spawn(async move { caller.send(json!({"method": "a"})).await });

    let (mut remote_tx, mut remote_rx) = remote.split();
    let frame = remote_rx.read().await.expect("frame").expect("text");
    let (id, _) = frame_parts(&frame);

    // Garbage and unknown ids must not disturb the pending call.
    remote_tx.write("not json at all".to_string()).await.expect("write");
    remote_tx
        .write(json!({"id": id + 999, "data": "stray"}).to_string())
        .await
        .expect("write");
    remote_tx
        .write(json!({"no_id": true}).to_string())
        .await
        .expect("write");

    assert!(!call.is_finished());

    remote_tx
        .write(json!({"id": id, "data": "real"}).to_string())
        .await
        .expect("respond");
    let value = call.await.expect("task").expect("resolved");
    assert_eq!(value, json!("real"));
}

#[tokio::test]
async fn failure_envelope_rejects_with_peer_error() {
    init_tracing();
    let (client, remote) = staged_client(quiet_config());
    client.connect().await.expect("connect");

    let caller = client.clone();
    let call = tokio::spawn(async move { caller.send(json!({"method": "a"})).await });

    let (mut remote_tx, mut remote_rx) = remote.split();
    let frame = remote_rx.read().await.expect("frame").expect("text");
    let (id, _) = frame_parts(&frame);

    remote_tx
        .write(json!({"id": id, "error": {"message": "denied"}}).to_string())
        .await
        .expect("respond");

    let err = call.await.expect("task").expect_err("rejected");
    assert!(matches!(err, Error::Peer { message } if message == "denied"));
}

#[tokio::test(start_paused = true)]
async fn per_call_timeout_rejects_unanswered_call() {
    init_tracing();
    let (client, remote) = staged_client(
        ClientConfig::new()
            .call_timeout(Some(Duration::from_millis(200)))
            .heartbeat_after(None),
    );
    client.connect().await.expect("connect");
    let (_remote_tx, _remote_rx) = remote.split();

    let err = client
        .send(json!({"method": "never-answered"}))
        .await
        .expect_err("times out");
    assert!(matches!(err, Error::CallTimeout { .. }));
    assert_eq!(client.pending_count(), 0);
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn heartbeat_probe_fires_after_silence_and_recurs() {
    init_tracing();
    let (client, remote) = staged_client(
        ClientConfig::new()
            .call_timeout(None)
            .heartbeat_after(Some(Duration::from_millis(100)))
            .heartbeat_probe(json!({"method": "ping"})),
    );

    let events: Arc<Mutex<Vec<LinkEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    client.register_observer(Arc::new(move |event: &LinkEvent| {
        sink.lock().push(*event);
    }));

    client.connect().await.expect("connect");
    let (_remote_tx, mut remote_rx) = remote.split();

    let probe = remote_rx.read().await.expect("frame").expect("text");
    assert_eq!(probe, json!({"method": "ping"}).to_string());

    // The timer re-arms after each probe.
    let probe = remote_rx.read().await.expect("frame").expect("text");
    assert_eq!(probe, json!({"method": "ping"}).to_string());

    let events = events.lock();
    assert!(events.contains(&LinkEvent::Connected));
    assert_eq!(
        events
            .iter()
            .filter(|event| **event == LinkEvent::HeartbeatSent)
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn sends_reset_the_liveness_timer() {
    init_tracing();
    let (client, remote) = staged_client(
        ClientConfig::new()
            .call_timeout(None)
            .heartbeat_after(Some(Duration::from_millis(100))),
    );
    client.connect().await.expect("connect");
    let (_remote_tx, mut remote_rx) = remote.split();

    // Keep the channel busy for a while; no probe may slip in between.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let caller = client.clone();
        tokio::spawn(async move { caller.send(json!({"method": "work"})).await });
        let frame = remote_rx.read().await.expect("frame").expect("text");
        let (_, method) = frame_parts(&frame);
        assert_eq!(method, "work");
    }

    // Silence from here on: the next frame is the probe.
    let frame = remote_rx.read().await.expect("frame").expect("text");
    let (_, method) = frame_parts(&frame);
    assert_eq!(method, "ping");
}

// ============================================================================
// Retry Composition
// ============================================================================

#[tokio::test]
async fn schedule_action_retries_send_until_peer_accepts() {
    init_tracing();
    let (client, remote) = staged_client(quiet_config());
    client.connect().await.expect("connect");

    // Fake peer: reject the first two calls, accept the third.
    tokio::spawn(async move {
        let (mut remote_tx, mut remote_rx) = remote.split();
        let mut seen = 0u32;
        while let Some(Ok(frame)) = remote_rx.read().await {
            let (id, _) = frame_parts(&frame);
            seen += 1;
            let reply = if seen < 3 {
                json!({"id": id, "error": {"message": "busy"}})
            } else {
                json!({"id": id, "data": {"accepted": true}})
            };
            if remote_tx.write(reply.to_string()).await.is_err() {
                break;
            }
        }
    });

    let caller = client.clone();
    let value = schedule_action(
        move |_scope| {
            let client = caller.clone();
            async move { client.send(json!({"method": "enroll"})).await }
        },
        ScheduleParams::new().attempts(5),
    )
    .await
    .expect("third attempt accepted");

    assert_eq!(value, json!({"accepted": true}));
}
