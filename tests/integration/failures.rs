use crate::*;

/// Undecodable handshake: closed, nothing registered.
#[tokio::test]
async fn test_malformed_handshake_closes_connection() {
    let broker = Broker::start().await.unwrap();

    let mut client = broker.dial().await.unwrap();
    client.send(b"not json at all\n").await.unwrap();
    client.expect_closed().await.unwrap();

    assert!(broker.registry.is_empty());
}

/// A blank identity is rejected the same way.
#[tokio::test]
async fn test_blank_identity_rejected() {
    let broker = Broker::start().await.unwrap();

    let mut client = broker.connect("   ", "bob").await.unwrap();
    client.expect_closed().await.unwrap();

    assert!(broker.registry.is_empty());
}

/// A failed handshake does not disturb an established pair.
#[tokio::test]
async fn test_bad_client_does_not_affect_others() {
    let broker = Broker::start().await.unwrap();

    let mut alice = broker.connect("alice", "bob").await.unwrap();
    alice.expect(b"offline").await.unwrap();
    let mut bob = broker.connect("bob", "alice").await.unwrap();
    bob.expect(b"online").await.unwrap();
    alice.expect(b"online").await.unwrap();

    let mut junk = broker.dial().await.unwrap();
    junk.send(b"{\"name\": 7}").await.unwrap();
    junk.expect_closed().await.unwrap();

    bob.send(b"still here\n").await.unwrap();
    alice.expect(b"still here\n").await.unwrap();
}

/// When the peer disconnects, the survivor is closed and both entries go.
#[tokio::test]
async fn test_peer_disconnect_tears_down() {
    let broker = Broker::start().await.unwrap();

    let mut alice = broker.connect("alice", "bob").await.unwrap();
    alice.expect(b"offline").await.unwrap();
    let bob = broker.connect("bob", "alice").await.unwrap();
    alice.expect(b"online").await.unwrap();

    drop(bob);

    alice.expect_closed().await.unwrap();
    broker
        .wait_for_registry("bob removed", |r| r.lookup("bob").is_none())
        .await
        .unwrap();
    broker
        .wait_for_registry("alice removed", |r| r.lookup("alice").is_none())
        .await
        .unwrap();
}

/// A client that gives up while waiting for its peer is removed.
#[tokio::test]
async fn test_hangup_while_waiting() {
    let broker = Broker::start().await.unwrap();

    let mut alice = broker.connect("alice", "bob").await.unwrap();
    alice.expect(b"offline").await.unwrap();
    assert!(broker.registry.lookup("alice").is_some());

    drop(alice);

    broker
        .wait_for_registry("alice removed", |r| r.is_empty())
        .await
        .unwrap();
}

/// Reconnecting under the same name evicts and closes the older connection.
#[tokio::test]
async fn test_reconnect_evicts_previous() {
    let broker = Broker::start().await.unwrap();

    let mut first = broker.connect("alice", "bob").await.unwrap();
    first.expect(b"offline").await.unwrap();

    let mut second = broker.connect("alice", "bob").await.unwrap();
    second.expect(b"offline").await.unwrap();
    first.expect_closed().await.unwrap();

    let second_addr = second.local_addr().unwrap();
    let entry = broker.registry.lookup("alice").unwrap();
    assert_eq!(entry.connection.remote_addr(), second_addr);

    // The survivor still pairs normally.
    let mut bob = broker.connect("bob", "alice").await.unwrap();
    bob.expect(b"online").await.unwrap();
    second.expect(b"online").await.unwrap();
    bob.send(b"which alice?\n").await.unwrap();
    second.expect(b"which alice?\n").await.unwrap();
}

/// A peer that never shows up ends the wait once the bound passes.
#[tokio::test]
async fn test_peer_wait_bound() {
    let broker = Broker::start_with(SessionConfig {
        peer_wait_secs: 1,
        ..SessionConfig::default()
    })
    .await
    .unwrap();

    let mut alice = broker.connect("alice", "ghost").await.unwrap();
    alice.expect(b"offline").await.unwrap();
    alice.expect_closed().await.unwrap();

    assert!(broker.registry.is_empty());
}

/// Connections past the limit are refused; a slot frees when a session ends.
#[tokio::test]
async fn test_session_limit() {
    let broker = Broker::start_with(SessionConfig {
        max_sessions: 1,
        ..SessionConfig::default()
    })
    .await
    .unwrap();

    let mut alice = broker.connect("alice", "bob").await.unwrap();
    alice.expect(b"offline").await.unwrap();

    let mut refused = broker.dial().await.unwrap();
    refused.expect_closed().await.unwrap();
    assert_eq!(broker.registry.len(), 1);

    drop(alice);
    broker
        .wait_for_registry("alice removed", |r| r.is_empty())
        .await
        .unwrap();

    // The permit is released when the session task finishes, just after
    // the registry is corrected.
    let mut admitted = false;
    for _ in 0..50 {
        let mut carol = broker.connect("carol", "dave").await.unwrap();
        if carol.expect(b"offline").await.is_ok() {
            admitted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(admitted, "slot was never released");
}

/// A silent client is dropped after the handshake deadline.
#[tokio::test]
async fn test_silent_client_times_out() {
    let broker = Broker::start_with(SessionConfig {
        handshake_timeout_secs: 1,
        ..SessionConfig::default()
    })
    .await
    .unwrap();

    let mut client = broker.dial().await.unwrap();
    client.expect_closed().await.unwrap();
    assert!(broker.registry.is_empty());
}
