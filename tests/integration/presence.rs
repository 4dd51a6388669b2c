use crate::*;

/// Nobody is registered under the requested name.
#[tokio::test]
async fn test_absent_peer_is_offline() {
    let broker = Broker::start().await.unwrap();

    let mut alice = broker.connect("alice", "bob").await.unwrap();
    alice.expect(b"offline").await.unwrap();

    assert!(broker.registry.lookup("alice").is_some());
    assert!(broker.registry.lookup("bob").is_none());
}

/// A registered peer yields `online` for the caller and a notification for the peer.
#[tokio::test]
async fn test_registered_peer_is_online_and_notified() {
    let broker = Broker::start().await.unwrap();

    let mut bob = broker.connect("bob", "alice").await.unwrap();
    bob.expect(b"offline").await.unwrap();

    let mut alice = broker.connect("alice", "bob").await.unwrap();
    alice.expect(b"online").await.unwrap();
    bob.expect(b"online").await.unwrap();
}

/// Line-oriented clients send their names with the trailing newline.
#[tokio::test]
async fn test_identities_are_trimmed() {
    let broker = Broker::start().await.unwrap();

    let mut bob = broker.connect("bob\n", "alice\n").await.unwrap();
    bob.expect(b"offline").await.unwrap();
    assert!(broker.registry.lookup("bob").is_some());

    let mut alice = broker.connect("alice\n", "bob\n").await.unwrap();
    alice.expect(b"online").await.unwrap();
}

/// Presence reflects the registry at handshake time, not later arrivals.
#[tokio::test]
async fn test_presence_reported_once() {
    let broker = Broker::start().await.unwrap();

    let mut alice = broker.connect("alice", "carol").await.unwrap();
    alice.expect(b"offline").await.unwrap();

    // bob wants alice, so alice hears `online` despite having asked for carol.
    let mut bob = broker.connect("bob", "alice").await.unwrap();
    bob.expect(b"online").await.unwrap();
    alice.expect(b"online").await.unwrap();
}
