//! Registration and reliable-push behavior against a live registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use cairn_core::wire::{Envelope, RegisterOutcome, ACK_TIMEOUT, MAX_ATTEMPTS};

use crate::*;

#[tokio::test]
async fn duplicate_active_name_is_rejected() {
    let registry = spawn_registry().await;

    let _first = TestPeer::join(registry, "heyy", 5001).await;

    let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let outcome = raw_register(&second, registry, "heyy", 5002).await;
    assert_eq!(outcome, RegisterOutcome::NameTaken);

    // A different name from the same socket is fine afterwards.
    let outcome = raw_register(&second, registry, "weee", 5002).await;
    assert_eq!(outcome, RegisterOutcome::Ok);
}

#[tokio::test]
async fn silent_peer_gets_three_pushes_then_goes_offline() {
    let registry = spawn_registry().await;

    // Register but never ack anything: the tap only records.
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let outcome = raw_register(&socket, registry, "deaf", 5001).await;
    assert_eq!(outcome, RegisterOutcome::Ok);
    let mut seen = tap_socket(socket);

    // Initial push plus exactly two retransmits, then the registry gives up.
    // The window is 3 × 500 ms; wait it out with slack.
    tokio::time::sleep(ACK_TIMEOUT * 3 + Duration::from_millis(500)).await;
    let mut tables = 0;
    while let Ok(envelope) = seen.try_recv() {
        if matches!(envelope, Envelope::Table { .. }) {
            tables += 1;
        }
    }
    assert_eq!(tables, MAX_ATTEMPTS, "expected initial push + 2 retries");

    // Exhaustion flipped the record offline, so the name is free again.
    let replacement = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let outcome = raw_register(&replacement, registry, "deaf", 5002).await;
    assert_eq!(outcome, RegisterOutcome::Ok);
}

#[tokio::test]
async fn fresh_peer_receives_the_existing_offerings() {
    let registry = spawn_registry().await;

    let mut owner = TestPeer::join(registry, "heyy", 5001).await;
    assert!(owner.offer(&["1.txt"]).await);

    // The table push that welcomes a new peer carries the current view.
    let late = TestPeer::join(registry, "late", 5009).await;
    wait_until("welcome push to reach the new peer", || {
        late.cache.lookup("1.txt", "heyy").is_some()
    })
    .await;
    assert_eq!(late.cache.lookup("1.txt", "heyy").unwrap().tcp_port, 5001);
}

#[tokio::test]
async fn offline_peer_is_excluded_from_broadcasts() {
    let registry = spawn_registry().await;

    // One deaf peer exhausts its welcome push and goes offline.
    let deaf_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    raw_register(&deaf_socket, registry, "deaf", 5001).await;
    let mut seen = tap_socket(deaf_socket);
    tokio::time::sleep(ACK_TIMEOUT * 3 + Duration::from_millis(500)).await;
    while seen.try_recv().is_ok() {}

    // A live peer's offer triggers a broadcast; the offline record must not
    // be a target (no datagram reaches the deaf socket).
    let mut owner = TestPeer::join(registry, "heyy", 5002).await;
    assert!(owner.offer(&["a.txt"]).await);
    wait_until("owner to see its own offering", || {
        owner.cache.lookup("a.txt", "heyy").is_some()
    })
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(seen.try_recv().is_err(), "offline peer still receives pushes");
}
