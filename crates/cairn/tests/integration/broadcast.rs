//! Offer and deregistration fan-out: every active peer converges on the
//! registry's view.

use crate::*;

#[tokio::test]
async fn offer_reaches_every_registered_peer() {
    let registry = spawn_registry().await;

    let mut a = TestPeer::join(registry, "a", 5001).await;
    let b = TestPeer::join(registry, "b", 5002).await;
    let c = TestPeer::join(registry, "c", 5003).await;

    assert!(a.offer(&["jjs.jpg", "wee.txt"]).await);

    for (name, peer) in [("a", &a), ("b", &b), ("c", &c)] {
        wait_until(&format!("peer {name} to see the offerings"), || {
            peer.cache.lookup("jjs.jpg", "a").is_some()
                && peer.cache.lookup("wee.txt", "a").is_some()
        })
        .await;
        assert_eq!(peer.cache.snapshot().len(), 2);
    }
}

#[tokio::test]
async fn repeated_offer_is_idempotent() {
    let registry = spawn_registry().await;
    let mut a = TestPeer::join(registry, "a", 5001).await;

    assert!(a.offer(&["dup.txt", "dup.txt"]).await);
    assert!(a.offer(&["dup.txt"]).await);

    wait_until("offer to land", || a.cache.lookup("dup.txt", "a").is_some()).await;
    assert_eq!(a.cache.snapshot().len(), 1);
}

#[tokio::test]
async fn same_filename_from_two_owners_keeps_both_rows() {
    let registry = spawn_registry().await;
    let mut a = TestPeer::join(registry, "a", 5001).await;
    let mut b = TestPeer::join(registry, "b", 5002).await;

    assert!(a.offer(&["shared.iso"]).await);
    assert!(b.offer(&["shared.iso"]).await);

    wait_until("both rows to land", || {
        a.cache.lookup("shared.iso", "a").is_some() && a.cache.lookup("shared.iso", "b").is_some()
    })
    .await;
    assert_eq!(a.cache.lookup("shared.iso", "a").unwrap().tcp_port, 5001);
    assert_eq!(a.cache.lookup("shared.iso", "b").unwrap().tcp_port, 5002);
}

#[tokio::test]
async fn dereg_withdraws_the_owners_rows_everywhere() {
    let registry = spawn_registry().await;

    let mut w = TestPeer::join(registry, "waa", 5001).await;
    let h = TestPeer::join(registry, "heyy", 5002).await;

    assert!(w.offer(&["1.txt", "2.txt"]).await);
    wait_until("offerings to reach heyy", || {
        h.cache.lookup("1.txt", "waa").is_some()
    })
    .await;

    assert!(w.dereg("waa").await);
    wait_until("withdrawal to reach heyy", || {
        h.cache
            .snapshot()
            .keys()
            .all(|key| !key.ends_with("|waa"))
    })
    .await;
    assert!(h.cache.snapshot().is_empty());
}
