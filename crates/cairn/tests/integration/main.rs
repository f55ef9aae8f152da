//! cairn integration test harness.
//!
//! Every test runs a real registry on an ephemeral loopback port and drives
//! it with real peers over real sockets. Peers come in two flavors: a
//! [`TestPeer`] runs the production demultiplexer (so table pushes are acked
//! and cached exactly as a live peer would), while the raw helpers let a test
//! play a misbehaving peer that never acks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use cairn_core::wire::{
    self, Envelope, RegisterOutcome, ACK_TIMEOUT, MAX_ATTEMPTS, MAX_DATAGRAM,
};
use cairn_peer::cache::OfferingsCache;
use cairn_peer::demux::{self, AckQueues};
use cairn_registry::Registry;

mod broadcast;
mod registration;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Generous bound for "should already be in flight" waits.
pub const RECV_WINDOW: Duration = Duration::from_secs(2);

/// Run a registry on an ephemeral port; returns its loopback address.
pub async fn spawn_registry() -> SocketAddr {
    let registry = Registry::bind(0).await.expect("bind registry");
    let port = registry.local_addr().expect("registry addr").port();
    tokio::spawn(registry.run());
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// The raw registration exchange on a bare socket. Panics if no verdict
/// arrives — registries in these tests are local and live.
pub async fn raw_register(
    socket: &UdpSocket,
    registry: SocketAddr,
    name: &str,
    tcp_port: u16,
) -> RegisterOutcome {
    let request = Envelope::Register {
        name: name.into(),
        tcp_port,
    };
    wire::send_to(socket, &request, registry).await.expect("send register");
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let deadline = Instant::now() + RECV_WINDOW;
    while let Some((envelope, from)) = wire::recv_until(socket, &mut buf, deadline)
        .await
        .expect("recv register ack")
    {
        if let Envelope::RegisterAck { outcome } = envelope {
            if from == registry {
                return outcome;
            }
        }
    }
    panic!("no registration verdict within {RECV_WINDOW:?}");
}

/// A well-behaved peer: registered, with the production demultiplexer
/// servicing its socket (table pushes are acked and cached automatically).
pub struct TestPeer {
    pub socket: Arc<UdpSocket>,
    pub registry: SocketAddr,
    pub cache: Arc<OfferingsCache>,
    pub acks: AckQueues,
}

impl TestPeer {
    pub async fn join(registry: SocketAddr, name: &str, tcp_port: u16) -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind peer socket"));
        let outcome = raw_register(&socket, registry, name, tcp_port).await;
        assert_eq!(outcome, RegisterOutcome::Ok, "registration of {name} rejected");

        let cache = Arc::new(OfferingsCache::new());
        let (senders, acks) = demux::ack_channels();
        tokio::spawn(demux::run(socket.clone(), registry, cache.clone(), senders));
        Self {
            socket,
            registry,
            cache,
            acks,
        }
    }

    /// Send an acked exchange with the production retry discipline; true on
    /// ack, false on exhaustion.
    async fn exchange(&mut self, envelope: Envelope, kind: AckKind) -> bool {
        let queue = match kind {
            AckKind::Offer => &mut self.acks.offer,
            AckKind::Dereg => &mut self.acks.dereg,
        };
        while queue.try_recv().is_ok() {}
        for _ in 0..MAX_ATTEMPTS {
            wire::send_to(&self.socket, &envelope, self.registry)
                .await
                .expect("send");
            if let Ok(Some(())) = timeout(ACK_TIMEOUT, queue.recv()).await {
                return true;
            }
        }
        false
    }

    pub async fn offer(&mut self, files: &[&str]) -> bool {
        let files = files.iter().map(|s| s.to_string()).collect();
        self.exchange(Envelope::Offer { files }, AckKind::Offer).await
    }

    pub async fn dereg(&mut self, name: &str) -> bool {
        self.exchange(Envelope::Dereg { name: name.into() }, AckKind::Dereg)
            .await
    }
}

enum AckKind {
    Offer,
    Dereg,
}

/// Poll until `condition` holds; panic with `what` if it never does.
/// Broadcast delivery is asynchronous, so state assertions go through here.
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while std::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Receive envelopes on a bare socket into a channel, without ever acking —
/// the deaf-peer half of the retry-exhaustion tests.
pub fn tap_socket(socket: Arc<UdpSocket>) -> mpsc::UnboundedReceiver<Envelope> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let Ok((len, _)) = socket.recv_from(&mut buf).await else { break };
            if let Ok(envelope) = wire::decode(&buf[..len]) {
                if tx.send(envelope).is_err() {
                    break;
                }
            }
        }
    });
    rx
}
