//! The datagram demultiplexer — the one and only reader of the peer's UDP
//! socket once registration has succeeded.
//!
//! One endpoint carries three logical conversations: table pushes from the
//! registry, offer acks, and dereg acks. Only one task may read a datagram
//! socket, so this loop classifies every inbound datagram and routes it:
//! cache update, ack-queue publication, or the floor. Other tasks write to
//! the socket freely (datagram sends are atomic) but never read.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use cairn_core::wire::{self, Envelope, MAX_DATAGRAM};

use crate::cache::OfferingsCache;

/// Write half of the ack queues, owned by the demultiplexer.
pub struct AckSenders {
    offer: mpsc::Sender<()>,
    dereg: mpsc::Sender<()>,
}

/// Read half, owned by the command task.
pub struct AckQueues {
    pub offer: mpsc::Receiver<()>,
    pub dereg: mpsc::Receiver<()>,
}

/// Capacity-1 queues: a stale ack never blocks a fresh one, and the command
/// task's 500 ms timer guarantees it stops waiting regardless.
pub fn ack_channels() -> (AckSenders, AckQueues) {
    let (offer_tx, offer_rx) = mpsc::channel(1);
    let (dereg_tx, dereg_rx) = mpsc::channel(1);
    (
        AckSenders {
            offer: offer_tx,
            dereg: dereg_tx,
        },
        AckQueues {
            offer: offer_rx,
            dereg: dereg_rx,
        },
    )
}

/// Run until the process exits. Never blocks on anything but the read: cache
/// replacement takes a short lock, ack publication is `try_send` (a full
/// queue drops the newest ack), and the TABLE_ACK send completes before the
/// next read so it cannot be reordered past a subsequent TABLE.
pub async fn run(
    socket: Arc<UdpSocket>,
    registry: SocketAddr,
    cache: Arc<OfferingsCache>,
    acks: AckSenders,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };
        let envelope = match wire::decode(&buf[..len]) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(%from, error = %e, "dropping malformed datagram");
                continue;
            }
        };
        match envelope {
            Envelope::Table { view } => {
                // Swap before the ack and the ack before the status line:
                // by the time the user reads "updated", `list` agrees.
                cache.replace(view);
                if let Err(e) = wire::send_to(&socket, &Envelope::TableAck, registry).await {
                    tracing::warn!(error = %e, "failed to ack table push");
                }
                println!(">>> [Client table updated.]");
            }
            Envelope::OfferAck => {
                acks.offer.try_send(()).ok();
            }
            Envelope::DeregAck => {
                acks.dereg.try_send(()).ok();
            }
            other => {
                tracing::debug!(%from, kind = ?other, "discarding stray datagram");
            }
        }
    }
}
