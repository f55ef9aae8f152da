//! Cairn wire format — the control-plane datagram envelope.
//!
//! Every control message is a single UDP datagram carrying one JSON-encoded
//! [`Envelope`]. The `kind` tag is the protocol: a datagram that does not
//! decode to one of these variants is malformed and must be dropped by the
//! receiver, never answered.
//!
//! File bodies never travel in envelopes; they move peer-to-peer over TCP
//! (see the transfer sub-protocol in cairn-peer).

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::Instant;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Datagram ceiling. An envelope must fit in one datagram; anything larger
/// is refused at encode time rather than truncated on the wire.
pub const MAX_DATAGRAM: usize = 8192;

/// How long one ack wait lasts before the sender retransmits.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Total send attempts for an acked exchange: the initial send plus two
/// retransmits. Shared by the registry's table push and the peer's
/// register/offer/dereg exchanges.
pub const MAX_ATTEMPTS: usize = 3;

// ── Offerings view ────────────────────────────────────────────────────────────

/// Where a single offered file can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    /// The owner's host as observed by the registry.
    pub host: IpAddr,
    /// The owner's TCP transfer port. The UDP port is deliberately absent:
    /// transfers never touch the control plane.
    pub tcp_port: u16,
}

/// The full offerings view, as broadcast by the registry and cached by every
/// peer. Keyed by the composite `"<filename>|<owner>"` string: two peers may
/// offer the same filename, and the flat key keeps the map trivially
/// serializable.
pub type OfferingsView = BTreeMap<String, FileLocation>;

/// Build the composite key for one offering.
pub fn composite_key(filename: &str, owner: &str) -> String {
    format!("{filename}|{owner}")
}

/// Split a composite key back into `(filename, owner)`.
///
/// Owner names cannot contain `|` (they are shell words), so the *last*
/// separator is the authoritative one even if a filename contains `|`.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once('|')
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Outcome of a registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterOutcome {
    Ok,
    NameTaken,
}

/// One control-plane message. The serde `kind` tag is the on-wire kind name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    /// peer → registry: claim a name and advertise the TCP transfer port.
    /// The UDP contact address is whatever source address the registry
    /// observes on this datagram.
    Register { name: String, tcp_port: u16 },
    /// registry → peer: registration verdict. Sent once, never retried —
    /// the acked TABLE push that follows a successful registration is the
    /// liveness proof.
    RegisterAck { outcome: RegisterOutcome },
    /// registry → peer: the full offerings view. Acked and retransmitted.
    Table { view: OfferingsView },
    /// peer → registry: TABLE received.
    TableAck,
    /// peer → registry: add these filenames to the sender's offerings.
    Offer { files: Vec<String> },
    /// registry → peer: OFFER received.
    OfferAck,
    /// peer → registry: go offline. The name must match the sender's record.
    Dereg { name: String },
    /// registry → peer: DEREG received.
    DeregAck,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("envelope of {0} bytes exceeds the {MAX_DATAGRAM}-byte datagram ceiling")]
    TooLarge(usize),

    #[error("malformed datagram: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Encode an envelope into datagram bytes, enforcing the size ceiling.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    let bytes = serde_json::to_vec(envelope)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(WireError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Decode one datagram. Callers drop `Malformed` datagrams with a debug log;
/// they are never answered.
pub fn decode(bytes: &[u8]) -> Result<Envelope, WireError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode and send one envelope as a single datagram.
pub async fn send_to(
    socket: &UdpSocket,
    envelope: &Envelope,
    dest: SocketAddr,
) -> Result<(), WireError> {
    let bytes = encode(envelope)?;
    socket.send_to(&bytes, dest).await?;
    Ok(())
}

/// Receive the next decodable datagram, waiting until `deadline` at the
/// latest. Malformed datagrams are dropped and the wait continues; `None`
/// means the deadline passed first.
pub async fn recv_until(
    socket: &UdpSocket,
    buf: &mut [u8],
    deadline: Instant,
) -> Result<Option<(Envelope, SocketAddr)>, WireError> {
    loop {
        let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(buf)).await {
            Ok(received) => received?,
            Err(_) => return Ok(None),
        };
        match decode(&buf[..len]) {
            Ok(envelope) => return Ok(Some((envelope, from))),
            Err(e) => {
                tracing::debug!(from = %from, error = %e, "dropping malformed datagram");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
