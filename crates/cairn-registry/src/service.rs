//! The registry service loop.
//!
//! Deliberately one task: each inbound datagram is processed to completion,
//! including every retransmit window of the broadcast it may trigger, before
//! the next read. Requests arriving during a push window are consumed and
//! dropped; the sender's own retry timer covers the loss, and the sequential
//! processing is what keeps the per-peer push order stable.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use cairn_core::wire::{
    self, Envelope, OfferingsView, RegisterOutcome, ACK_TIMEOUT, MAX_ATTEMPTS, MAX_DATAGRAM,
};

use crate::table::RegistryTable;

pub struct Registry {
    socket: UdpSocket,
    table: RegistryTable,
    buf: Vec<u8>,
}

impl Registry {
    /// Bind the control socket. Failure here is fatal to the process.
    pub async fn bind(udp_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", udp_port))
            .await
            .with_context(|| format!("failed to bind registry UDP port {udp_port}"))?;
        Ok(Self {
            socket,
            table: RegistryTable::new(),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// The bound address. Tests bind port 0 and read the real port here.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve forever. Per-request failures (a peer vanishing mid-exchange,
    /// an ICMP-surfaced send error) are logged and survived.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "registry listening");
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!(error = %e, "recv_from failed");
                    continue;
                }
            };
            let envelope = match wire::decode(&self.buf[..len]) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::debug!(from = %from, error = %e, "dropping malformed datagram");
                    continue;
                }
            };
            if let Err(e) = self.handle(envelope, from).await {
                tracing::warn!(%from, error = %e, "request handling failed");
            }
        }
    }

    async fn handle(&mut self, envelope: Envelope, from: SocketAddr) -> Result<()> {
        match envelope {
            Envelope::Register { name, tcp_port } => self.handle_register(from, name, tcp_port).await,
            Envelope::Offer { files } => self.handle_offer(from, files).await,
            Envelope::Dereg { name } => self.handle_dereg(from, name).await,
            // Late TABLE_ACKs land here once their push window has closed.
            other => {
                tracing::debug!(from = %from, kind = ?other, "discarding stray datagram");
                Ok(())
            }
        }
    }

    async fn handle_register(&mut self, from: SocketAddr, name: String, tcp_port: u16) -> Result<()> {
        let outcome = self.table.register(from, &name, tcp_port);
        // The welcome ack is fire-and-forget; the acked table push below is
        // what proves the peer can hear us.
        wire::send_to(&self.socket, &Envelope::RegisterAck { outcome }, from).await?;

        match outcome {
            RegisterOutcome::Ok => {
                tracing::info!(%from, name, tcp_port, "peer registered");
                let view = self.table.offerings_view();
                if !self.push_table(from, &view).await? {
                    self.table.mark_offline(from);
                }
            }
            RegisterOutcome::NameTaken => {
                tracing::warn!(%from, name, "registration rejected: name taken");
            }
        }
        Ok(())
    }

    async fn handle_offer(&mut self, from: SocketAddr, files: Vec<String>) -> Result<()> {
        if !self.table.add_files(from, files.iter().cloned()) {
            tracing::warn!(%from, "offer from unknown or offline peer, dropping");
            return Ok(());
        }
        println!(">>> [Offer Message Received By Server]");
        tracing::info!(%from, count = files.len(), "offer accepted");
        wire::send_to(&self.socket, &Envelope::OfferAck, from).await?;
        self.broadcast().await
    }

    async fn handle_dereg(&mut self, from: SocketAddr, name: String) -> Result<()> {
        if !self.table.deregister(from, &name) {
            tracing::warn!(%from, name, "dereg does not match an active record, dropping");
            return Ok(());
        }
        println!(">>> [Deregistration Request Received By Server]");
        tracing::info!(%from, name, "peer deregistered");
        wire::send_to(&self.socket, &Envelope::DeregAck, from).await?;
        self.broadcast().await
    }

    /// Push the recomputed view to every peer active at broadcast start,
    /// sequentially. Peers that exhaust their push retries are flipped
    /// offline; the resulting change is *not* re-broadcast (that recursion
    /// never terminates against a flapping peer) — the next explicit event
    /// carries it.
    async fn broadcast(&mut self) -> Result<()> {
        let targets = self.table.active_peers();
        let view = self.table.offerings_view();
        for target in targets {
            if !self.push_table(target, &view).await? {
                self.table.mark_offline(target);
            }
        }
        Ok(())
    }

    /// Reliable Push to one target: send TABLE, then drain the socket until
    /// the 500 ms deadline looking for that target's TABLE_ACK. Three
    /// attempts total. Anything else read inside a window is dropped —
    /// single-threaded semantics, a documented limitation.
    async fn push_table(&mut self, target: SocketAddr, view: &OfferingsView) -> Result<bool> {
        let table = Envelope::Table { view: view.clone() };
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                println!(">>> [Sending table again...]");
            }
            wire::send_to(&self.socket, &table, target).await?;

            let deadline = Instant::now() + ACK_TIMEOUT;
            while let Some((envelope, from)) =
                wire::recv_until(&self.socket, &mut self.buf, deadline).await?
            {
                match envelope {
                    Envelope::TableAck if from == target => {
                        tracing::debug!(%target, attempt, "table push acked");
                        return Ok(true);
                    }
                    other => {
                        tracing::debug!(%from, kind = ?other, "dropped during push window");
                    }
                }
            }
        }
        tracing::warn!(%target, "table push exhausted retries, marking peer offline");
        Ok(false)
    }
}
