//! The command driver: registration, then the interactive shell.
//!
//! One command at a time. Commands that expect a registry ack send their
//! datagram and wait on the matching ack queue with the shared 500 ms /
//! three-attempt rule; everything else is local. `Session::execute` is the
//! whole command surface — the stdin loop in `run` is just plumbing, so
//! tests drive commands without a terminal.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use cairn_core::config::PeerConfig;
use cairn_core::wire::{
    self, Envelope, RegisterOutcome, ACK_TIMEOUT, MAX_ATTEMPTS, MAX_DATAGRAM,
};

use crate::acceptor;
use crate::cache::OfferingsCache;
use crate::demux::{self, AckQueues};
use crate::state::SharedState;
use crate::transfer;

pub struct Session {
    name: String,
    socket: Arc<UdpSocket>,
    registry: SocketAddr,
    cache: Arc<OfferingsCache>,
    state: Arc<SharedState>,
    acks: AckQueues,
    acceptor: Option<JoinHandle<Result<()>>>,
    offline: bool,
}

/// Bind both endpoints, register with the registry, and bring up the
/// background tasks. `Ok(None)` means registration did not go through (name
/// taken or registry unreachable) — the messages are already printed and the
/// process should exit cleanly. Bind failures are fatal.
pub async fn start(config: PeerConfig) -> Result<Option<Session>> {
    // TCP first: the contact tuple we are about to advertise must already be
    // reachable when the first broadcast names it.
    let listener = TcpListener::bind(("0.0.0.0", config.tcp_port))
        .await
        .with_context(|| format!("failed to bind TCP port {}", config.tcp_port))?;
    let socket = UdpSocket::bind(("0.0.0.0", config.udp_port))
        .await
        .with_context(|| format!("failed to bind UDP port {}", config.udp_port))?;
    let registry = SocketAddr::new(config.registry_host, config.registry_port);

    if !register(&socket, registry, &config.name, config.tcp_port).await? {
        return Ok(None);
    }
    println!(">>> [Welcome, You are registered.]");

    let socket = Arc::new(socket);
    let cache = Arc::new(OfferingsCache::new());
    let state = Arc::new(SharedState::new());
    let (senders, acks) = demux::ack_channels();

    tokio::spawn(demux::run(socket.clone(), registry, cache.clone(), senders));
    let acceptor = tokio::spawn(acceptor::run(listener, state.clone()));

    Ok(Some(Session {
        name: config.name,
        socket,
        registry,
        cache,
        state,
        acks,
        acceptor: Some(acceptor),
        offline: false,
    }))
}

/// The registration exchange, run before the demultiplexer exists — this is
/// the one time the command path reads the socket directly. Datagrams other
/// than the verdict are dropped; the registry retries its table push, so
/// nothing of value can be lost here.
async fn register(
    socket: &UdpSocket,
    registry: SocketAddr,
    name: &str,
    tcp_port: u16,
) -> Result<bool> {
    let request = Envelope::Register {
        name: name.to_string(),
        tcp_port,
    };
    let mut buf = vec![0u8; MAX_DATAGRAM];
    for _ in 0..MAX_ATTEMPTS {
        wire::send_to(socket, &request, registry)
            .await
            .context("send registration")?;
        let deadline = Instant::now() + ACK_TIMEOUT;
        while let Some((envelope, from)) = wire::recv_until(socket, &mut buf, deadline)
            .await
            .context("await registration ack")?
        {
            match envelope {
                Envelope::RegisterAck { outcome } if from == registry => match outcome {
                    RegisterOutcome::Ok => return Ok(true),
                    RegisterOutcome::NameTaken => {
                        println!(">>> [{name} already registered, registration rejected.]");
                        return Ok(false);
                    }
                },
                other => {
                    tracing::debug!(%from, kind = ?other, "dropped while awaiting registration ack");
                }
            }
        }
    }
    println!(">>> [Server not responding.]");
    Ok(false)
}

impl Session {
    /// Read commands from stdin until EOF.
    pub async fn run(mut self) -> Result<()> {
        use std::io::Write;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            // Status lines from the demultiplexer may interleave with the
            // prompt.
            print!(">>> ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else { break };
            self.execute(&line).await?;
        }
        Ok(())
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Execute one command line.
    pub async fn execute(&mut self, line: &str) -> Result<()> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = tokens.split_first() else {
            return Ok(());
        };

        // An offline peer answers nothing but `list`.
        if self.offline && command != "list" {
            println!(">>> [Invalid command. Please try again.]");
            return Ok(());
        }

        match command {
            "setdir" => {
                if args.len() != 1 {
                    println!(">>> [Usage: setdir <dir>.]");
                } else {
                    self.setdir(args[0]);
                }
            }
            "offer" => self.offer(args).await?,
            "list" => {
                if !args.is_empty() {
                    println!(">>> [Warning: list does not take any arguments]");
                }
                self.list();
            }
            "request" => {
                if args.len() != 2 {
                    println!(">>> [Usage: request <file_name> <client_name>.]");
                } else {
                    self.request(args[0], args[1]).await;
                }
            }
            "dereg" => {
                if args.len() != 1 {
                    println!(">>> [Usage: dereg <nick-name>.]");
                } else {
                    self.dereg(args[0]).await?;
                }
            }
            _ => println!(">>> [Invalid command. Please try again.]"),
        }
        Ok(())
    }

    fn setdir(&self, dir: &str) {
        if Path::new(dir).is_dir() {
            self.state.set_dir(Path::new(dir));
            println!(">>> [Successfully set {dir} as the directory for searching offered files.]");
        } else {
            println!(">>> [setdir failed: {dir} does not exist.]");
        }
    }

    async fn offer(&mut self, args: &[&str]) -> Result<()> {
        let Some(dir) = self.state.dir() else {
            println!(">>> [Please set a directory first. Usage: setdir <dir>.]");
            return Ok(());
        };
        if args.is_empty() {
            println!(">>> [Please provide files to offer from {}.]", dir.display());
            return Ok(());
        }
        for filename in args {
            if !transfer::exists_in_dir(&dir, filename).await {
                println!(
                    ">>> [Offer failed: {filename} does not exist in {}.]",
                    dir.display()
                );
                return Ok(());
            }
        }

        let files: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let offer = Envelope::Offer {
            files: files.clone(),
        };
        if await_ack(&self.socket, self.registry, &offer, &mut self.acks.offer).await? {
            self.state.add_offered(files);
            println!(">>> [Offer Message received by Server.]");
        } else {
            println!(">>> [Server not responding.]");
            self.offline = true;
        }
        Ok(())
    }

    fn list(&self) {
        match self.cache.render() {
            Some(table) => print!("{table}"),
            None => println!(">>> [No files available for download at the moment.]"),
        }
    }

    async fn request(&self, filename: &str, owner: &str) {
        // Requesting our own offering would mean connecting to ourselves
        // while the acceptor is busy accepting — refuse up front.
        if owner == self.name {
            println!("< Invalid Request >");
            return;
        }
        let Some(location) = self.cache.lookup(filename, owner) else {
            println!("< Invalid Request >");
            return;
        };
        if let Err(e) = transfer::download(filename, owner, &location).await {
            println!("< Transfer failed: {e} >");
            tracing::warn!(filename, owner, error = %e, "download aborted");
        }
    }

    async fn dereg(&mut self, name: &str) -> Result<()> {
        if name != self.name {
            println!(">>> [Deregister failed: name does not match.]");
            return Ok(());
        }

        let dereg = Envelope::Dereg {
            name: name.to_string(),
        };
        let acked = await_ack(&self.socket, self.registry, &dereg, &mut self.acks.dereg).await?;

        // Either way this peer is done serving: stop accepting transfers and
        // forget the offered set.
        if let Some(handle) = self.acceptor.take() {
            handle.abort();
        }
        self.state.clear_offered();
        self.offline = true;

        if acked {
            println!(">>> [You are now Offline. Bye.]");
        } else {
            println!(">>> [Server not responding.]");
        }
        Ok(())
    }
}

/// The shared ack-await: drain whatever stale ack a previous timed-out
/// exchange left behind, then send and wait, retransmitting on each 500 ms
/// expiry, three attempts total.
async fn await_ack(
    socket: &UdpSocket,
    registry: SocketAddr,
    envelope: &Envelope,
    queue: &mut mpsc::Receiver<()>,
) -> Result<bool> {
    while queue.try_recv().is_ok() {}
    for _ in 0..MAX_ATTEMPTS {
        wire::send_to(socket, envelope, registry).await?;
        if let Ok(Some(())) = timeout(ACK_TIMEOUT, queue.recv()).await {
            return Ok(true);
        }
    }
    Ok(false)
}
