//! cairn — LAN file sharing with a central registry.
//!
//! One binary, two modes:
//!
//!   cairn -s <udp_port>
//!   cairn -c <name> <registry_host> <registry_udp_port> <udp_port> <tcp_port>
//!
//! The registry tracks who is online and what they offer; file bodies move
//! peer-to-peer over TCP and never touch the registry.

use anyhow::{bail, Context, Result};
use clap::Parser;

use cairn_core::{PeerConfig, RegistryConfig};

#[derive(Parser)]
#[command(name = "cairn", version, about = "LAN file sharing with a central registry")]
#[command(group(clap::ArgGroup::new("mode").required(true).args(["server", "client"])))]
struct Cli {
    /// Run the registry on the given UDP port
    #[arg(short = 's', value_name = "UDP_PORT")]
    server: Option<u16>,

    /// Run a peer
    #[arg(
        short = 'c',
        num_args = 5,
        value_names = ["NAME", "REGISTRY_HOST", "REGISTRY_UDP_PORT", "UDP_PORT", "TCP_PORT"]
    )]
    client: Option<Vec<String>>,
}

/// The two run modes, resolved from the mutually-exclusive flags.
enum Mode {
    Registry(RegistryConfig),
    Peer(PeerConfig),
}

impl Cli {
    fn into_mode(self) -> Result<Mode> {
        match (self.server, self.client) {
            (Some(udp_port), None) => Ok(Mode::Registry(RegistryConfig::new(udp_port)?)),
            (None, Some(args)) => Ok(Mode::Peer(parse_peer_args(&args)?)),
            _ => bail!("exactly one of -s or -c is required"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout carries only the protocol lines.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().into_mode()? {
        Mode::Registry(config) => {
            banner(&[("server", "true".into()), ("port", config.udp_port.to_string())]);
            run_registry(config).await
        }
        Mode::Peer(config) => {
            banner(&[
                ("client", "true".into()),
                ("name", config.name.clone()),
                ("server-ip", config.registry_host.to_string()),
                ("server-port", config.registry_port.to_string()),
                ("client-udp-port", config.udp_port.to_string()),
                ("client-tcp-port", config.tcp_port.to_string()),
            ]);
            run_peer(config).await
        }
    }
}

fn parse_peer_args(args: &[String]) -> Result<PeerConfig> {
    let parse_port = |value: &String, label: &str| -> Result<u16> {
        value
            .parse()
            .with_context(|| format!("{label} must be a port number, got {value:?}"))
    };
    Ok(PeerConfig::new(
        &args[0],
        &args[1],
        parse_port(&args[2], "registry UDP port")?,
        parse_port(&args[3], "local UDP port")?,
        parse_port(&args[4], "local TCP port")?,
    )?)
}

/// The startup echo block: one parsed argument per line.
fn banner(entries: &[(&str, String)]) {
    println!("===============");
    println!("Printing args:");
    for (key, value) in entries {
        println!("{key} {value}");
    }
    println!("===============");
}

async fn run_registry(config: RegistryConfig) -> Result<()> {
    let registry = cairn_registry::Registry::bind(config.udp_port).await?;
    registry.run().await
}

async fn run_peer(config: PeerConfig) -> Result<()> {
    match cairn_peer::start(config).await? {
        Some(session) => session.run().await,
        // Rejection and registry silence are protocol outcomes, already
        // reported; only bind failures exit non-zero.
        None => Ok(()),
    }
}
