//! Runtime configuration for both modes.
//!
//! The whole external interface is argv — no config file, no environment
//! variables, no persisted state. What lives here is the validation layer
//! between the parsed command line and the sockets.

use std::net::IpAddr;

/// Lowest port either mode will bind or contact. Everything below is
/// reserved/privileged territory.
pub const PORT_MIN: u16 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("port {0} out of range; expected {PORT_MIN}-65535")]
    PortOutOfRange(u16),

    #[error("invalid registry host {0:?}: expected an IP address")]
    InvalidHost(String),

    #[error("peer name must not be empty")]
    EmptyName,
}

/// Registry mode: one UDP port to own.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub udp_port: u16,
}

impl RegistryConfig {
    pub fn new(udp_port: u16) -> Result<Self, ConfigError> {
        check_port(udp_port)?;
        Ok(Self { udp_port })
    }
}

/// Peer mode: the chosen display name, where the registry lives, and the
/// two local ports making up this peer's contact tuple.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub name: String,
    pub registry_host: IpAddr,
    pub registry_port: u16,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl PeerConfig {
    pub fn new(
        name: &str,
        registry_host: &str,
        registry_port: u16,
        udp_port: u16,
        tcp_port: u16,
    ) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let registry_host = registry_host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(registry_host.to_string()))?;
        for port in [registry_port, udp_port, tcp_port] {
            check_port(port)?;
        }
        Ok(Self {
            name: name.to_string(),
            registry_host,
            registry_port,
            udp_port,
            tcp_port,
        })
    }
}

fn check_port(port: u16) -> Result<(), ConfigError> {
    if port < PORT_MIN {
        return Err(ConfigError::PortOutOfRange(port));
    }
    Ok(())
}
