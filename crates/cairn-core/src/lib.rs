//! cairn-core — wire format and configuration shared by the registry and
//! peer crates. All other cairn crates depend on this one.

pub mod config;
pub mod wire;

pub use config::{PeerConfig, RegistryConfig};
pub use wire::{Envelope, FileLocation, OfferingsView, RegisterOutcome};
