//! cairn-registry — the control-plane authority: the registration table and
//! the single-task service loop that serves it.

pub mod service;
pub mod table;

pub use service::Registry;
pub use table::{PeerRecord, PeerStatus, RegistryTable};
