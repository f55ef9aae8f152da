//! The registration table — the registry's single source of truth.
//!
//! Records are keyed by the peer's observed source address `(host, udp_port)`:
//! it arrives on every inbound datagram for free, so a peer never has to
//! repeat its own identity. Records are never erased; deregistration and push
//! failure flip them to `Offline`, which frees the name for someone else while
//! keeping the address history.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;

use cairn_core::wire::{composite_key, FileLocation, OfferingsView, RegisterOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Active,
    Offline,
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub name: String,
    pub status: PeerStatus,
    pub tcp_port: u16,
    pub files: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct RegistryTable {
    records: HashMap<SocketAddr, PeerRecord>,
}

impl RegistryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` at `addr`. Rejects when a *different* active record
    /// already holds the name; a record at the same address (active or not)
    /// is overwritten, so a peer restarting on the same endpoint can come
    /// back.
    pub fn register(&mut self, addr: SocketAddr, name: &str, tcp_port: u16) -> RegisterOutcome {
        let taken = self.records.iter().any(|(other, record)| {
            *other != addr && record.status == PeerStatus::Active && record.name == name
        });
        if taken {
            return RegisterOutcome::NameTaken;
        }
        self.records.insert(
            addr,
            PeerRecord {
                name: name.to_string(),
                status: PeerStatus::Active,
                tcp_port,
                files: BTreeSet::new(),
            },
        );
        RegisterOutcome::Ok
    }

    /// Union `files` into the active record at `addr`. Returns false when no
    /// active record exists there (the caller drops the request).
    pub fn add_files<I>(&mut self, addr: SocketAddr, files: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        match self.records.get_mut(&addr) {
            Some(record) if record.status == PeerStatus::Active => {
                record.files.extend(files);
                true
            }
            _ => false,
        }
    }

    /// Flip the active record at `addr` to offline, clearing its offerings.
    /// Returns false when there is no active record with a matching name.
    pub fn deregister(&mut self, addr: SocketAddr, name: &str) -> bool {
        match self.records.get_mut(&addr) {
            Some(record) if record.status == PeerStatus::Active && record.name == name => {
                record.status = PeerStatus::Offline;
                record.files.clear();
                true
            }
            _ => false,
        }
    }

    /// Mark `addr` offline without a name check — the push-failure path.
    pub fn mark_offline(&mut self, addr: SocketAddr) {
        if let Some(record) = self.records.get_mut(&addr) {
            record.status = PeerStatus::Offline;
            record.files.clear();
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&PeerRecord> {
        self.records.get(addr)
    }

    /// Snapshot of the currently active peers, taken at broadcast start.
    pub fn active_peers(&self) -> Vec<SocketAddr> {
        self.records
            .iter()
            .filter(|(_, record)| record.status == PeerStatus::Active)
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Recompute the broadcast view from the active records.
    pub fn offerings_view(&self) -> OfferingsView {
        let mut view = OfferingsView::new();
        for (addr, record) in &self.records {
            if record.status != PeerStatus::Active {
                continue;
            }
            for filename in &record.files {
                view.insert(
                    composite_key(filename, &record.name),
                    FileLocation {
                        host: addr.ip(),
                        tcp_port: record.tcp_port,
                    },
                );
            }
        }
        view
    }
}
