//! cairn-peer — everything a peer process does: the datagram demultiplexer,
//! the interactive command driver, the stream acceptor, and the transfer
//! sub-protocol. The binary crate wires `shell::start` to argv and stdin.

pub mod acceptor;
pub mod cache;
pub mod demux;
pub mod shell;
pub mod state;
pub mod transfer;

pub use shell::{start, Session};
