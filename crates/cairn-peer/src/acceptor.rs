//! The stream acceptor — serves inbound file requests.
//!
//! Bound before registration so the TCP port in the advertised contact tuple
//! is already reachable by the time anyone learns it. One connection at a
//! time: each transfer runs to completion before the next accept, which is
//! plenty at tens-of-peers scale.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

use crate::state::SharedState;
use crate::transfer;

pub async fn run(listener: TcpListener, state: Arc<SharedState>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(e) = transfer::serve(stream, peer, &state).await {
            println!("< Transfer failed: {e} >");
            tracing::warn!(%peer, error = %e, "transfer aborted");
        }
    }
}
