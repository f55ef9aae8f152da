//! The peer-to-peer transfer sub-protocol.
//!
//! One stream connection carries exactly one exchange: the requester sends a
//! newline-terminated filename, the owner answers with an 8-byte big-endian
//! length prefix followed by the body. A zero prefix is the rejection — the
//! file is not offered or no longer on disk. No checksums, no resume, no
//! cancellation: errors mid-stream abort the exchange and both sides move on.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use cairn_core::wire::FileLocation;

use crate::state::SharedState;

const COPY_BUF: usize = 64 * 1024;

/// Requester side. Downloads into the current working directory under the
/// same filename.
pub async fn download(filename: &str, owner: &str, location: &FileLocation) -> Result<()> {
    let stream = TcpStream::connect((location.host, location.tcp_port))
        .await
        .with_context(|| format!("connect to {}:{}", location.host, location.tcp_port))?;
    println!("< Connection with client {owner} established. >");
    let mut stream = BufReader::new(stream);

    stream
        .write_all(format!("{filename}\n").as_bytes())
        .await
        .context("send file request")?;
    stream.flush().await?;

    let mut prefix = [0u8; 8];
    stream
        .read_exact(&mut prefix)
        .await
        .context("read length prefix")?;
    let len = u64::from_be_bytes(prefix);
    if len == 0 {
        println!("< Invalid Request >");
        return Ok(());
    }

    println!("< Downloading {filename}... >");
    let mut file = File::create(filename)
        .await
        .with_context(|| format!("create {filename}"))?;
    copy_exact(&mut stream, &mut file, len).await?;
    file.flush().await?;

    println!("< {filename} downloaded successfully! >");
    println!("< Connection with client {owner} closed. >");
    Ok(())
}

/// Owner side, run by the acceptor for each inbound connection.
pub async fn serve(stream: TcpStream, peer: SocketAddr, state: &SharedState) -> Result<()> {
    println!("< Accepting connection request from {}. >", peer.ip());
    let mut stream = BufReader::new(stream);

    let mut line = String::new();
    stream.read_line(&mut line).await.context("read file request")?;
    let filename = line.trim_end_matches(['\r', '\n']);

    // The offer set is the gate: only names this peer actually offered are
    // servable, which also keeps path-shaped requests out. Disk presence is
    // re-checked now, not at offer time.
    let path = match on_disk(filename, state).await {
        Some(path) => path,
        None => {
            tracing::debug!(%peer, filename, "rejecting request for unoffered file");
            stream.write_all(&0u64.to_be_bytes()).await?;
            stream.flush().await?;
            return Ok(());
        }
    };

    let size = tokio::fs::metadata(&path).await?.len();
    println!("< Transferring {filename}... >");
    stream.write_all(&size.to_be_bytes()).await?;

    let mut file = File::open(&path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    copy_exact(&mut file, &mut stream, size).await?;
    stream.flush().await?;
    stream.shutdown().await?;

    println!("< {filename} transferred successfully! >");
    println!("< Connection with client {} closed. >", peer.ip());
    Ok(())
}

async fn on_disk(filename: &str, state: &SharedState) -> Option<std::path::PathBuf> {
    if !state.is_offered(filename) {
        return None;
    }
    let path = state.dir()?.join(filename);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Some(path),
        _ => None,
    }
}

/// Copy exactly `remaining` bytes. A short read is a protocol error: the
/// prefix promised more.
async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, mut remaining: u64) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF];
    while remaining > 0 {
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(buf.len()));
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            bail!("stream closed with {remaining} bytes outstanding");
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Convenience used by the acceptor and tests: does `filename` live directly
/// inside `dir` as a regular file?
pub async fn exists_in_dir(dir: &Path, filename: &str) -> bool {
    match tokio::fs::metadata(dir.join(filename)).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}
