//! Client-facing text socket.
//!
//! One statement per connection: the client writes a single
//! newline-terminated SQL statement, the node writes back one
//! newline-terminated JSON `ClientReply`, then closes. This is the raw
//! data-plane socket — distinct from, and never multiplexed with, the
//! admin HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use mqk_txn::TxnCoordinator;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Accepts client connections forever, spawning one short-lived task per
/// connection. Returns only on bind failure.
pub async fn serve(txn: Arc<TxnCoordinator>, bind_addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "client socket listening");
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let txn = txn.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(txn, stream).await {
                debug!(%peer_addr, error = %e, "client connection closed with error");
            }
        });
    }
}

async fn handle_connection(txn: Arc<TxnCoordinator>, stream: TcpStream) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(());
    }
    let statement = line.trim_end_matches(['\n', '\r']).to_string();
    if statement.is_empty() {
        return Ok(());
    }

    let reply = txn.handle_client_statement(statement).await;
    let mut body = serde_json::to_vec(&reply).unwrap_or_else(|e| {
        warn!(error = %e, "failed to serialize client reply");
        b"{}".to_vec()
    });
    body.push(b'\n');
    write_half.write_all(&body).await?;
    write_half.flush().await?;
    Ok(())
}
