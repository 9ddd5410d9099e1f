//! Framed Messenger.
//!
//! One accepting listener per node; outbound sends dial lazily and reuse
//! the connection until it breaks. Per-peer writes are serialized by a
//! `tokio::sync::Mutex` guarding that peer's socket, so frames are never
//! interleaved on the wire. Inbound frames are handed to a fixed worker
//! pool pulling off a shared channel, so one slow handler cannot stall the
//! accept loop. The Messenger never retries a failed send; retry policy
//! belongs to callers.

pub mod frame;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mqk_schemas::{Message, MiddlewareError, NodeId};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Static address book the Messenger dials against. Loaded once from
/// topology config; never mutated after construction.
pub type PeerAddressBook = HashMap<NodeId, (String, u16)>;

/// Callback invoked once per inbound, checksum-valid message. Implementors
/// live in mqk-health / mqk-election / mqk-txn and route by `msg.kind`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: Message);
}

struct PeerConn {
    write_half: Option<OwnedWriteHalf>,
}

/// Per-peer connection state plus the dial timeout every `send` respects.
pub struct Messenger {
    self_id: NodeId,
    peers: PeerAddressBook,
    conns: Mutex<HashMap<NodeId, Arc<Mutex<PeerConn>>>>,
    dial_timeout: Duration,
    inbound_tx: mpsc::Sender<Message>,
}

impl Messenger {
    /// Builds the Messenger and spawns its inbound worker pool; callers
    /// must separately call `listen` to start accepting connections.
    pub fn new(
        self_id: NodeId,
        peers: PeerAddressBook,
        dial_timeout: Duration,
        worker_count: usize,
        handler: Arc<dyn MessageHandler>,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel::<Message>(1024);
        let shared_rx = Arc::new(Mutex::new(inbound_rx));
        for worker_id in 0..worker_count.max(1) {
            let rx = shared_rx.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    let msg = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match msg {
                        Some(msg) => {
                            debug!(worker_id, kind = ?msg.kind, sender = %msg.sender_id, "dispatching inbound message");
                            handler.handle(msg).await;
                        }
                        None => break,
                    }
                }
            });
        }

        Arc::new(Self {
            self_id,
            peers,
            conns: Mutex::new(HashMap::new()),
            dial_timeout,
            inbound_tx,
        })
    }

    /// Binds `self`'s listen address and accepts connections forever,
    /// spawning one reader task per accepted socket. Returns only on bind
    /// failure or when `shutdown` fires.
    pub async fn listen(self: Arc<Self>, bind_addr: std::net::SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        info!(node_id = %self.self_id, %bind_addr, "messenger listening");
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let inbound_tx = self.inbound_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::read_loop(stream, inbound_tx).await {
                    debug!(%peer_addr, error = ?e, "inbound connection closed");
                }
            });
        }
    }

    async fn read_loop(
        mut stream: TcpStream,
        inbound_tx: mpsc::Sender<Message>,
    ) -> Result<(), frame::ReadFrameError> {
        loop {
            let msg = frame::read_frame(&mut stream).await?;
            if !msg.checksum_valid() {
                warn!(sender = %msg.sender_id, kind = ?msg.kind, "CHECKSUM_FAIL: dropping frame");
                continue;
            }
            // Receiver gone (process shutting down) — stop reading.
            if inbound_tx.send(msg).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Sends `msg` to `peer_id`. Dials lazily if no live connection exists.
    /// Never retries: a failed dial or write reports `Unreachable` and
    /// drops the connection so the *next* send attempts a fresh dial.
    pub async fn send(&self, peer_id: NodeId, msg: Message) -> Result<(), MiddlewareError> {
        let conn = self.conn_for(peer_id).await;
        let mut guard = conn.lock().await;

        if guard.write_half.is_none() {
            let (address, port) = self
                .peers
                .get(&peer_id)
                .ok_or_else(|| MiddlewareError::UnreachablePeer(peer_id.0))?;
            let target = format!("{address}:{port}");
            let dial = tokio::time::timeout(self.dial_timeout, TcpStream::connect(&target)).await;
            match dial {
                Ok(Ok(stream)) => {
                    let (_read_half, write_half) = stream.into_split();
                    guard.write_half = Some(write_half);
                }
                _ => {
                    return Err(MiddlewareError::UnreachablePeer(peer_id.0));
                }
            }
        }

        let frame = frame::encode(&msg);
        let write_half = guard.write_half.as_mut().expect("set above");
        match write_half.write_all(&frame).await.and(write_half.flush().await) {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(peer = %peer_id, error = %e, "send failed, dropping connection");
                guard.write_half = None;
                Err(MiddlewareError::UnreachablePeer(peer_id.0))
            }
        }
    }

    async fn conn_for(&self, peer_id: NodeId) -> Arc<Mutex<PeerConn>> {
        let mut conns = self.conns.lock().await;
        conns
            .entry(peer_id)
            .or_insert_with(|| Arc::new(Mutex::new(PeerConn { write_half: None })))
            .clone()
    }

    /// Forcibly drops any live outbound connection to `peer_id`, without
    /// removing it from the address book. The next `send` re-dials. Used by
    /// the in-process test harness to simulate a peer's socket dying mid
    /// session, which `Node::stop_accepting` alone cannot do
    /// since it only stops *accepting* new connections, not sockets this
    /// node already dialed out.
    pub async fn disconnect(&self, peer_id: NodeId) {
        if let Some(conn) = self.conns.lock().await.get(&peer_id) {
            conn.lock().await.write_half = None;
        }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqk_schemas::MessageKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener as TestListener;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _msg: Message) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_unreachable_not_panic() {
        let handler = Arc::new(CountingHandler {
            count: Arc::new(AtomicUsize::new(0)),
        });
        let messenger = Messenger::new(
            NodeId(1),
            HashMap::new(),
            Duration::from_millis(100),
            2,
            handler,
        );
        let result = messenger
            .send(NodeId(99), Message::new(NodeId(1), MessageKind::Heartbeat, json!({})))
            .await;
        assert!(matches!(result, Err(MiddlewareError::UnreachablePeer(99))));
    }

    #[tokio::test]
    async fn delivers_a_checksum_valid_message_to_the_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            count: count.clone(),
        });

        let listener = TestListener::bind("127.0.0.1:0").await.unwrap();
        let bind_addr = listener.local_addr().unwrap();
        drop(listener);

        let mut peers = HashMap::new();
        peers.insert(NodeId(2), (bind_addr.ip().to_string(), bind_addr.port()));

        let receiver = Messenger::new(
            NodeId(2),
            HashMap::new(),
            Duration::from_millis(200),
            2,
            handler,
        );
        let receiver_task = tokio::spawn(receiver.clone().listen(bind_addr));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sender = Messenger::new(
            NodeId(1),
            peers,
            Duration::from_millis(200),
            2,
            Arc::new(CountingHandler {
                count: Arc::new(AtomicUsize::new(0)),
            }),
        );
        sender
            .send(
                NodeId(2),
                Message::new(NodeId(1), MessageKind::Heartbeat, json!({"n": 1})),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        receiver_task.abort();
    }
}
