//! Per-node process wiring: assembles the Framed Messenger, Backend
//! Adapter, Lock Manager, Heartbeat & Health, Election Engine, and
//! Transaction Coordinator into one running node, plus the two outward
//! surfaces — the client text socket and the admin HTTP surface — that sit
//! on top of them.
//!
//! Each component owns exactly one piece of shared state; `Node` itself
//! owns nothing mutable, it only holds the `Arc`s that wire everything
//! together.

pub mod admin_http;
pub mod client_listener;
pub mod events;
pub mod router;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mqk_audit::AuditWriter;
use mqk_config::TopologyConfig;
use mqk_db::{Backend, TxnLogStore};
use mqk_election::Election;
use mqk_health::Health;
use mqk_lock::LockManager;
use mqk_messenger::{Messenger, PeerAddressBook};
use mqk_schemas::NodeId;
use mqk_txn::{LoadBalanceStrategy, TxnCoordinator, TxnTimeouts};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::info;

use events::NodeEvents;
use router::NodeRouter;

/// Bounded wait for a lazy peer dial attempt. Not itself a configurable
/// tunable, so it is kept well inside `heartbeat_interval` instead.
const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
const MESSENGER_WORKER_COUNT: usize = 4;
const EVENT_BUS_CAPACITY: usize = 1024;

pub struct Node {
    pub self_id: NodeId,
    pub config_hash: String,
    pub messenger: Arc<Messenger>,
    pub health: Arc<Health>,
    pub election: Arc<Election>,
    pub locks: Arc<LockManager>,
    pub txn: Arc<TxnCoordinator>,
    pub events: broadcast::Sender<events::NodeEvent>,
    pub messenger_bind_addr: SocketAddr,
    pub client_bind_addr: SocketAddr,
    pub admin_bind_addr: Option<SocketAddr>,

    listener_task: AsyncMutex<Option<JoinHandle<()>>>,
    client_listener_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Builds every component and wires them together. Does not start any
    /// background loop or accept any connection yet — call `spawn` for
    /// that, separately, so tests can inspect a freshly built node before
    /// it starts talking to peers.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        self_id: NodeId,
        topology: &TopologyConfig,
        config_hash: String,
        backend: Arc<dyn Backend>,
        txn_log: Arc<dyn TxnLogStore>,
        audit: Option<Arc<std::sync::Mutex<AuditWriter>>>,
        load_balance_strategy: LoadBalanceStrategy,
    ) -> anyhow::Result<Arc<Node>> {
        let self_desc = topology
            .node(self_id)
            .ok_or_else(|| anyhow::anyhow!("self node_id {self_id} not present in topology"))?;
        let messenger_bind_addr: SocketAddr = format!("{}:{}", self_desc.address, self_desc.port).parse()?;
        let client_bind_addr: SocketAddr =
            format!("{}:{}", self_desc.address, self_desc.client_port).parse()?;
        let admin_bind_addr = topology
            .admin_http_port
            .map(|port| SocketAddr::from(([0, 0, 0, 0], port)));

        let peer_ids = topology.peer_ids(self_id);
        let mut peers: PeerAddressBook = HashMap::new();
        for node in &topology.nodes {
            if node.node_id != self_id {
                peers.insert(node.node_id, (node.address.clone(), node.port));
            }
        }

        let router = NodeRouter::new();
        let messenger = Messenger::new(self_id, peers, DIAL_TIMEOUT, MESSENGER_WORKER_COUNT, router.clone());

        let election = Election::new(
            self_id,
            peer_ids.clone(),
            messenger.clone(),
            Duration::from_millis(topology.election_timeout_ms),
            Duration::from_millis(topology.coordinator_wait_timeout_ms),
        );

        let (events_tx, _events_rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        let node_events = NodeEvents::new(election.clone(), events_tx.clone());

        let health = Health::new(
            self_id,
            &peer_ids,
            Duration::from_millis(topology.heartbeat_interval_ms),
            Duration::from_millis(topology.heartbeat_timeout_ms),
            messenger.clone(),
            node_events,
            election.clone(),
        );

        let locks = Arc::new(LockManager::new());

        let timeouts = TxnTimeouts {
            lock_timeout: Duration::from_millis(topology.lock_timeout_ms),
            prepare_timeout: Duration::from_millis(topology.prepare_timeout_ms),
            client_reply_timeout: Duration::from_millis(topology.client_reply_timeout_ms),
            txn_phase_timeout: Duration::from_millis(topology.txn_phase_timeout_ms),
            backend_acquire_timeout: Duration::from_millis(topology.backend_pool_acquire_timeout_ms),
        };

        let txn = TxnCoordinator::new(
            self_id,
            messenger.clone(),
            health.clone(),
            election.clone(),
            locks.clone(),
            backend,
            txn_log,
            audit,
            load_balance_strategy,
            timeouts,
        );

        router.wire(health.clone(), election.clone(), txn.clone());

        Ok(Arc::new(Node {
            self_id,
            config_hash,
            messenger,
            health,
            election,
            locks,
            txn,
            events: events_tx,
            messenger_bind_addr,
            client_bind_addr,
            admin_bind_addr,
            listener_task: AsyncMutex::new(None),
            client_listener_task: AsyncMutex::new(None),
        }))
    }

    /// Starts every background loop: the messenger's accept loop, the
    /// client text socket's accept loop, the heartbeat sender/checker, and
    /// the initial election (at startup, with no known coordinator).
    /// Idempotent only in the sense that calling it twice
    /// spawns second accept loops bound to the same addresses, which will
    /// fail — callers call this once.
    pub async fn spawn(self: &Arc<Node>) {
        self.spawn_messenger_listener().await;
        self.spawn_client_listener().await;

        self.health.spawn();
        self.election.start().await;
        self.txn.recover_unresolved().await;

        info!(node_id = %self.self_id, config_hash = %self.config_hash, "node started");
    }

    async fn spawn_messenger_listener(self: &Arc<Node>) {
        let messenger = self.messenger.clone();
        let bind_addr = self.messenger_bind_addr;
        let handle = tokio::spawn(async move {
            if let Err(e) = messenger.listen(bind_addr).await {
                tracing::warn!(error = %e, "messenger listen loop exited");
            }
        });
        *self.listener_task.lock().await = Some(handle);
    }

    async fn spawn_client_listener(self: &Arc<Node>) {
        let txn = self.txn.clone();
        let bind_addr = self.client_bind_addr;
        let handle = tokio::spawn(async move {
            if let Err(e) = client_listener::serve(txn, bind_addr).await {
                tracing::warn!(error = %e, "client listener exited");
            }
        });
        *self.client_listener_task.lock().await = Some(handle);
    }

    /// Simulates this node becoming unreachable: closes
    /// both listening sockets so peer dials fail with `UNREACHABLE_PEER`
    /// and client connections are refused, without tearing down in-memory
    /// state. Used by the test harness to "kill" a node; `spawn` (or
    /// `restart_listener`) can be called again afterward to "restart" it.
    pub async fn stop_accepting(&self) {
        if let Some(handle) = self.listener_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.client_listener_task.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn restart_listener(self: &Arc<Node>) {
        self.stop_accepting().await;
        self.spawn_messenger_listener().await;
        self.spawn_client_listener().await;
    }
}
