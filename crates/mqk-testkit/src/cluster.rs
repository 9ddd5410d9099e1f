//! In-process multi-node cluster, a scenario-test harness.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mqk_config::TopologyConfig;
use mqk_db::{Backend, FakeBackend, InMemoryTxnLog, QueryRow, TxnLogEntry, TxnLogStore};
use mqk_node::Node;
use mqk_schemas::{ClientReply, NodeDescriptor, NodeId};
use mqk_txn::LoadBalanceStrategy;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::counting_backend::CountingBackend;

/// Every timeout a test cluster's nodes run with, kept far shorter than
/// production defaults (`mqk-config`'s `default_*_ms`) so scenario tests
/// covering failure detection and election don't spend real wall-clock
/// seconds waiting one out.
#[derive(Debug, Clone, Copy)]
pub struct TestClusterConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub prepare_timeout_ms: u64,
    pub election_timeout_ms: u64,
    pub coordinator_wait_timeout_ms: u64,
    pub txn_phase_timeout_ms: u64,
    pub client_reply_timeout_ms: u64,
    pub backend_pool_size: u32,
}

impl Default for TestClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 50,
            heartbeat_timeout_ms: 200,
            lock_timeout_ms: 500,
            prepare_timeout_ms: 500,
            election_timeout_ms: 150,
            coordinator_wait_timeout_ms: 300,
            txn_phase_timeout_ms: 1000,
            client_reply_timeout_ms: 1000,
            backend_pool_size: 5,
        }
    }
}

static NEXT_PORT: AtomicU16 = AtomicU16::new(21000);

fn allocate_port_block() -> (u16, u16, u16) {
    let base = NEXT_PORT.fetch_add(10, Ordering::SeqCst);
    (base, base + 1, base + 2)
}

pub struct TestNode {
    pub node: Arc<Node>,
    pub fake_backend: Arc<FakeBackend>,
    pub counting_backend: Arc<CountingBackend>,
    pub txn_log: Arc<InMemoryTxnLog>,
}

pub struct TestCluster {
    pub nodes: Vec<TestNode>,
    pub topology: TopologyConfig,
}

impl TestCluster {
    /// Brings up `n` nodes, each against its own `FakeBackend`, wired with
    /// real TCP sockets, and waits for the cluster to converge on a single
    /// coordinator before returning.
    pub async fn start(n: usize, cfg: TestClusterConfig) -> Self {
        Self::start_with_strategy(n, cfg, LoadBalanceStrategy::RoundRobin).await
    }

    pub async fn start_with_strategy(
        n: usize,
        cfg: TestClusterConfig,
        load_balance_strategy: LoadBalanceStrategy,
    ) -> Self {
        assert!(n >= 1, "a test cluster needs at least one node");

        let mut descriptors = Vec::with_capacity(n);
        for i in 0..n {
            let node_id = NodeId((i + 1) as u32);
            let (msg_port, client_port, _admin_port) = allocate_port_block();
            descriptors.push(NodeDescriptor {
                node_id,
                address: "127.0.0.1".to_string(),
                port: msg_port,
                client_port,
                backend_host: "127.0.0.1".to_string(),
                backend_port: 0,
                backend_database: format!("testkit-{node_id}"),
                backend_user: "testkit".to_string(),
            });
        }

        let topology = TopologyConfig {
            nodes: descriptors,
            heartbeat_interval_ms: cfg.heartbeat_interval_ms,
            heartbeat_timeout_ms: cfg.heartbeat_timeout_ms,
            lock_timeout_ms: cfg.lock_timeout_ms,
            prepare_timeout_ms: cfg.prepare_timeout_ms,
            election_timeout_ms: cfg.election_timeout_ms,
            coordinator_wait_timeout_ms: cfg.coordinator_wait_timeout_ms,
            txn_phase_timeout_ms: cfg.txn_phase_timeout_ms,
            client_reply_timeout_ms: cfg.client_reply_timeout_ms,
            backend_pool_size: cfg.backend_pool_size,
            backend_pool_acquire_timeout_ms: cfg.lock_timeout_ms,
            admin_http_port: None,
            audit_log_path: None,
            load_balance_strategy: match load_balance_strategy {
                LoadBalanceStrategy::RoundRobin => mqk_config::topology::LoadBalanceStrategyConfig::RoundRobin,
                LoadBalanceStrategy::LeastLoaded => mqk_config::topology::LoadBalanceStrategyConfig::LeastLoaded,
            },
        };

        let mut nodes = Vec::with_capacity(n);
        for desc in &topology.nodes {
            let fake_backend = Arc::new(FakeBackend::new(cfg.backend_pool_size as usize));
            let counting_backend = CountingBackend::new(fake_backend.clone());
            let txn_log = Arc::new(InMemoryTxnLog::new(desc.node_id));

            let node = Node::build(
                desc.node_id,
                &topology,
                format!("testkit-config-hash-{}", desc.node_id),
                counting_backend.clone() as Arc<dyn Backend>,
                txn_log.clone() as Arc<dyn TxnLogStore>,
                None,
                load_balance_strategy,
            )
            .expect("building a test node from an in-memory topology must not fail");

            nodes.push(TestNode {
                node,
                fake_backend,
                counting_backend,
                txn_log,
            });
        }

        for tn in &nodes {
            tn.node.spawn().await;
        }

        let cluster = TestCluster { nodes, topology };
        cluster
            .wait_for_stable_coordinator(Duration::from_millis(
                cfg.election_timeout_ms * 4 + cfg.coordinator_wait_timeout_ms * 2,
            ))
            .await;
        cluster
    }

    /// Sends one statement over node `idx`'s client socket and decodes its
    /// reply, exactly as a real client would.
    pub async fn client_statement(&self, idx: usize, statement: &str) -> anyhow::Result<ClientReply> {
        let addr: SocketAddr = self.nodes[idx].node.client_bind_addr;
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(statement.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        let (read_half, _write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Polls every node's published `CoordinatorView` until all live nodes
    /// agree on the same non-`None` coordinator, or `timeout` elapses.
    pub async fn wait_for_stable_coordinator(&self, timeout: Duration) -> Option<NodeId> {
        self.wait_for_stable_coordinator_excluding(&[], timeout).await
    }

    /// Same as `wait_for_stable_coordinator`, but ignores the views of the
    /// indices in `excluded` — a killed node's own view is frozen at
    /// whatever it last saw and never re-converges with the survivors.
    pub async fn wait_for_stable_coordinator_excluding(
        &self,
        excluded: &[usize],
        timeout: Duration,
    ) -> Option<NodeId> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let views: Vec<_> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| !excluded.contains(i))
                .map(|(_, n)| n.node.election.snapshot())
                .collect();
            let all_agree = !views.is_empty()
                && views.iter().all(|v| !v.election_in_progress)
                && views
                    .iter()
                    .all(|v| v.current_coordinator_id == views[0].current_coordinator_id)
                && views[0].current_coordinator_id.is_some();
            if all_agree {
                return views[0].current_coordinator_id;
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Simulates node `idx` dying: its own listeners stop accepting, and
    /// every surviving peer's already-open outbound connection to it is
    /// severed, so the next send to it fails as `UNREACHABLE_PEER` instead
    /// of silently reusing a half-open socket.
    pub async fn kill(&self, idx: usize) {
        let dead_id = self.nodes[idx].node.self_id;
        self.nodes[idx].node.stop_accepting().await;
        for (i, tn) in self.nodes.iter().enumerate() {
            if i != idx {
                tn.node.messenger.disconnect(dead_id).await;
            }
        }
    }

    pub async fn restart(&self, idx: usize) {
        self.nodes[idx].node.restart_listener().await;
    }

    pub async fn rows_of(&self, idx: usize, table: &str) -> Vec<QueryRow> {
        self.nodes[idx].fake_backend.rows_of(table).await
    }

    pub fn txn_log_entries(&self, idx: usize, txn_id: &str) -> Vec<TxnLogEntry> {
        self.nodes[idx].txn_log.entries_for(txn_id)
    }

    pub fn messenger_bind_addr(&self, idx: usize) -> SocketAddr {
        self.nodes[idx].node.messenger_bind_addr
    }
}
