//! Node topology and cluster-view types.
//!
//! `NodeDescriptor` is loaded once at startup from static configuration and
//! never mutates. `PeerState` and `CoordinatorView` are the two tables the
//! control plane mutates continuously, each owned by exactly one component
//! (Heartbeat owns `PeerState`, Election owns `CoordinatorView`) so no two
//! components ever race on the same mutable state.

use serde::{Deserialize, Serialize};

/// A small positive integer, unique and totally ordered within the cluster.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static, immutable description of one cluster member, including its
/// co-located backend connection parameters. Loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub address: String,
    /// Inter-node Framed Messenger listen port.
    pub port: u16,
    /// Client-facing text socket listen port. Deliberately distinct from
    /// `port`: the two speak
    /// different wire protocols (checksummed JSON frames vs. one raw
    /// statement per connection) and must not share a listener.
    pub client_port: u16,
    pub backend_host: String,
    pub backend_port: u16,
    pub backend_database: String,
    pub backend_user: String,
}

/// Liveness status derived from heartbeat arrival/timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Up,
    Down,
}

/// Per-peer liveness bookkeeping, owned exclusively by the Heartbeat &
/// Health component. `last_heartbeat_at` is measured against the node's own
/// monotonic clock; there is no cross-node clock comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerState {
    pub node_id: NodeId,
    pub last_heartbeat_at_millis: i64,
    pub status: PeerStatus,
}

impl PeerState {
    pub fn newly_seen(node_id: NodeId, now_millis: i64) -> Self {
        Self {
            node_id,
            last_heartbeat_at_millis: now_millis,
            status: PeerStatus::Up,
        }
    }
}

/// The Election Engine's published view of who the current coordinator is,
/// read by the Transaction Coordinator. `term` increases by exactly one on
/// every completed election; a `CoordinatorView` with a stale term must
/// never overwrite one with a newer term — `term` is monotonically
/// non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorView {
    pub current_coordinator_id: Option<NodeId>,
    pub election_in_progress: bool,
    pub term: u64,
}

impl CoordinatorView {
    pub fn unknown() -> Self {
        Self {
            current_coordinator_id: None,
            election_in_progress: false,
            term: 0,
        }
    }
}
