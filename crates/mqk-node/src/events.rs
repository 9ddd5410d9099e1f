//! Event fan-out from Heartbeat & Health to the admin SSE surface and
//! into the Election Engine's "coordinator lost" handling.
//!
//! `Health` only knows about one `HealthEvents` sink — one owner per
//! table, small accessor seams between components — so this is the
//! single implementation every node wires in: it forwards
//! `coordinator_lost` into the Election Engine exactly like
//! `mqk_election::Election`'s own `HealthEvents` impl would, and also
//! broadcasts all three transitions for `/v1/events`.

use async_trait::async_trait;
use mqk_election::Election;
use mqk_health::HealthEvents;
use mqk_schemas::NodeId;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One line of the `/v1/events` SSE stream on the admin HTTP surface.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    PeerUp { node_id: NodeId },
    PeerDown { node_id: NodeId },
    CoordinatorLost { term: u64 },
    ElectionTransition { coordinator_id: Option<NodeId>, term: u64 },
}

pub struct NodeEvents {
    election: Arc<Election>,
    bus: broadcast::Sender<NodeEvent>,
}

impl NodeEvents {
    pub fn new(election: Arc<Election>, bus: broadcast::Sender<NodeEvent>) -> Arc<Self> {
        Arc::new(Self { election, bus })
    }
}

#[async_trait]
impl HealthEvents for NodeEvents {
    async fn peer_up(&self, id: NodeId) {
        let _ = self.bus.send(NodeEvent::PeerUp { node_id: id });
    }

    async fn peer_down(&self, id: NodeId) {
        let _ = self.bus.send(NodeEvent::PeerDown { node_id: id });
    }

    async fn coordinator_lost(&self, term: u64) {
        let _ = self.bus.send(NodeEvent::CoordinatorLost { term });
        self.election.coordinator_lost(term).await;
        let view = self.election.snapshot();
        let _ = self.bus.send(NodeEvent::ElectionTransition {
            coordinator_id: view.current_coordinator_id,
            term: view.term,
        });
    }
}
