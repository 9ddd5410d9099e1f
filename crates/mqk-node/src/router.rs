//! Inbound message router.
//!
//! The Messenger only knows about one `MessageHandler`; this is it. It
//! exists solely to fan a `Message` out by `kind` to the one component
//! that owns handling it — HEARTBEAT to Health, ELECTION/ALIVE/COORDINATOR
//! to Election, everything else to the Transaction Coordinator — so none
//! of those crates need to know about each other's wire formats.
//!
//! Construction is circular (the Messenger needs a handler before Health/
//! Election/the Transaction Coordinator can be built, since they all hold
//! a reference to the Messenger themselves), so the router is built empty
//! and wired with `OnceLock`s immediately after.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mqk_election::Election;
use mqk_health::Health;
use mqk_messenger::MessageHandler;
use mqk_schemas::{Message, MessageKind, NodeId};
use mqk_txn::TxnCoordinator;
use serde_json::Value;
use tracing::warn;

#[derive(Default)]
pub struct NodeRouter {
    health: OnceLock<Arc<Health>>,
    election: OnceLock<Arc<Election>>,
    txn: OnceLock<Arc<TxnCoordinator>>,
}

impl NodeRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn wire(&self, health: Arc<Health>, election: Arc<Election>, txn: Arc<TxnCoordinator>) {
        let _ = self.health.set(health);
        let _ = self.election.set(election);
        let _ = self.txn.set(txn);
    }
}

#[async_trait]
impl MessageHandler for NodeRouter {
    async fn handle(&self, msg: Message) {
        let sender = msg.sender_id;
        match msg.kind {
            MessageKind::Heartbeat => {
                if let Some(health) = self.health.get() {
                    health.on_heartbeat(sender).await;
                }
            }
            MessageKind::Election => {
                if let Some(election) = self.election.get() {
                    election.on_election(sender).await;
                }
            }
            MessageKind::Alive => {
                if let Some(election) = self.election.get() {
                    election.on_alive(sender).await;
                }
            }
            MessageKind::Coordinator => {
                let Some((id, term)) = parse_coordinator_payload(&msg.payload) else {
                    warn!(sender = %sender, "malformed COORDINATOR payload, dropping");
                    return;
                };
                if let Some(election) = self.election.get() {
                    election.on_coordinator(NodeId(id), term).await;
                }
            }
            MessageKind::ClientRequest
            | MessageKind::ClientReply
            | MessageKind::Prepare
            | MessageKind::Vote
            | MessageKind::Commit
            | MessageKind::Abort
            | MessageKind::Ack
            | MessageKind::ExecuteRead
            | MessageKind::ReadResult
            | MessageKind::TxnStatus
            | MessageKind::TxnStatusReply => {
                if let Some(txn) = self.txn.get() {
                    txn.on_message(msg).await;
                }
            }
        }
    }
}

fn parse_coordinator_payload(payload: &Value) -> Option<(u32, u64)> {
    let id = payload.get("id")?.as_u64()? as u32;
    let term = payload.get("term")?.as_u64()?;
    Some((id, term))
}
