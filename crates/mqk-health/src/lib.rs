//! Heartbeat & Health.
//!
//! Owns `PeerState` exclusively — no other component mutates it. Other
//! components read a point-in-time snapshot through `up_set`/`status_of`,
//! never a lock guard, so a slow reader can never hold this component's
//! internal lock across its own work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mqk_messenger::Messenger;
use mqk_schemas::{CoordinatorView, Message, MessageKind, NodeId, PeerStatus};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Read-only snapshot accessor into the Election Engine's published view,
/// so Health can decide whether the dead peer was the coordinator without
/// owning `CoordinatorView` itself.
pub trait CoordinatorSnapshot: Send + Sync {
    fn snapshot(&self) -> CoordinatorView;
}

/// Transition events Health publishes. Implemented by the Election Engine
/// (which reacts to `coordinator_lost`) and by the admin HTTP surface
/// (which reacts to all three for the SSE event stream).
#[async_trait]
pub trait HealthEvents: Send + Sync {
    async fn peer_up(&self, id: NodeId);
    async fn peer_down(&self, id: NodeId);
    async fn coordinator_lost(&self, term: u64);
}

#[derive(Debug, Clone)]
struct PeerEntry {
    last_heartbeat_at: Instant,
    status: PeerStatus,
}

pub struct Health {
    self_id: NodeId,
    peers: Mutex<HashMap<NodeId, PeerEntry>>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    messenger: Arc<Messenger>,
    events: Arc<dyn HealthEvents>,
    coordinator: Arc<dyn CoordinatorSnapshot>,
}

impl Health {
    pub fn new(
        self_id: NodeId,
        peer_ids: &[NodeId],
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
        messenger: Arc<Messenger>,
        events: Arc<dyn HealthEvents>,
        coordinator: Arc<dyn CoordinatorSnapshot>,
    ) -> Arc<Self> {
        let now = Instant::now();
        let peers = peer_ids
            .iter()
            .map(|id| {
                (
                    *id,
                    PeerEntry {
                        last_heartbeat_at: now,
                        status: PeerStatus::Up,
                    },
                )
            })
            .collect();

        Arc::new(Self {
            self_id,
            peers: Mutex::new(peers),
            heartbeat_interval,
            heartbeat_timeout,
            messenger,
            events,
            coordinator,
        })
    }

    /// Spawns the two background loops: the periodic sender (emits
    /// HEARTBEAT to every peer) and the periodic checker (flips status on
    /// timeout, publishes transition events and `coordinator_lost`).
    pub fn spawn(self: &Arc<Self>) {
        let sender = self.clone();
        tokio::spawn(async move { sender.run_sender_loop().await });

        let checker = self.clone();
        tokio::spawn(async move { checker.run_checker_loop().await });
    }

    async fn run_sender_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        loop {
            ticker.tick().await;
            let peer_ids: Vec<NodeId> = {
                let peers = self.peers.lock().await;
                peers.keys().copied().collect()
            };
            for peer_id in peer_ids {
                let msg = Message::new(self.self_id, MessageKind::Heartbeat, json!({}));
                // Messenger never retries; a failed send here is simply
                // absorbed — the checker loop will eventually mark the
                // peer DOWN if heartbeats keep failing.
                let _ = self.messenger.send(peer_id, msg).await;
            }
        }
    }

    async fn run_checker_loop(self: Arc<Self>) {
        // Check more frequently than the timeout so a DOWN transition is
        // detected promptly, without being so tight it churns the lock.
        let mut ticker = tokio::time::interval(self.heartbeat_interval.min(self.heartbeat_timeout) / 2 + Duration::from_millis(1));
        loop {
            ticker.tick().await;
            self.check_timeouts().await;
        }
    }

    async fn check_timeouts(self: &Arc<Self>) {
        let now = Instant::now();
        let mut newly_down = Vec::new();
        {
            let mut peers = self.peers.lock().await;
            for (id, entry) in peers.iter_mut() {
                if entry.status == PeerStatus::Up
                    && now.duration_since(entry.last_heartbeat_at) > self.heartbeat_timeout
                {
                    entry.status = PeerStatus::Down;
                    newly_down.push(*id);
                }
            }
        }
        for id in &newly_down {
            warn!(peer = %id, "peer marked DOWN");
            self.events.peer_down(*id).await;
        }
        if !newly_down.is_empty() {
            let view = self.coordinator.snapshot();
            if let Some(coord_id) = view.current_coordinator_id {
                if newly_down.contains(&coord_id) && !view.election_in_progress {
                    info!(term = view.term, coordinator = %coord_id, "coordinator lost");
                    self.events.coordinator_lost(view.term).await;
                }
            }
        }
    }

    /// Records an inbound HEARTBEAT from `sender_id`, flipping it back to
    /// UP if it had timed out.
    pub async fn on_heartbeat(&self, sender_id: NodeId) {
        let became_up = {
            let mut peers = self.peers.lock().await;
            let entry = peers.entry(sender_id).or_insert_with(|| PeerEntry {
                last_heartbeat_at: Instant::now(),
                status: PeerStatus::Up,
            });
            let was_down = entry.status == PeerStatus::Down;
            entry.last_heartbeat_at = Instant::now();
            entry.status = PeerStatus::Up;
            was_down
        };
        if became_up {
            info!(peer = %sender_id, "peer back UP");
            self.events.peer_up(sender_id).await;
        }
    }

    /// Snapshot of every peer currently considered UP, including self
    /// (this node is always up with respect to itself).
    pub async fn up_set(&self) -> Vec<NodeId> {
        let mut up = vec![self.self_id];
        let peers = self.peers.lock().await;
        up.extend(peers.iter().filter(|(_, e)| e.status == PeerStatus::Up).map(|(id, _)| *id));
        up.sort();
        up
    }

    /// Snapshot of every known peer's current status, for the admin
    /// status surface. Does not include self.
    pub async fn peer_snapshot(&self) -> Vec<(NodeId, PeerStatus)> {
        let peers = self.peers.lock().await;
        let mut snapshot: Vec<(NodeId, PeerStatus)> = peers.iter().map(|(id, e)| (*id, e.status)).collect();
        snapshot.sort_by_key(|(id, _)| *id);
        snapshot
    }

    pub async fn is_up(&self, id: NodeId) -> bool {
        if id == self.self_id {
            return true;
        }
        let peers = self.peers.lock().await;
        peers.get(&id).map(|e| e.status == PeerStatus::Up).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct NoopCoordinator;
    impl CoordinatorSnapshot for NoopCoordinator {
        fn snapshot(&self) -> CoordinatorView {
            CoordinatorView::unknown()
        }
    }

    struct RecordingEvents {
        downs: StdMutex<Vec<NodeId>>,
        ups: StdMutex<Vec<NodeId>>,
        lost: AtomicU32,
    }

    #[async_trait]
    impl HealthEvents for RecordingEvents {
        async fn peer_up(&self, id: NodeId) {
            self.ups.lock().unwrap().push(id);
        }
        async fn peer_down(&self, id: NodeId) {
            self.downs.lock().unwrap().push(id);
        }
        async fn coordinator_lost(&self, _term: u64) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_messenger(self_id: NodeId) -> Arc<Messenger> {
        struct Noop;
        #[async_trait]
        impl mqk_messenger::MessageHandler for Noop {
            async fn handle(&self, _msg: Message) {}
        }
        Messenger::new(
            self_id,
            StdHashMap::new(),
            Duration::from_millis(50),
            1,
            Arc::new(Noop),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn peer_flips_down_after_timeout_and_up_again_on_heartbeat() {
        let events = Arc::new(RecordingEvents {
            downs: StdMutex::new(vec![]),
            ups: StdMutex::new(vec![]),
            lost: AtomicU32::new(0),
        });
        let health = Health::new(
            NodeId(1),
            &[NodeId(2)],
            Duration::from_millis(1000),
            Duration::from_millis(50),
            test_messenger(NodeId(1)),
            events.clone(),
            Arc::new(NoopCoordinator),
        );

        assert_eq!(health.up_set().await, vec![NodeId(1), NodeId(2)]);

        tokio::time::advance(Duration::from_millis(60)).await;
        health.check_timeouts().await;
        assert_eq!(health.up_set().await, vec![NodeId(1)]);
        assert_eq!(events.downs.lock().unwrap().as_slice(), &[NodeId(2)]);

        health.on_heartbeat(NodeId(2)).await;
        assert_eq!(health.up_set().await, vec![NodeId(1), NodeId(2)]);
        assert_eq!(events.ups.lock().unwrap().as_slice(), &[NodeId(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn coordinator_loss_fires_when_coordinator_peer_times_out() {
        struct FixedCoordinator;
        impl CoordinatorSnapshot for FixedCoordinator {
            fn snapshot(&self) -> CoordinatorView {
                CoordinatorView {
                    current_coordinator_id: Some(NodeId(2)),
                    election_in_progress: false,
                    term: 1,
                }
            }
        }

        let events = Arc::new(RecordingEvents {
            downs: StdMutex::new(vec![]),
            ups: StdMutex::new(vec![]),
            lost: AtomicU32::new(0),
        });
        let health = Health::new(
            NodeId(1),
            &[NodeId(2)],
            Duration::from_millis(1000),
            Duration::from_millis(50),
            test_messenger(NodeId(1)),
            events.clone(),
            Arc::new(FixedCoordinator),
        );

        tokio::time::advance(Duration::from_millis(60)).await;
        health.check_timeouts().await;

        assert_eq!(events.lost.load(Ordering::SeqCst), 1);
    }
}
