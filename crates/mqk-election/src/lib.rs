//! Election Engine (Bully algorithm).
//!
//! Owns `CoordinatorView` exclusively; every other component reads it
//! through `snapshot()`, a plain value clone, never a lock guard. Drives
//! the pure state machine in `state_machine` and fans its `Effect`s out
//! to message sends and fenced timers.

pub mod state_machine;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use mqk_health::{CoordinatorSnapshot, HealthEvents};
use mqk_messenger::Messenger;
use mqk_schemas::{CoordinatorView, Message, MessageKind, NodeId};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use state_machine::{Effect, ElectionEvent, ElectionState, ElectionStateMachine};

pub struct Election {
    self_weak: Weak<Election>,
    self_id: NodeId,
    peer_ids: Vec<NodeId>,
    sm: Mutex<ElectionStateMachine>,
    view: RwLock<CoordinatorView>,
    messenger: Arc<Messenger>,
    elect_timeout: Duration,
    coord_wait_timeout: Duration,
    /// Fences stale timers: a timer only fires its event if the epoch it
    /// captured at spawn time is still current.
    epoch: AtomicU64,
}

impl Election {
    pub fn new(
        self_id: NodeId,
        peer_ids: Vec<NodeId>,
        messenger: Arc<Messenger>,
        elect_timeout: Duration,
        coord_wait_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let sm = ElectionStateMachine::new(self_id);
            let view = sm.view();
            Self {
                self_weak: weak.clone(),
                self_id,
                peer_ids,
                sm: Mutex::new(sm),
                view: RwLock::new(view),
                messenger,
                elect_timeout,
                coord_wait_timeout,
                epoch: AtomicU64::new(0),
            }
        })
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_weak.upgrade().expect("Election dropped while still in use")
    }

    /// Kicks off the initial election at process startup.
    pub async fn start(&self) {
        self.handle_event(ElectionEvent::Startup).await;
    }

    pub fn snapshot(&self) -> CoordinatorView {
        self.view.read().expect("view lock poisoned").clone()
    }

    pub async fn on_election(&self, from: NodeId) {
        self.handle_event(ElectionEvent::ReceivedElection { from }).await;
    }

    pub async fn on_alive(&self, from: NodeId) {
        self.handle_event(ElectionEvent::ReceivedAlive { from }).await;
    }

    pub async fn on_coordinator(&self, id: NodeId, term: u64) {
        self.handle_event(ElectionEvent::ReceivedCoordinator { id, term }).await;
    }

    pub async fn handle_event(&self, event: ElectionEvent) {
        let effects = {
            let mut sm = self.sm.lock().await;
            let before = sm.state;
            let before_term = sm.term;
            match sm.apply(event.clone()) {
                Ok(effects) => {
                    if sm.state != before || sm.term != before_term {
                        info!(
                            node_id = %self.self_id,
                            from = ?before,
                            to = ?sm.state,
                            term = sm.term,
                            "election transition"
                        );
                    }
                    *self.view.write().expect("view lock poisoned") = sm.view();
                    effects
                }
                Err(e) => {
                    warn!(node_id = %self.self_id, error = %e, "election: ignoring illegal event");
                    return;
                }
            }
        };

        for effect in effects {
            self.execute_effect(effect).await;
        }
    }

    async fn execute_effect(&self, effect: Effect) {
        match effect {
            Effect::SendElectionToHigher => {
                let term = self.snapshot().term;
                for &peer in self.peer_ids.iter().filter(|p| p.0 > self.self_id.0) {
                    let msg = Message::new(self.self_id, MessageKind::Election, json!({"term": term}));
                    let _ = self.messenger.send(peer, msg).await;
                }
            }
            Effect::SendAliveTo(to) => {
                let msg = Message::new(self.self_id, MessageKind::Alive, json!({}));
                let _ = self.messenger.send(to, msg).await;
            }
            Effect::BroadcastCoordinator => {
                let term = self.snapshot().term;
                for &peer in &self.peer_ids {
                    let msg = Message::new(
                        self.self_id,
                        MessageKind::Coordinator,
                        json!({"id": self.self_id.0, "term": term}),
                    );
                    let _ = self.messenger.send(peer, msg).await;
                }
            }
            Effect::StartElectTimer => self.start_timer(self.elect_timeout, ElectionEvent::ElectTimerExpired),
            Effect::StartCoordTimer => self.start_timer(self.coord_wait_timeout, ElectionEvent::CoordTimerExpired),
        }
    }

    fn start_timer(&self, duration: Duration, event: ElectionEvent) {
        let my_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.arc_self();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if this.epoch.load(Ordering::SeqCst) == my_epoch {
                this.handle_event(event).await;
            }
        });
    }
}

impl CoordinatorSnapshot for Election {
    fn snapshot(&self) -> CoordinatorView {
        Election::snapshot(self)
    }
}

#[async_trait]
impl HealthEvents for Election {
    async fn peer_up(&self, _id: NodeId) {}

    async fn peer_down(&self, _id: NodeId) {}

    async fn coordinator_lost(&self, _term: u64) {
        // The term argument is informational only; start_election always
        // bumps `self.term`, which is authoritative.
        self.handle_event(ElectionEvent::CoordinatorLost).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as at;
    use std::collections::HashMap;

    struct Noop;
    #[at]
    impl mqk_messenger::MessageHandler for Noop {
        async fn handle(&self, _msg: Message) {}
    }

    fn messenger(id: NodeId) -> Arc<Messenger> {
        Messenger::new(id, HashMap::new(), Duration::from_millis(20), 1, Arc::new(Noop))
    }

    #[tokio::test(start_paused = true)]
    async fn lone_highest_node_becomes_coordinator() {
        let election = Election::new(
            NodeId(3),
            vec![NodeId(1), NodeId(2)],
            messenger(NodeId(3)),
            Duration::from_millis(50),
            Duration::from_millis(100),
        );
        election.start().await;
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(election.snapshot().current_coordinator_id, Some(NodeId(3)));
    }

    #[tokio::test]
    async fn stale_announcement_does_not_move_term_backward() {
        let election = Election::new(
            NodeId(1),
            vec![NodeId(2)],
            messenger(NodeId(1)),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        election.on_coordinator(NodeId(2), 7).await;
        assert_eq!(election.snapshot().term, 7);
        election.on_coordinator(NodeId(9), 3).await;
        assert_eq!(election.snapshot().term, 7);
        assert_eq!(election.snapshot().current_coordinator_id, Some(NodeId(2)));
    }
}
