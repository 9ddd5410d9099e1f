//! Pure Bully state machine, kept free of I/O so its
//! transitions are trivial to unit test. The driver in `lib.rs` owns all
//! the timers and message sends the `Effect`s it returns describe.

use mqk_schemas::{CoordinatorView, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Follower,
    Electing,
    WaitingForHigher,
    Coordinator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEvent {
    Startup,
    CoordinatorLost,
    ReceivedElection { from: NodeId },
    ReceivedAlive { from: NodeId },
    ReceivedCoordinator { id: NodeId, term: u64 },
    ElectTimerExpired,
    CoordTimerExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SendElectionToHigher,
    SendAliveTo(NodeId),
    BroadcastCoordinator,
    StartElectTimer,
    StartCoordTimer,
}

/// Returned when an event cannot legally be applied in the current state.
/// Callers log and drop it — a stray wire message, not a reason to stop
/// the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionTransitionError {
    pub from: ElectionState,
    pub event: String,
}

impl std::fmt::Display for ElectionTransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal election transition: {:?} + {}", self.from, self.event)
    }
}

impl std::error::Error for ElectionTransitionError {}

pub struct ElectionStateMachine {
    pub state: ElectionState,
    pub term: u64,
    pub self_id: NodeId,
    pub current_coordinator_id: Option<NodeId>,
}

impl ElectionStateMachine {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            state: ElectionState::Follower,
            term: 0,
            self_id,
            current_coordinator_id: None,
        }
    }

    /// Snapshot suitable for publishing to readers outside this component.
    pub fn view(&self) -> CoordinatorView {
        CoordinatorView {
            current_coordinator_id: self.current_coordinator_id,
            election_in_progress: matches!(
                self.state,
                ElectionState::Electing | ElectionState::WaitingForHigher
            ),
            term: self.term,
        }
    }

    fn start_election(&mut self) -> Vec<Effect> {
        self.term += 1;
        self.state = ElectionState::Electing;
        self.current_coordinator_id = None;
        vec![Effect::SendElectionToHigher, Effect::StartElectTimer]
    }

    pub fn apply(&mut self, event: ElectionEvent) -> Result<Vec<Effect>, ElectionTransitionError> {
        use ElectionEvent::*;
        use ElectionState::*;

        let err = |from: ElectionState| ElectionTransitionError {
            from,
            event: format!("{event:?}"),
        };

        match event {
            Startup | CoordinatorLost => Ok(self.start_election()),

            ReceivedElection { from } => {
                if from >= self.self_id {
                    return Err(err(self.state));
                }
                let mut effects = vec![Effect::SendAliveTo(from)];
                if self.state != Electing {
                    effects.extend(self.start_election());
                }
                Ok(effects)
            }

            ReceivedAlive { from: _ } => {
                if self.state != Electing {
                    return Err(err(self.state));
                }
                self.state = WaitingForHigher;
                Ok(vec![Effect::StartCoordTimer])
            }

            ReceivedCoordinator { id, term } => {
                // A stale announcement (lower term than ours) is a
                // documented no-op, not an illegal transition — term is
                // monotonically non-decreasing.
                if term < self.term {
                    return Ok(vec![]);
                }
                self.term = term;
                self.state = Follower;
                self.current_coordinator_id = Some(id);
                Ok(vec![])
            }

            ElectTimerExpired => {
                if self.state != Electing {
                    // Timer fired after we already left Electing (ALIVE
                    // or a COORDINATOR announcement arrived first).
                    return Ok(vec![]);
                }
                self.state = Coordinator;
                self.current_coordinator_id = Some(self.self_id);
                Ok(vec![Effect::BroadcastCoordinator])
            }

            CoordTimerExpired => {
                if self.state != WaitingForHigher {
                    return Ok(vec![]);
                }
                Ok(self.start_election())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_with_no_higher_peer_becomes_coordinator_on_timeout() {
        let mut sm = ElectionStateMachine::new(NodeId(3));
        let effects = sm.apply(ElectionEvent::Startup).unwrap();
        assert_eq!(effects, vec![Effect::SendElectionToHigher, Effect::StartElectTimer]);
        assert_eq!(sm.state, ElectionState::Electing);
        assert_eq!(sm.term, 1);

        let effects = sm.apply(ElectionEvent::ElectTimerExpired).unwrap();
        assert_eq!(effects, vec![Effect::BroadcastCoordinator]);
        assert_eq!(sm.state, ElectionState::Coordinator);
        assert_eq!(sm.current_coordinator_id, Some(NodeId(3)));
    }

    #[test]
    fn alive_from_higher_peer_waits_then_restarts_on_coord_timeout() {
        let mut sm = ElectionStateMachine::new(NodeId(1));
        sm.apply(ElectionEvent::Startup).unwrap();
        let effects = sm.apply(ElectionEvent::ReceivedAlive { from: NodeId(3) }).unwrap();
        assert_eq!(effects, vec![Effect::StartCoordTimer]);
        assert_eq!(sm.state, ElectionState::WaitingForHigher);

        let effects = sm.apply(ElectionEvent::CoordTimerExpired).unwrap();
        assert_eq!(sm.term, 2, "restarted election bumps term again");
        assert_eq!(sm.state, ElectionState::Electing);
        assert_eq!(effects, vec![Effect::SendElectionToHigher, Effect::StartElectTimer]);
    }

    #[test]
    fn coordinator_announcement_with_higher_term_is_adopted() {
        let mut sm = ElectionStateMachine::new(NodeId(1));
        sm.apply(ElectionEvent::Startup).unwrap();
        let effects = sm
            .apply(ElectionEvent::ReceivedCoordinator { id: NodeId(3), term: 5 })
            .unwrap();
        assert!(effects.is_empty());
        assert_eq!(sm.state, ElectionState::Follower);
        assert_eq!(sm.term, 5);
        assert_eq!(sm.current_coordinator_id, Some(NodeId(3)));
    }

    #[test]
    fn stale_coordinator_announcement_is_ignored() {
        let mut sm = ElectionStateMachine::new(NodeId(1));
        sm.apply(ElectionEvent::ReceivedCoordinator { id: NodeId(2), term: 5 }).unwrap();
        assert_eq!(sm.term, 5);
        // A stale term-3 announcement must not roll term backward or adopt.
        sm.apply(ElectionEvent::ReceivedCoordinator { id: NodeId(9), term: 3 }).unwrap();
        assert_eq!(sm.term, 5);
        assert_eq!(sm.current_coordinator_id, Some(NodeId(2)));
    }

    #[test]
    fn lower_peer_election_triggers_alive_reply_and_own_election() {
        let mut sm = ElectionStateMachine::new(NodeId(3));
        let effects = sm.apply(ElectionEvent::ReceivedElection { from: NodeId(1) }).unwrap();
        assert!(effects.contains(&Effect::SendAliveTo(NodeId(1))));
        assert_eq!(sm.state, ElectionState::Electing);
    }

    #[test]
    fn term_never_decreases_across_arbitrary_event_sequences() {
        let mut sm = ElectionStateMachine::new(NodeId(2));
        let mut max_term_seen = 0;
        for event in [
            ElectionEvent::Startup,
            ElectionEvent::ReceivedAlive { from: NodeId(3) },
            ElectionEvent::CoordTimerExpired,
            ElectionEvent::ReceivedCoordinator { id: NodeId(3), term: 10 },
            ElectionEvent::CoordinatorLost,
        ] {
            let _ = sm.apply(event);
            assert!(sm.term >= max_term_seen);
            max_term_seen = sm.term;
        }
    }
}
