//! Read-dispatch load balancing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use mqk_schemas::NodeId;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalanceStrategy {
    RoundRobin,
    LeastLoaded,
}

/// Picks a read target from `up` (already sorted by `node_id`, the
/// tie-break shared by both strategies) and tracks in-flight session counts for
/// `LEAST_LOADED`.
pub struct LoadBalancer {
    strategy: LoadBalanceStrategy,
    rr_counter: AtomicU64,
    active_sessions: Mutex<HashMap<NodeId, u64>>,
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            rr_counter: AtomicU64::new(0),
            active_sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn pick(&self, up: &[NodeId]) -> NodeId {
        assert!(!up.is_empty(), "pick called with no UP nodes");
        match self.strategy {
            LoadBalanceStrategy::RoundRobin => {
                let idx = self.rr_counter.fetch_add(1, Ordering::SeqCst) as usize % up.len();
                up[idx]
            }
            LoadBalanceStrategy::LeastLoaded => {
                let loads = self.active_sessions.lock().await;
                *up.iter()
                    .min_by_key(|id| (loads.get(id).copied().unwrap_or(0), id.0))
                    .expect("up is non-empty")
            }
        }
    }

    /// Registers a new in-flight read or write session against `node`.
    pub async fn bump(&self, node: NodeId) {
        let mut loads = self.active_sessions.lock().await;
        *loads.entry(node).or_insert(0) += 1;
    }

    /// Retires an in-flight session for `node`.
    pub async fn release(&self, node: NodeId) {
        let mut loads = self.active_sessions.lock().await;
        if let Some(count) = loads.get_mut(&node) {
            *count = count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_robin_cycles_stably_over_up_set() {
        let lb = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);
        let up = vec![NodeId(1), NodeId(2), NodeId(3)];
        let mut picks = Vec::new();
        for _ in 0..9 {
            picks.push(lb.pick(&up).await);
        }
        let counts: HashMap<NodeId, usize> = picks.iter().fold(HashMap::new(), |mut acc, n| {
            *acc.entry(*n).or_insert(0) += 1;
            acc
        });
        assert_eq!(counts.get(&NodeId(1)), Some(&3));
        assert_eq!(counts.get(&NodeId(2)), Some(&3));
        assert_eq!(counts.get(&NodeId(3)), Some(&3));
    }

    #[tokio::test]
    async fn least_loaded_prefers_idle_node_and_breaks_ties_by_id() {
        let lb = LoadBalancer::new(LoadBalanceStrategy::LeastLoaded);
        let up = vec![NodeId(1), NodeId(2), NodeId(3)];
        lb.bump(NodeId(1)).await;
        lb.bump(NodeId(1)).await;
        lb.bump(NodeId(2)).await;
        assert_eq!(lb.pick(&up).await, NodeId(3));

        lb.release(NodeId(1)).await;
        lb.release(NodeId(1)).await;
        // node 1 and node 3 both idle now; tie broken by lower node_id.
        assert_eq!(lb.pick(&up).await, NodeId(1));
    }
}
