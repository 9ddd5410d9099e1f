//! Lock Manager: per-table SHARED/EXCLUSIVE locks, FIFO waiters,
//! timeout-based release. No deadlock detection — a waiter blocked past
//! its timeout gives up and is removed from the queue; the middleware
//! relies on timeout rather than cycle detection to avoid deadlock.
//!
//! Local to each node; global write serialization comes from only the
//! coordinator initiating writes, not from this component.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mqk_schemas::{LockMode, LockWaitOutcome};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

struct HeldLock {
    txn_id: String,
    mode: LockMode,
}

struct QueuedWaiter {
    waiter_id: u64,
    txn_id: String,
    mode: LockMode,
}

struct TableState {
    held: Vec<HeldLock>,
    queue: VecDeque<QueuedWaiter>,
    notify: Arc<Notify>,
}

impl TableState {
    fn new() -> Self {
        Self {
            held: Vec::new(),
            queue: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Grants every waiter at the front of the queue that is compatible
    /// with the current held set, in FIFO order. Consecutive SHARED
    /// waiters at the front are granted together; an EXCLUSIVE waiter at
    /// the front only grants once `held` is empty, and blocks every
    /// waiter behind it (no barging).
    fn try_grant(&mut self) {
        loop {
            let Some(front) = self.queue.front() else {
                break;
            };
            let compatible = if self.held.is_empty() {
                true
            } else {
                front.mode == LockMode::Shared
                    && self.held.iter().all(|h| h.mode == LockMode::Shared)
            };
            if !compatible {
                break;
            }
            let w = self.queue.pop_front().expect("front checked above");
            self.held.push(HeldLock {
                txn_id: w.txn_id,
                mode: w.mode,
            });
        }
    }
}

pub struct LockManager {
    tables: Mutex<HashMap<String, TableState>>,
    next_waiter_id: AtomicU64,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            next_waiter_id: AtomicU64::new(0),
        }
    }

    /// Acquires `mode` on `table` for `txn_id`, waiting up to `timeout` in
    /// strict FIFO order. Never holds the table mutex across the wait.
    pub async fn acquire(
        &self,
        txn_id: &str,
        table: &str,
        mode: LockMode,
        timeout: Duration,
    ) -> LockWaitOutcome {
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::SeqCst);
        let notify = {
            let mut tables = self.tables.lock().await;
            let state = tables.entry(table.to_string()).or_insert_with(TableState::new);
            state.queue.push_back(QueuedWaiter {
                waiter_id,
                txn_id: txn_id.to_string(),
                mode,
            });
            state.try_grant();
            state.notify.clone()
        };

        if self.waiter_was_granted(table, waiter_id).await {
            debug!(txn_id, table, ?mode, "lock granted immediately");
            return LockWaitOutcome::Granted;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = notify.notified();
            if self.waiter_was_granted(table, waiter_id).await {
                return LockWaitOutcome::Granted;
            }
            tokio::select! {
                _ = notified => {
                    if self.waiter_was_granted(table, waiter_id).await {
                        return LockWaitOutcome::Granted;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return self.finalize_timeout(table, waiter_id, txn_id).await;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return self.finalize_timeout(table, waiter_id, txn_id).await;
            }
        }
    }

    async fn waiter_was_granted(&self, table: &str, waiter_id: u64) -> bool {
        let tables = self.tables.lock().await;
        match tables.get(table) {
            Some(state) => !state.queue.iter().any(|w| w.waiter_id == waiter_id),
            None => true,
        }
    }

    async fn finalize_timeout(&self, table: &str, waiter_id: u64, txn_id: &str) -> LockWaitOutcome {
        let mut tables = self.tables.lock().await;
        let Some(state) = tables.get_mut(table) else {
            return LockWaitOutcome::Granted;
        };
        let before = state.queue.len();
        state.queue.retain(|w| w.waiter_id != waiter_id);
        if state.queue.len() == before {
            // Already removed by try_grant — we raced a grant at the deadline.
            LockWaitOutcome::Granted
        } else {
            warn!(txn_id, table, "LOCK_TIMEOUT");
            LockWaitOutcome::Timeout
        }
    }

    /// Releases every lock `txn_id` holds across all tables, granting any
    /// now-eligible waiters in FIFO order.
    pub async fn release_all(&self, txn_id: &str) {
        let mut tables = self.tables.lock().await;
        for (table, state) in tables.iter_mut() {
            let before = state.held.len();
            state.held.retain(|h| h.txn_id != txn_id);
            if state.held.len() != before {
                debug!(txn_id, table, "released lock");
                state.try_grant();
                state.notify.notify_waiters();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn shared_locks_coexist() {
        let lm = LockManager::new();
        let a = lm.acquire("t1", "users", LockMode::Shared, Duration::from_secs(1)).await;
        let b = lm.acquire("t2", "users", LockMode::Shared, Duration::from_secs(1)).await;
        assert_eq!(a, LockWaitOutcome::Granted);
        assert_eq!(b, LockWaitOutcome::Granted);
    }

    #[tokio::test]
    async fn exclusive_excludes_everything_else() {
        let lm = Arc::new(LockManager::new());
        let granted = lm
            .acquire("t1", "users", LockMode::Exclusive, Duration::from_secs(1))
            .await;
        assert_eq!(granted, LockWaitOutcome::Granted);

        let lm2 = lm.clone();
        let waiter = tokio::spawn(async move {
            lm2.acquire("t2", "users", LockMode::Shared, Duration::from_millis(100))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        lm.release_all("t1").await;

        let outcome = waiter.await.unwrap();
        assert_eq!(outcome, LockWaitOutcome::Granted);
    }

    #[tokio::test]
    async fn waiter_times_out_when_exclusive_never_released() {
        let lm = LockManager::new();
        let granted = lm
            .acquire("t1", "users", LockMode::Exclusive, Duration::from_secs(10))
            .await;
        assert_eq!(granted, LockWaitOutcome::Granted);

        let outcome = lm
            .acquire("t2", "users", LockMode::Exclusive, Duration::from_millis(50))
            .await;
        assert_eq!(outcome, LockWaitOutcome::Timeout);
    }

    #[tokio::test]
    async fn fifo_order_no_barging() {
        let lm = Arc::new(LockManager::new());
        // t1 holds exclusive; t2 queues exclusive; t3 (a later SHARED
        // request) must not barge ahead of t2 even though SHARED/SHARED
        // would otherwise be compatible once t1 releases... but t2 is
        // exclusive and must be served first.
        lm.acquire("t1", "orders", LockMode::Exclusive, Duration::from_secs(5))
            .await;

        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let lm_a = lm.clone();
        let order_a = order.clone();
        let h2 = tokio::spawn(async move {
            lm_a.acquire("t2", "orders", LockMode::Exclusive, Duration::from_secs(5))
                .await;
            order_a.lock().await.push("t2");
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lm_b = lm.clone();
        let order_b = order.clone();
        let h3 = tokio::spawn(async move {
            lm_b.acquire("t3", "orders", LockMode::Shared, Duration::from_secs(5))
                .await;
            order_b.lock().await.push("t3");
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        lm.release_all("t1").await;
        h2.await.unwrap();
        lm.release_all("t2").await;
        h3.await.unwrap();

        assert_eq!(*order.lock().await, vec!["t2", "t3"]);
    }
}
