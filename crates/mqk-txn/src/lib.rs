//! Transaction Coordinator: statement classification, non-coordinator
//! forwarding, read dispatch + load balancing, and two-phase commit
//! across the live participant set.
//!
//! Like [`mqk_election::Election`], this owns its own table (the
//! in-flight transaction/vote/reply bookkeeping) exclusively; every other
//! component only ever calls through the public methods below.

pub mod load_balancer;
pub mod sql;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use mqk_audit::AuditWriter;
use mqk_db::{Backend, QueryRow, Session, TxnLogStore};
use mqk_election::Election;
use mqk_health::Health;
use mqk_lock::LockManager;
use mqk_messenger::{MessageHandler, Messenger};
use mqk_schemas::{
    ClientReply, LockMode, LockWaitOutcome, Message, MessageKind, MiddlewareError, NodeId,
    StatementKind, TxnPhase, Vote,
};
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use load_balancer::{LoadBalanceStrategy, LoadBalancer};

/// Every tunable timeout the Transaction Coordinator honors. All waits
/// are explicit deadlines, never bare sleeps.
#[derive(Debug, Clone, Copy)]
pub struct TxnTimeouts {
    pub lock_timeout: Duration,
    pub prepare_timeout: Duration,
    pub client_reply_timeout: Duration,
    pub txn_phase_timeout: Duration,
    pub backend_acquire_timeout: Duration,
}

impl Default for TxnTimeouts {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            prepare_timeout: Duration::from_secs(30),
            client_reply_timeout: Duration::from_secs(30),
            txn_phase_timeout: Duration::from_secs(60),
            backend_acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct InFlightVotes {
    votes: Mutex<BTreeMap<NodeId, Vote>>,
    notify: Notify,
}

/// A participant-side PREPARE that voted YES: the backend session is
/// pinned and the table lock held until a COMMIT/ABORT decision arrives
/// or `txn_phase_timeout` elapses, covering a coordinator change
/// mid-transaction.
struct PendingParticipant {
    table: String,
    statement_kind: StatementKind,
    statement: String,
    session: Box<dyn Session>,
}

pub struct TxnCoordinator {
    self_weak: Weak<TxnCoordinator>,
    self_id: NodeId,
    messenger: Arc<Messenger>,
    health: Arc<Health>,
    election: Arc<Election>,
    locks: Arc<LockManager>,
    backend: Arc<dyn Backend>,
    txn_log: Arc<dyn TxnLogStore>,
    audit: Option<Arc<std::sync::Mutex<AuditWriter>>>,
    audit_run_id: Uuid,
    load_balancer: LoadBalancer,
    timeouts: TxnTimeouts,

    in_flight_votes: Mutex<HashMap<String, Arc<InFlightVotes>>>,
    pending: Mutex<HashMap<String, PendingParticipant>>,
    client_waiters: Mutex<HashMap<String, oneshot::Sender<ClientReply>>>,
    read_waiters: Mutex<HashMap<String, oneshot::Sender<Result<Vec<Value>, String>>>>,
}

impl TxnCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: NodeId,
        messenger: Arc<Messenger>,
        health: Arc<Health>,
        election: Arc<Election>,
        locks: Arc<LockManager>,
        backend: Arc<dyn Backend>,
        txn_log: Arc<dyn TxnLogStore>,
        audit: Option<Arc<std::sync::Mutex<AuditWriter>>>,
        load_balance_strategy: LoadBalanceStrategy,
        timeouts: TxnTimeouts,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            self_id,
            messenger,
            health,
            election,
            locks,
            backend,
            txn_log,
            audit,
            audit_run_id: Uuid::new_v4(),
            load_balancer: LoadBalancer::new(load_balance_strategy),
            timeouts,
            in_flight_votes: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            client_waiters: Mutex::new(HashMap::new()),
            read_waiters: Mutex::new(HashMap::new()),
        })
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_weak.upgrade().expect("TxnCoordinator dropped while still in use")
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Count of transactions this node currently has open: either votes
    /// still being gathered (this node is coordinator) or a pinned,
    /// not-yet-decided participant session. Feeds the admin status
    /// surface's "in-flight transaction count".
    pub async fn in_flight_transaction_count(&self) -> usize {
        let coordinating = self.in_flight_votes.lock().await.len();
        let participating = self.pending.lock().await.len();
        coordinating + participating
    }

    /// Replays `transactions_log` rows stuck in `PREPARING` against the
    /// current coordinator: on restart, a participant queries the
    /// coordinator about every row it never saw resolved.
    pub async fn recover_unresolved(&self) {
        let unresolved = match self.txn_log.unresolved_preparing().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "could not scan transactions_log for recovery");
                return;
            }
        };
        let view = self.election.snapshot();
        let Some(coord) = view.current_coordinator_id else {
            return;
        };
        if coord == self.self_id {
            return;
        }
        for txn_id in unresolved {
            let msg = Message::new(self.self_id, MessageKind::TxnStatus, json!({"txn_id": txn_id}));
            let _ = self.messenger.send(coord, msg).await;
        }
    }

    // ------------------------------------------------------------
    // Client entry point
    // ------------------------------------------------------------

    /// One statement in, one reply out.
    pub async fn handle_client_statement(self: &Arc<Self>, statement: String) -> ClientReply {
        let Some(kind) = StatementKind::classify(&statement) else {
            return ClientReply::error(
                self.self_id,
                None,
                "BAD_STATEMENT: unrecognized leading keyword".into(),
            );
        };

        let view = self.election.snapshot();
        if view.current_coordinator_id == Some(self.self_id) {
            self.handle_as_coordinator(statement, kind).await
        } else {
            self.forward_to_coordinator(statement, view.current_coordinator_id).await
        }
    }

    async fn handle_as_coordinator(self: &Arc<Self>, statement: String, kind: StatementKind) -> ClientReply {
        if kind.requires_two_phase_commit() {
            self.run_two_phase_commit(statement, kind).await
        } else {
            self.dispatch_read(statement).await
        }
    }

    async fn forward_to_coordinator(
        self: &Arc<Self>,
        statement: String,
        coordinator: Option<NodeId>,
    ) -> ClientReply {
        let Some(coord_id) = coordinator else {
            return ClientReply::error(self.self_id, None, "UNAVAILABLE: no coordinator known".into());
        };

        let txn_id = mqk_schemas::generate_txn_id(Self::now_millis());
        let (tx, rx) = oneshot::channel();
        self.client_waiters.lock().await.insert(txn_id.clone(), tx);

        let msg = Message::new(
            self.self_id,
            MessageKind::ClientRequest,
            json!({"txn_id": txn_id, "statement": statement}),
        );
        if self.messenger.send(coord_id, msg).await.is_err() {
            self.client_waiters.lock().await.remove(&txn_id);
            return ClientReply::error(
                self.self_id,
                Some(txn_id),
                "UNAVAILABLE: coordinator unreachable".into(),
            );
        }

        let result = tokio::time::timeout(self.timeouts.client_reply_timeout, rx).await;
        self.client_waiters.lock().await.remove(&txn_id);
        match result {
            Ok(Ok(reply)) => reply,
            _ => ClientReply::error(
                self.self_id,
                Some(txn_id),
                "UNAVAILABLE: timed out waiting for coordinator".into(),
            ),
        }
    }

    // ------------------------------------------------------------
    // Inbound message routing
    // ------------------------------------------------------------

    /// Dispatches one inbound message relevant to this component. The
    /// node wiring routes `HEARTBEAT`/`ELECTION`/`ALIVE`/`COORDINATOR`
    /// elsewhere; every other kind lands here.
    pub async fn on_message(self: &Arc<Self>, msg: Message) {
        match msg.kind {
            MessageKind::ClientRequest => self.on_client_request(msg).await,
            MessageKind::ClientReply => self.on_client_reply(msg).await,
            MessageKind::Prepare => self.on_prepare(msg).await,
            MessageKind::Vote => self.on_vote(msg).await,
            MessageKind::Commit => self.on_decision(msg, true).await,
            MessageKind::Abort => self.on_decision(msg, false).await,
            MessageKind::Ack => self.on_ack(msg),
            MessageKind::ExecuteRead => self.on_execute_read(msg).await,
            MessageKind::ReadResult => self.on_read_result(msg).await,
            MessageKind::TxnStatus => self.on_txn_status(msg).await,
            MessageKind::TxnStatusReply => self.on_txn_status_reply(msg).await,
            MessageKind::Heartbeat | MessageKind::Election | MessageKind::Alive | MessageKind::Coordinator => {}
        }
    }

    async fn on_client_request(self: &Arc<Self>, msg: Message) {
        let Some(statement) = msg.payload.get("statement").and_then(Value::as_str) else {
            return;
        };
        let reply = self.handle_client_statement(statement.to_string()).await;
        let payload = serde_json::to_value(&reply).unwrap_or_else(|_| json!({}));
        let out = Message::new(self.self_id, MessageKind::ClientReply, payload);
        let _ = self.messenger.send(msg.sender_id, out).await;
    }

    async fn on_client_reply(&self, msg: Message) {
        let Ok(reply) = serde_json::from_value::<ClientReply>(msg.payload) else {
            return;
        };
        let Some(txn_id) = reply.txn_id.clone() else { return };
        if let Some(tx) = self.client_waiters.lock().await.remove(&txn_id) {
            let _ = tx.send(reply);
        }
    }

    // ------------------------------------------------------------
    // Read dispatch + load balancing
    // ------------------------------------------------------------

    async fn dispatch_read(self: &Arc<Self>, statement: String) -> ClientReply {
        let up = self.health.up_set().await;
        if up.is_empty() {
            return ClientReply::error(self.self_id, None, "UNAVAILABLE: no nodes up".into());
        }
        let target = self.load_balancer.pick(&up).await;
        let txn_id = mqk_schemas::generate_txn_id(Self::now_millis());

        self.load_balancer.bump(target).await;
        let result = if target == self.self_id {
            self.run_local_read(&statement).await
        } else {
            self.run_remote_read(target, &txn_id, &statement).await
        };
        self.load_balancer.release(target).await;

        match result {
            Ok(rows) => ClientReply::ok_rows(self.self_id, txn_id, rows),
            Err(e) => ClientReply::error(self.self_id, Some(txn_id), e.to_string()),
        }
    }

    async fn run_local_read(&self, statement: &str) -> Result<Vec<Value>, MiddlewareError> {
        let mut session = self.backend.begin(self.timeouts.backend_acquire_timeout).await?;
        let rows = match session.query(statement).await {
            Ok(rows) => rows,
            Err(e) => {
                let _ = session.rollback().await;
                return Err(e);
            }
        };
        let _ = session.commit().await;
        Ok(rows.into_iter().map(row_to_json).collect())
    }

    async fn run_remote_read(
        self: &Arc<Self>,
        target: NodeId,
        txn_id: &str,
        statement: &str,
    ) -> Result<Vec<Value>, MiddlewareError> {
        let (tx, rx) = oneshot::channel();
        self.read_waiters.lock().await.insert(txn_id.to_string(), tx);

        let msg = Message::new(
            self.self_id,
            MessageKind::ExecuteRead,
            json!({"txn_id": txn_id, "statement": statement}),
        );
        if self.messenger.send(target, msg).await.is_err() {
            self.read_waiters.lock().await.remove(txn_id);
            return Err(MiddlewareError::UnreachablePeer(target.0));
        }

        let result = tokio::time::timeout(self.timeouts.client_reply_timeout, rx).await;
        self.read_waiters.lock().await.remove(txn_id);
        match result {
            Ok(Ok(Ok(rows))) => Ok(rows),
            Ok(Ok(Err(e))) => Err(MiddlewareError::BackendError(e)),
            _ => Err(MiddlewareError::Unavailable(format!("no READ_RESULT from node {target}"))),
        }
    }

    async fn on_execute_read(&self, msg: Message) {
        let Some(statement) = msg.payload.get("statement").and_then(Value::as_str) else {
            return;
        };
        let Some(txn_id) = msg.payload.get("txn_id").and_then(Value::as_str) else {
            return;
        };
        let payload = match self.run_local_read(statement).await {
            Ok(rows) => json!({"txn_id": txn_id, "ok": true, "rows": rows}),
            Err(e) => json!({"txn_id": txn_id, "ok": false, "error": e.to_string()}),
        };
        let out = Message::new(self.self_id, MessageKind::ReadResult, payload);
        let _ = self.messenger.send(msg.sender_id, out).await;
    }

    async fn on_read_result(&self, msg: Message) {
        let Some(txn_id) = msg.payload.get("txn_id").and_then(Value::as_str) else {
            return;
        };
        let Some(tx) = self.read_waiters.lock().await.remove(txn_id) else {
            return;
        };
        let ok = msg.payload.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if ok {
            let rows = msg
                .payload
                .get("rows")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let _ = tx.send(Ok(rows));
        } else {
            let err = msg
                .payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("BACKEND_ERROR")
                .to_string();
            let _ = tx.send(Err(err));
        }
    }

    // ------------------------------------------------------------
    // Two-phase commit (WRITE / DDL)
    // ------------------------------------------------------------

    async fn run_two_phase_commit(self: &Arc<Self>, statement: String, kind: StatementKind) -> ClientReply {
        let txn_id = mqk_schemas::generate_txn_id(Self::now_millis());
        let table = sql::extract_table_name(&statement).unwrap_or_else(|| "unknown".to_string());
        let participants = self.health.up_set().await;

        if participants.is_empty() {
            return ClientReply::error(self.self_id, Some(txn_id), "UNAVAILABLE: no live participants".into());
        }

        let _ = self.txn_log.record(&txn_id, kind, &statement, TxnPhase::Preparing).await;
        self.audit_decision(&txn_id, "PREPARE", &statement).await;

        let inflight = Arc::new(InFlightVotes::default());
        self.in_flight_votes.lock().await.insert(txn_id.clone(), inflight.clone());

        let mut futs = Vec::with_capacity(participants.len());
        for &p in &participants {
            let this = self.arc_self();
            let inflight = inflight.clone();
            let txn_id = txn_id.clone();
            let table = table.clone();
            let statement = statement.clone();
            futs.push(async move {
                let vote = if p == this.self_id {
                    this.do_prepare(&txn_id, &table, &statement, kind).await
                } else {
                    this.prepare_remote(&inflight, p, &txn_id, &statement, kind).await
                };
                (p, vote)
            });
        }

        let outcome = tokio::time::timeout(self.timeouts.prepare_timeout, futures_util::future::join_all(futs)).await;
        self.in_flight_votes.lock().await.remove(&txn_id);

        let votes: BTreeMap<NodeId, Vote> = match outcome {
            Ok(results) => results.into_iter().collect(),
            Err(_) => participants.iter().map(|&p| (p, Vote::Timeout)).collect(),
        };
        let all_yes = participants
            .iter()
            .all(|p| votes.get(p).map(|v| v.is_yes()).unwrap_or(false));

        if all_yes {
            let _ = self.txn_log.record(&txn_id, kind, &statement, TxnPhase::Committed).await;
            self.audit_decision(&txn_id, "COMMIT", &statement).await;
            self.broadcast_decision(&participants, &txn_id, true).await;
            info!(txn_id, table, "2PC committed");
            ClientReply::ok_write(self.self_id, txn_id, Some(1))
        } else {
            let _ = self.txn_log.record(&txn_id, kind, &statement, TxnPhase::Aborted).await;
            self.audit_decision(&txn_id, "ABORT", &statement).await;
            self.broadcast_decision(&participants, &txn_id, false).await;
            warn!(txn_id, table, ?votes, "2PC aborted");
            ClientReply::error(self.self_id, Some(txn_id), "ABORTED: not every participant voted YES".into())
        }
    }

    async fn prepare_remote(
        self: &Arc<Self>,
        inflight: &Arc<InFlightVotes>,
        peer: NodeId,
        txn_id: &str,
        statement: &str,
        kind: StatementKind,
    ) -> Vote {
        let msg = Message::new(
            self.self_id,
            MessageKind::Prepare,
            json!({"txn_id": txn_id, "statement": statement, "kind": kind}),
        );
        if self.messenger.send(peer, msg).await.is_err() {
            return Vote::No;
        }

        let deadline = Instant::now() + self.timeouts.prepare_timeout;
        loop {
            if let Some(v) = inflight.votes.lock().await.get(&peer).copied() {
                return v;
            }
            let notified = inflight.notify.notified();
            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => return Vote::Timeout,
            }
        }
    }

    async fn on_prepare(self: &Arc<Self>, msg: Message) {
        let Some(statement) = msg.payload.get("statement").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        let Some(txn_id) = msg.payload.get("txn_id").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        let kind: StatementKind = msg
            .payload
            .get("kind")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(StatementKind::Write);

        let _ = self.txn_log.record(&txn_id, kind, &statement, TxnPhase::Preparing).await;
        let table = sql::extract_table_name(&statement).unwrap_or_else(|| "unknown".to_string());
        let vote = self.do_prepare(&txn_id, &table, &statement, kind).await;

        let vote_str = match vote {
            Vote::Yes => "YES",
            Vote::No | Vote::Timeout => "NO",
        };
        let reply = Message::new(self.self_id, MessageKind::Vote, json!({"txn_id": txn_id, "vote": vote_str}));
        let _ = self.messenger.send(msg.sender_id, reply).await;
    }

    async fn on_vote(&self, msg: Message) {
        let Some(txn_id) = msg.payload.get("txn_id").and_then(Value::as_str) else {
            return;
        };
        let Some(inflight) = self.in_flight_votes.lock().await.get(txn_id).cloned() else {
            return;
        };
        let vote = match msg.payload.get("vote").and_then(Value::as_str) {
            Some("YES") => Vote::Yes,
            _ => Vote::No,
        };
        inflight.votes.lock().await.insert(msg.sender_id, vote);
        inflight.notify.notify_waiters();
    }

    /// Runs PREPARE for this node as a participant, whether invoked
    /// in-process (coordinator is this node) or from `on_prepare` (a
    /// remote coordinator). Acquires the table lock, opens a pinned
    /// session, runs the statement, and validates via `Session::prepare`
    /// without committing.
    async fn do_prepare(
        self: &Arc<Self>,
        txn_id: &str,
        table: &str,
        statement: &str,
        kind: StatementKind,
    ) -> Vote {
        let lock_outcome = self
            .locks
            .acquire(txn_id, table, LockMode::Exclusive, self.timeouts.lock_timeout)
            .await;
        if lock_outcome == LockWaitOutcome::Timeout {
            warn!(txn_id, table, "LOCK_TIMEOUT, voting NO");
            return Vote::No;
        }

        let mut session = match self.backend.begin(self.timeouts.backend_acquire_timeout).await {
            Ok(s) => s,
            Err(e) => {
                warn!(txn_id, error = %e, "BACKEND_ERROR acquiring session, voting NO");
                self.locks.release_all(txn_id).await;
                return Vote::No;
            }
        };

        if let Err(e) = session.execute(statement).await {
            warn!(txn_id, error = %e, "BACKEND_ERROR running statement, voting NO");
            let _ = session.rollback().await;
            self.locks.release_all(txn_id).await;
            return Vote::No;
        }

        match session.prepare().await {
            Ok(true) => {
                self.pending.lock().await.insert(
                    txn_id.to_string(),
                    PendingParticipant {
                        table: table.to_string(),
                        statement_kind: kind,
                        statement: statement.to_string(),
                        session,
                    },
                );
                self.spawn_txn_phase_watchdog(txn_id.to_string());
                Vote::Yes
            }
            _ => {
                let _ = session.rollback().await;
                self.locks.release_all(txn_id).await;
                Vote::No
            }
        }
    }

    /// A pinned participant that never hears a decision unilaterally
    /// aborts once `txn_phase_timeout` elapses, covering a coordinator
    /// change mid-transaction.
    fn spawn_txn_phase_watchdog(self: &Arc<Self>, txn_id: String) {
        let this = self.arc_self();
        let timeout = self.timeouts.txn_phase_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if this.pending.lock().await.contains_key(&txn_id) {
                warn!(txn_id, "txn_phase_timeout elapsed with no decision, unilaterally aborting");
                this.local_decide(&txn_id, false).await;
            }
        });
    }

    async fn broadcast_decision(self: &Arc<Self>, participants: &[NodeId], txn_id: &str, commit: bool) {
        for &p in participants {
            if p == self.self_id {
                self.local_decide(txn_id, commit).await;
                continue;
            }
            let kind = if commit { MessageKind::Commit } else { MessageKind::Abort };
            let msg = Message::new(self.self_id, kind, json!({"txn_id": txn_id}));
            let _ = self.messenger.send(p, msg).await;
        }
    }

    async fn on_decision(self: &Arc<Self>, msg: Message, commit: bool) {
        let Some(txn_id) = msg.payload.get("txn_id").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        self.local_decide(&txn_id, commit).await;
        let ack = Message::new(self.self_id, MessageKind::Ack, json!({"txn_id": txn_id}));
        let _ = self.messenger.send(msg.sender_id, ack).await;
    }

    fn on_ack(&self, msg: Message) {
        debug!(sender = %msg.sender_id, "received ACK");
    }

    async fn local_decide(&self, txn_id: &str, commit: bool) {
        let entry = self.pending.lock().await.remove(txn_id);
        let Some(mut entry) = entry else {
            // Already resolved (e.g. the watchdog and an in-flight DECIDE
            // raced) or never prepared here (this node voted NO).
            return;
        };

        let result = if commit {
            entry.session.commit().await
        } else {
            entry.session.rollback().await
        };
        if let Err(e) = result {
            warn!(txn_id, error = %e, "finalizing session failed");
        }

        self.locks.release_all(txn_id).await;

        let phase = if commit { TxnPhase::Committed } else { TxnPhase::Aborted };
        let _ = self
            .txn_log
            .record(txn_id, entry.statement_kind, &entry.statement, phase)
            .await;
        debug!(txn_id, table = entry.table, commit, "transaction finalized");
    }

    // ------------------------------------------------------------
    // Crash-recovery status exchange
    // ------------------------------------------------------------

    async fn on_txn_status(&self, msg: Message) {
        let Some(txn_id) = msg.payload.get("txn_id").and_then(Value::as_str) else {
            return;
        };
        let phase = self.txn_log.status_of(txn_id).await.ok().flatten();
        let phase_str = phase.map(phase_to_str);
        let reply = Message::new(
            self.self_id,
            MessageKind::TxnStatusReply,
            json!({"txn_id": txn_id, "phase": phase_str}),
        );
        let _ = self.messenger.send(msg.sender_id, reply).await;
    }

    async fn on_txn_status_reply(&self, msg: Message) {
        let Some(txn_id) = msg.payload.get("txn_id").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        let phase = msg
            .payload
            .get("phase")
            .and_then(Value::as_str)
            .and_then(str_to_phase);
        let Some(phase) = phase else {
            return;
        };
        if !phase.is_terminal() {
            return;
        }
        if self.pending.lock().await.contains_key(&txn_id) {
            self.local_decide(&txn_id, phase == TxnPhase::Committed).await;
        }
    }

    async fn audit_decision(&self, txn_id: &str, event_type: &str, statement: &str) {
        let Some(audit) = self.audit.clone() else {
            return;
        };
        let run_id = self.audit_run_id;
        let txn_id = txn_id.to_string();
        let event_type = event_type.to_string();
        let statement = statement.to_string();
        let _ = tokio::task::spawn_blocking(move || {
            let mut writer = audit.lock().expect("audit writer mutex poisoned");
            writer.append(run_id, &txn_id, &event_type, json!({"statement": statement}))
        })
        .await;
    }
}

#[async_trait]
impl MessageHandler for TxnCoordinator {
    async fn handle(&self, msg: Message) {
        self.arc_self().on_message(msg).await;
    }
}

fn row_to_json(row: QueryRow) -> Value {
    Value::Object(row.into_iter().collect())
}

fn phase_to_str(p: TxnPhase) -> &'static str {
    match p {
        TxnPhase::Init => "INIT",
        TxnPhase::Preparing => "PREPARING",
        TxnPhase::Prepared => "PREPARED",
        TxnPhase::Committing => "COMMITTING",
        TxnPhase::Committed => "COMMITTED",
        TxnPhase::Aborting => "ABORTING",
        TxnPhase::Aborted => "ABORTED",
    }
}

fn str_to_phase(s: &str) -> Option<TxnPhase> {
    Some(match s {
        "INIT" => TxnPhase::Init,
        "PREPARING" => TxnPhase::Preparing,
        "PREPARED" => TxnPhase::Prepared,
        "COMMITTING" => TxnPhase::Committing,
        "COMMITTED" => TxnPhase::Committed,
        "ABORTING" => TxnPhase::Aborting,
        "ABORTED" => TxnPhase::Aborted,
        _ => return None,
    })
}
