//! Transaction record.
//!
//! A `Transaction` is created on the coordinator at statement arrival,
//! persisted to `transactions_log` on each participant at prepare and
//! again at commit/abort, and discarded from memory once it reaches a
//! terminal phase and the reply has gone out.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Leading-keyword statement classification. DDL is treated
/// as WRITE for 2PC purposes but kept distinct for logging/audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Read,
    Write,
    Ddl,
}

impl StatementKind {
    /// Classifies `sql` by its leading keyword, case-insensitively.
    /// Returns `None` for `BAD_STATEMENT`.
    pub fn classify(sql: &str) -> Option<StatementKind> {
        let first_word = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();

        match first_word.as_str() {
            "SELECT" => Some(StatementKind::Read),
            "INSERT" | "UPDATE" | "DELETE" => Some(StatementKind::Write),
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" => Some(StatementKind::Ddl),
            _ => None,
        }
    }

    /// WRITE and DDL both drive the 2PC path; only READ is dispatched
    /// directly to a single target.
    pub fn requires_two_phase_commit(self) -> bool {
        matches!(self, StatementKind::Write | StatementKind::Ddl)
    }
}

/// A participant's vote in the PREPARE phase. An unreachable peer or a
/// missing vote by the overall phase timeout both count as `No` for the
/// purpose of the commit decision, but are recorded distinctly for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Yes,
    No,
    Timeout,
}

impl Vote {
    pub fn is_yes(self) -> bool {
        matches!(self, Vote::Yes)
    }
}

/// 2PC lifecycle phase. `INIT` is the moment the coordinator classifies the
/// statement and assigns a `txn_id`, before any participant has been
/// contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnPhase {
    Init,
    Preparing,
    Prepared,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TxnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnPhase::Committed | TxnPhase::Aborted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub txn_id: String,
    pub origin_node_id: NodeId,
    pub statement: String,
    pub statement_kind: StatementKind,
    pub participants: BTreeSet<NodeId>,
    pub votes: BTreeMap<NodeId, Vote>,
    pub phase: TxnPhase,
    pub started_at_millis: i64,
}

impl Transaction {
    pub fn new(
        txn_id: String,
        origin_node_id: NodeId,
        statement: String,
        statement_kind: StatementKind,
        started_at_millis: i64,
    ) -> Self {
        Self {
            txn_id,
            origin_node_id,
            statement,
            statement_kind,
            participants: BTreeSet::new(),
            votes: BTreeMap::new(),
            phase: TxnPhase::Init,
            started_at_millis,
        }
    }

    /// `true` once every participant has voted (or timed out).
    pub fn all_votes_in(&self) -> bool {
        self.votes.len() == self.participants.len()
    }

    /// Unanimous `YES` from every participant is required to commit; any
    /// missing or non-YES vote aborts the whole transaction.
    pub fn unanimous_yes(&self) -> bool {
        self.all_votes_in() && self.votes.values().all(|v| v.is_yes())
    }
}

/// Generates a globally unique transaction id of the form
/// `TXN-{epoch_ms}-{random}`.
pub fn generate_txn_id(epoch_millis: i64) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("TXN-{epoch_millis}-{suffix:08x}")
}
