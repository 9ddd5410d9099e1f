//! Client-facing reply envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::NodeId;

/// One statement, one reply. `rows` is populated only for `SELECT`;
/// `affected_rows` only for `INSERT`/`UPDATE`/`DELETE`/DDL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientReply {
    pub ok: bool,
    pub txn_id: Option<String>,
    pub affected_rows: Option<u64>,
    pub rows: Option<Vec<Value>>,
    pub error: Option<String>,
    pub node_id: NodeId,
}

impl ClientReply {
    pub fn ok_write(node_id: NodeId, txn_id: String, affected_rows: Option<u64>) -> Self {
        Self {
            ok: true,
            txn_id: Some(txn_id),
            affected_rows,
            rows: None,
            error: None,
            node_id,
        }
    }

    pub fn ok_rows(node_id: NodeId, txn_id: String, rows: Vec<Value>) -> Self {
        Self {
            ok: true,
            txn_id: Some(txn_id),
            affected_rows: None,
            rows: Some(rows),
            error: None,
            node_id,
        }
    }

    pub fn error(node_id: NodeId, txn_id: Option<String>, error: String) -> Self {
        Self {
            ok: false,
            txn_id,
            affected_rows: None,
            rows: None,
            error: Some(error),
            node_id,
        }
    }
}
