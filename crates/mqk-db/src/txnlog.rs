//! `transactions_log` persistence.
//!
//! Every participant writes a row at PREPARE and again at COMMIT/ABORT.
//! Primary keys use `stride = cluster_size, offset = node_id` so locally
//! generated keys never collide across nodes sharing no coordination
//! beyond the control plane itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mqk_schemas::{MiddlewareError, NodeId, StatementKind, TxnPhase};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct TxnLogEntry {
    pub txn_id: String,
    pub query_type: StatementKind,
    pub query_text: String,
    pub status: TxnPhase,
    pub node_id: NodeId,
    pub created_at: DateTime<Utc>,
}

/// Persistence seam for `transactions_log`. `record` both inserts the
/// first row for a `txn_id` and appends/updates later phase transitions;
/// implementations decide whether that is an `INSERT` or an upsert.
#[async_trait]
pub trait TxnLogStore: Send + Sync {
    async fn record(
        &self,
        txn_id: &str,
        query_type: StatementKind,
        query_text: &str,
        status: TxnPhase,
    ) -> Result<(), MiddlewareError>;

    async fn status_of(&self, txn_id: &str) -> Result<Option<TxnPhase>, MiddlewareError>;

    /// `txn_id`s with a `PREPARING` row and no later terminal row —
    /// candidates a restarting participant replays against the
    /// coordinator via `TXN_STATUS`.
    async fn unresolved_preparing(&self) -> Result<Vec<String>, MiddlewareError>;
}

// --------------------------------------------------------------------
// Postgres
// --------------------------------------------------------------------

pub struct PostgresTxnLog {
    pool: sqlx::PgPool,
    node_id: NodeId,
    cluster_size: u32,
}

impl PostgresTxnLog {
    pub fn new(pool: sqlx::PgPool, node_id: NodeId, cluster_size: u32) -> Self {
        Self {
            pool,
            node_id,
            cluster_size,
        }
    }
}

#[async_trait]
impl TxnLogStore for PostgresTxnLog {
    async fn record(
        &self,
        txn_id: &str,
        query_type: StatementKind,
        query_text: &str,
        status: TxnPhase,
    ) -> Result<(), MiddlewareError> {
        let query_type_str = statement_kind_str(query_type);
        let status_str = phase_str(status);
        sqlx::query(
            r#"
            INSERT INTO transactions_log (id, transaction_id, query_type, query_text, status, node_id, created_at)
            VALUES ((nextval('transactions_log_seq') * $1::bigint) + $2::bigint, $3, $4, $5, $6, $2, now())
            ON CONFLICT (transaction_id, status) DO NOTHING
            "#,
        )
        .bind(self.cluster_size as i64)
        .bind(self.node_id.0 as i64)
        .bind(txn_id)
        .bind(query_type_str)
        .bind(query_text)
        .bind(status_str)
        .execute(&self.pool)
        .await
        .map_err(|e| MiddlewareError::BackendError(format!("transactions_log write failed: {e}")))?;
        Ok(())
    }

    async fn status_of(&self, txn_id: &str) -> Result<Option<TxnPhase>, MiddlewareError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT status FROM transactions_log
            WHERE transaction_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(txn_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MiddlewareError::BackendError(format!("transactions_log read failed: {e}")))?;
        Ok(row.and_then(|(s,)| parse_phase(&s)))
    }

    async fn unresolved_preparing(&self) -> Result<Vec<String>, MiddlewareError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT a.transaction_id
            FROM transactions_log a
            WHERE a.status = 'PREPARING'
              AND NOT EXISTS (
                SELECT 1 FROM transactions_log b
                WHERE b.transaction_id = a.transaction_id
                  AND b.status IN ('COMMITTED', 'ABORTED')
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MiddlewareError::BackendError(format!("transactions_log scan failed: {e}")))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

fn statement_kind_str(k: StatementKind) -> &'static str {
    match k {
        StatementKind::Read => "READ",
        StatementKind::Write => "WRITE",
        StatementKind::Ddl => "DDL",
    }
}

fn phase_str(p: TxnPhase) -> &'static str {
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

fn parse_phase(s: &str) -> Option<TxnPhase> {
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

// --------------------------------------------------------------------
// In-memory (tests)
// --------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryTxnLog {
    node_id: NodeId,
    rows: Mutex<HashMap<String, Vec<TxnLogEntry>>>,
}

impl InMemoryTxnLog {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub fn entries_for(&self, txn_id: &str) -> Vec<TxnLogEntry> {
        self.rows.lock().unwrap().get(txn_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TxnLogStore for InMemoryTxnLog {
    async fn record(
        &self,
        txn_id: &str,
        query_type: StatementKind,
        query_text: &str,
        status: TxnPhase,
    ) -> Result<(), MiddlewareError> {
        let mut rows = self.rows.lock().unwrap();
        rows.entry(txn_id.to_string()).or_default().push(TxnLogEntry {
            txn_id: txn_id.to_string(),
            query_type,
            query_text: query_text.to_string(),
            status,
            node_id: self.node_id,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn status_of(&self, txn_id: &str) -> Result<Option<TxnPhase>, MiddlewareError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(txn_id).and_then(|v| v.last()).map(|e| e.status))
    }

    async fn unresolved_preparing(&self) -> Result<Vec<String>, MiddlewareError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|(_, entries)| {
                entries.iter().any(|e| e.status == TxnPhase::Preparing)
                    && !entries.iter().any(|e| e.status.is_terminal())
            })
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unresolved_preparing_excludes_terminal_transactions() {
        let log = InMemoryTxnLog::new(NodeId(1));
        log.record("TXN-1", StatementKind::Write, "INSERT ...", TxnPhase::Preparing)
            .await
            .unwrap();
        log.record("TXN-2", StatementKind::Write, "INSERT ...", TxnPhase::Preparing)
            .await
            .unwrap();
        log.record("TXN-2", StatementKind::Write, "INSERT ...", TxnPhase::Committed)
            .await
            .unwrap();

        let mut unresolved = log.unresolved_preparing().await.unwrap();
        unresolved.sort();
        assert_eq!(unresolved, vec!["TXN-1".to_string()]);
    }

    #[tokio::test]
    async fn status_of_returns_latest_entry() {
        let log = InMemoryTxnLog::new(NodeId(1));
        log.record("TXN-1", StatementKind::Write, "x", TxnPhase::Preparing)
            .await
            .unwrap();
        log.record("TXN-1", StatementKind::Write, "x", TxnPhase::Committed)
            .await
            .unwrap();
        assert_eq!(log.status_of("TXN-1").await.unwrap(), Some(TxnPhase::Committed));
    }
}
