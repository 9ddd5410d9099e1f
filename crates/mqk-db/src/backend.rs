//! `Backend`/`Session` trait seam plus the two implementations the rest
//! of the workspace programs against.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mqk_schemas::MiddlewareError;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo};
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// One returned row, column name to JSON-decoded value. Kept untyped
/// (rather than a generated struct per table) because the middleware
/// never interprets row contents itself — it only ferries them back to
/// the client that issued the `SELECT`.
pub type QueryRow = BTreeMap<String, Value>;

/// An open, not-yet-decided unit of work against the local backend.
/// `execute`/`query` run statements inside it; `prepare` validates without
/// committing; `commit`/`rollback` are the only ways to
/// release the connection the session pins.
#[async_trait]
pub trait Session: Send {
    async fn execute(&mut self, sql: &str) -> Result<u64, MiddlewareError>;
    async fn query(&mut self, sql: &str) -> Result<Vec<QueryRow>, MiddlewareError>;
    /// Validates the session has no outstanding constraint/lock violation
    /// and is ready to commit, without releasing the pinned connection.
    async fn prepare(&mut self) -> Result<bool, MiddlewareError>;
    async fn commit(&mut self) -> Result<(), MiddlewareError>;
    async fn rollback(&mut self) -> Result<(), MiddlewareError>;
}

/// Pooled connections to the local database. `begin`
/// blocks up to `timeout` waiting for a free (or pinned-but-released)
/// connection, then fails with `MiddlewareError::BackendError`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn begin(&self, timeout: Duration) -> Result<Box<dyn Session>, MiddlewareError>;
    async fn pool_health(&self) -> bool;
}

// --------------------------------------------------------------------
// PostgresBackend
// --------------------------------------------------------------------

/// Production `Backend`. A successful `prepare` leaves the underlying
/// `PoolConnection` checked out of `sqlx`'s pool until `commit`/`rollback`
/// — that checkout *is* the pinned-connection-against-pool-capacity
/// accounting a prepared-but-undecided transaction needs, so no separate
/// bookkeeping is required on top of `sqlx::PgPool`'s own connection limit.
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn begin(&self, timeout: Duration) -> Result<Box<dyn Session>, MiddlewareError> {
        let conn = tokio::time::timeout(timeout, self.pool.acquire())
            .await
            .map_err(|_| MiddlewareError::BackendError("pool acquire timed out".into()))?
            .map_err(|e| MiddlewareError::BackendError(format!("pool acquire failed: {e}")))?;
        let mut session = PostgresSession {
            conn: Some(conn),
            broken: false,
        };
        session
            .raw_execute("BEGIN")
            .await
            .map_err(|e| MiddlewareError::BackendError(format!("BEGIN failed: {e}")))?;
        Ok(Box::new(session))
    }

    async fn pool_health(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

struct PostgresSession {
    conn: Option<PoolConnection<Postgres>>,
    /// Set once a statement fails inside the open transaction; Postgres
    /// refuses further commands on an aborted transaction, so subsequent
    /// calls short-circuit instead of round-tripping an error twice.
    broken: bool,
}

impl PostgresSession {
    async fn raw_execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        let conn = self.conn.as_mut().expect("session used after close");
        let result = sqlx::query(sql).execute(&mut **conn).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Session for PostgresSession {
    async fn execute(&mut self, sql: &str) -> Result<u64, MiddlewareError> {
        if self.broken {
            return Err(MiddlewareError::BackendError("session aborted by a prior statement".into()));
        }
        self.raw_execute(sql).await.map_err(|e| {
            self.broken = true;
            MiddlewareError::BackendError(e.to_string())
        })
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<QueryRow>, MiddlewareError> {
        if self.broken {
            return Err(MiddlewareError::BackendError("session aborted by a prior statement".into()));
        }
        let conn = self.conn.as_mut().expect("session used after close");
        let rows = sqlx::query(sql).fetch_all(&mut **conn).await.map_err(|e| {
            self.broken = true;
            MiddlewareError::BackendError(e.to_string())
        })?;
        Ok(rows.iter().map(pg_row_to_json).collect())
    }

    async fn prepare(&mut self) -> Result<bool, MiddlewareError> {
        if self.broken {
            return Ok(false);
        }
        // No native XA: confirm the transaction is still live (deferred
        // constraints would surface here) without committing it.
        match self.raw_execute("SELECT 1").await {
            Ok(_) => Ok(true),
            Err(e) => {
                self.broken = true;
                Err(MiddlewareError::BackendError(e.to_string()))
            }
        }
    }

    async fn commit(&mut self) -> Result<(), MiddlewareError> {
        let sql = if self.broken { "ROLLBACK" } else { "COMMIT" };
        let result = self.raw_execute(sql).await;
        self.conn = None;
        result
            .map(|_| ())
            .map_err(|e| MiddlewareError::BackendError(format!("commit failed: {e}")))
    }

    async fn rollback(&mut self) -> Result<(), MiddlewareError> {
        // A connection that already failed mid-transaction only accepts
        // ROLLBACK; trying it unconditionally covers both cases.
        let result = self.raw_execute("ROLLBACK").await;
        self.conn = None;
        result
            .map(|_| ())
            .map_err(|e| MiddlewareError::BackendError(format!("rollback failed: {e}")))
    }
}

/// Best-effort column decode: tries the wire type's natural Rust mapping
/// first, falls back to text, then to null. Sufficient for an adapter
/// that ferries rows to a JSON-speaking client without knowing the
/// caller's schema ahead of time.
fn pg_row_to_json(row: &sqlx::postgres::PgRow) -> QueryRow {
    let mut out = QueryRow::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name().to_string();
        let value = decode_column(row, i, col.type_info().name());
        out.insert(name, value);
    }
    out
}

fn decode_column(row: &sqlx::postgres::PgRow, i: usize, type_name: &str) -> Value {
    match type_name {
        "INT2" | "INT4" => row
            .try_get::<i32, _>(i)
            .map(|v| Value::from(v))
            .unwrap_or(Value::Null),
        "INT8" => row.try_get::<i64, _>(i).map(Value::from).unwrap_or(Value::Null),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => row
            .try_get::<f64, _>(i)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOL" => row.try_get::<bool, _>(i).map(Value::from).unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(i)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

// --------------------------------------------------------------------
// FakeBackend
// --------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Insert { table: String, row: QueryRow },
}

struct FakeTable {
    rows: Vec<QueryRow>,
    unique_columns: Vec<String>,
}

struct FakeBackendInner {
    tables: Mutex<HashMap<String, FakeTable>>,
    permits: Semaphore,
}

/// In-memory stand-in for a real relational engine. Understands just
/// enough of `INSERT`/`SELECT`/`CREATE TABLE` to drive end-to-end
/// scenarios in tests without a real database.
pub struct FakeBackend {
    inner: Arc<FakeBackendInner>,
}

impl FakeBackend {
    pub fn new(pool_size: usize) -> Self {
        Self {
            inner: Arc::new(FakeBackendInner {
                tables: Mutex::new(HashMap::new()),
                permits: Semaphore::new(pool_size),
            }),
        }
    }

    /// Declares `column` unique on `table`, so inserts that collide abort
    /// with `BACKEND_ERROR` — used to exercise the prepare-failure/abort path.
    pub async fn with_unique_column(&self, table: &str, column: &str) -> &Self {
        let mut tables = self.inner.tables.lock().await;
        tables
            .entry(table.to_string())
            .or_insert_with(|| FakeTable {
                rows: Vec::new(),
                unique_columns: Vec::new(),
            })
            .unique_columns
            .push(column.to_string());
        self
    }

    /// Snapshot of every row currently committed to `table`, for test
    /// assertions.
    pub async fn rows_of(&self, table: &str) -> Vec<QueryRow> {
        let tables = self.inner.tables.lock().await;
        tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn begin(&self, timeout: Duration) -> Result<Box<dyn Session>, MiddlewareError> {
        let permit = tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned())
            .await
            .map_err(|_| MiddlewareError::BackendError("fake pool exhausted".into()))?
            .expect("semaphore never closed");
        Ok(Box::new(FakeSession {
            inner: self.inner.clone(),
            permit: Some(permit),
            pending: Vec::new(),
            broken: false,
        }))
    }

    async fn pool_health(&self) -> bool {
        true
    }
}

struct FakeSession {
    inner: Arc<FakeBackendInner>,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
    pending: Vec<Op>,
    broken: bool,
}

#[async_trait]
impl Session for FakeSession {
    async fn execute(&mut self, sql: &str) -> Result<u64, MiddlewareError> {
        if self.broken {
            return Err(MiddlewareError::BackendError("session aborted by a prior statement".into()));
        }
        let (table, row) = parse_insert(sql).ok_or_else(|| {
            MiddlewareError::BackendError(format!("FakeBackend cannot execute: {sql}"))
        })?;

        let tables = self.inner.tables.lock().await;
        if let Some(existing) = tables.get(&table) {
            for col in &existing.unique_columns {
                if let Some(new_val) = row.get(col) {
                    let collides = existing.rows.iter().any(|r| r.get(col) == Some(new_val))
                        || self.pending.iter().any(|Op::Insert { table: t, row: r }| {
                            t == &table && r.get(col) == Some(new_val)
                        });
                    if collides {
                        self.broken = true;
                        return Err(MiddlewareError::BackendError(format!(
                            "unique violation on {table}.{col}"
                        )));
                    }
                }
            }
        }
        drop(tables);

        self.pending.push(Op::Insert { table, row });
        Ok(1)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<QueryRow>, MiddlewareError> {
        if self.broken {
            return Err(MiddlewareError::BackendError("session aborted by a prior statement".into()));
        }
        let select = parse_select(sql).ok_or_else(|| {
            MiddlewareError::BackendError(format!("FakeBackend cannot query: {sql}"))
        })?;
        let tables = self.inner.tables.lock().await;
        let rows = tables.get(&select.table).map(|t| t.rows.clone()).unwrap_or_default();
        let filtered: Vec<QueryRow> = rows
            .into_iter()
            .filter(|r| match &select.filter {
                Some((col, val)) => r.get(col) == Some(&Value::from(val.as_str())),
                None => true,
            })
            .map(|r| project(&r, &select.columns))
            .collect();
        Ok(filtered)
    }

    async fn prepare(&mut self) -> Result<bool, MiddlewareError> {
        Ok(!self.broken)
    }

    async fn commit(&mut self) -> Result<(), MiddlewareError> {
        if self.broken {
            return self.rollback().await;
        }
        let mut tables = self.inner.tables.lock().await;
        for op in self.pending.drain(..) {
            let Op::Insert { table, row } = op;
            tables
                .entry(table)
                .or_insert_with(|| FakeTable {
                    rows: Vec::new(),
                    unique_columns: Vec::new(),
                })
                .rows
                .push(row);
        }
        debug!("fake backend session committed");
        self.permit = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), MiddlewareError> {
        self.pending.clear();
        self.permit = None;
        Ok(())
    }
}

fn project(row: &QueryRow, columns: &[String]) -> QueryRow {
    if columns.len() == 1 && columns[0] == "*" {
        return row.clone();
    }
    columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

/// Parses `INSERT INTO table(col, col2) VALUES('v', 'v2')`, the one
/// shape of INSERT the in-memory FakeBackend understands.
fn parse_insert(sql: &str) -> Option<(String, QueryRow)> {
    let sql = sql.trim().trim_end_matches(';');
    let rest = sql.strip_prefix("INSERT INTO").or_else(|| {
        if sql.len() >= 11 && sql[..11].eq_ignore_ascii_case("insert into") {
            Some(&sql[11..])
        } else {
            None
        }
    })?;
    let open = rest.find('(')?;
    let table = rest[..open].trim().to_string();
    let close = rest.find(')')?;
    let columns: Vec<String> = rest[open + 1..close]
        .split(',')
        .map(|c| c.trim().to_string())
        .collect();

    let values_kw_idx = rest[close..].to_ascii_uppercase().find("VALUES")? + close;
    let vopen = rest[values_kw_idx..].find('(')? + values_kw_idx;
    let vclose = rest[values_kw_idx..].rfind(')')? + values_kw_idx;
    let values: Vec<String> = split_sql_values(&rest[vopen + 1..vclose]);

    if values.len() != columns.len() {
        return None;
    }
    let row = columns
        .into_iter()
        .zip(values)
        .map(|(c, v)| (c, Value::from(v)))
        .collect();
    Some((table, row))
}

struct SimpleSelect {
    columns: Vec<String>,
    table: String,
    filter: Option<(String, String)>,
}

/// Parses `SELECT col[, col2] FROM table [WHERE col = 'val']`.
fn parse_select(sql: &str) -> Option<SimpleSelect> {
    let sql = sql.trim().trim_end_matches(';');
    let upper = sql.to_ascii_uppercase();
    if !upper.starts_with("SELECT") {
        return None;
    }
    let from_idx = upper.find(" FROM ")?;
    let columns: Vec<String> = sql[6..from_idx]
        .split(',')
        .map(|c| c.trim().to_string())
        .collect();

    let after_from = &sql[from_idx + 6..];
    let upper_after = after_from.to_ascii_uppercase();
    let (table_part, filter) = match upper_after.find(" WHERE ") {
        Some(where_idx) => {
            let table = after_from[..where_idx].trim().to_string();
            let clause = after_from[where_idx + 7..].trim();
            let eq_idx = clause.find('=')?;
            let col = clause[..eq_idx].trim().to_string();
            let val = clause[eq_idx + 1..]
                .trim()
                .trim_matches('\'')
                .trim_matches('"')
                .to_string();
            (table, Some((col, val)))
        }
        None => (after_from.trim().to_string(), None),
    };

    Some(SimpleSelect {
        columns,
        table: table_part,
        filter,
    })
}

/// Splits a `VALUES(...)` argument list on commas that are not inside a
/// quoted string literal, then strips quotes from each value.
fn split_sql_values(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '\'' | '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(current.trim().trim_matches('\'').trim_matches('"').to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        if c != ',' || in_quotes {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().trim_matches('\'').trim_matches('"').to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_select_round_trips_committed_row() {
        let backend = FakeBackend::new(5);
        backend.with_unique_column("users", "email").await;

        let mut session = backend.begin(Duration::from_secs(1)).await.unwrap();
        session
            .execute("INSERT INTO users(name,email) VALUES('X','x@e')")
            .await
            .unwrap();
        assert!(session.prepare().await.unwrap());
        session.commit().await.unwrap();

        let mut reader = backend.begin(Duration::from_secs(1)).await.unwrap();
        let rows = reader
            .query("SELECT email FROM users WHERE name='X'")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("email"), Some(&Value::from("x@e")));
    }

    #[tokio::test]
    async fn duplicate_unique_column_aborts_with_backend_error() {
        let backend = FakeBackend::new(5);
        backend.with_unique_column("users", "email").await;

        let mut first = backend.begin(Duration::from_secs(1)).await.unwrap();
        first
            .execute("INSERT INTO users(name,email) VALUES('X','dup@e')")
            .await
            .unwrap();
        first.commit().await.unwrap();

        let mut second = backend.begin(Duration::from_secs(1)).await.unwrap();
        let result = second
            .execute("INSERT INTO users(name,email) VALUES('Y','dup@e')")
            .await;
        assert!(matches!(result, Err(MiddlewareError::BackendError(_))));
    }

    #[tokio::test]
    async fn rollback_discards_pending_insert() {
        let backend = FakeBackend::new(5);
        let mut session = backend.begin(Duration::from_secs(1)).await.unwrap();
        session
            .execute("INSERT INTO users(name,email) VALUES('X','x@e')")
            .await
            .unwrap();
        session.rollback().await.unwrap();
        assert_eq!(backend.rows_of("users").await.len(), 0);
    }

    #[tokio::test]
    async fn pool_capacity_blocks_until_a_session_releases() {
        let backend = Arc::new(FakeBackend::new(1));
        let held = backend.begin(Duration::from_secs(5)).await.unwrap();

        let second = backend.begin(Duration::from_millis(20)).await;
        assert!(second.is_err());
        drop(held);
    }
}
