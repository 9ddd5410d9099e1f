//! Backend Adapter.
//!
//! The relational engine itself is out of scope here; this crate only
//! exposes the narrow `Backend`/`Session` seam the rest of the control
//! plane programs against, plus the `transactions_log` persistence every
//! participant writes to at PREPARE and again at COMMIT/ABORT.
//!
//! Two implementations: [`PostgresBackend`], which pools `sqlx::Postgres`
//! connections and implements "prepare without commit" with a raw
//! `BEGIN`/hold/`COMMIT`-or-`ROLLBACK` sequence (sqlx's typed
//! `Transaction<'c, DB>` borrows its connection's lifetime, which cannot
//! outlive a boxed, type-erased `Session` held across arbitrary await
//! points — so the pin is tracked on the owned `PoolConnection` by hand
//! instead); and [`FakeBackend`], an in-memory stand-in for tests that
//! does not talk to any real engine.

pub mod backend;
pub mod txnlog;

pub use backend::{Backend, FakeBackend, PostgresBackend, QueryRow, Session};
pub use txnlog::{InMemoryTxnLog, PostgresTxnLog, TxnLogEntry, TxnLogStore};

pub const ENV_DB_URL: &str = "MQK_DATABASE_URL";

/// Connects to Postgres using `MQK_DATABASE_URL` and runs embedded
/// migrations (`transactions_log` plus its indexes).
pub async fn connect_from_env(pool_size: u32, acquire_timeout_ms: u64) -> anyhow::Result<sqlx::PgPool> {
    use anyhow::Context;
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(pool_size)
        .acquire_timeout(std::time::Duration::from_millis(acquire_timeout_ms))
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Runs the embedded `transactions_log` migration.
pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    use anyhow::Context;
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}
