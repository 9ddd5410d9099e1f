//! mqk-node entry point.
//!
//! This file is intentionally thin: it loads config, builds the backend
//! and node, starts every surface (messenger, client socket, admin HTTP),
//! then waits for a shutdown signal. All wiring logic lives in `lib.rs`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mqk_db::{FakeBackend, InMemoryTxnLog, PostgresBackend, PostgresTxnLog, TxnLogStore};
use mqk_node::Node;
use mqk_schemas::NodeId;
use mqk_txn::LoadBalanceStrategy;
use tracing::info;

#[derive(Parser)]
#[command(name = "mqk-node")]
#[command(about = "Distributed database middleware node", long_about = None)]
struct Cli {
    /// This process's node_id within the topology.
    #[arg(long)]
    node_id: u32,

    /// Layered topology config paths, in merge order (base -> environment).
    #[arg(long = "config", required = true)]
    config_paths: Vec<String>,

    /// Run against an in-memory fake backend instead of Postgres. For local
    /// smoke-testing only; never set in a real deployment.
    #[arg(long, default_value_t = false)]
    fake_backend: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let self_id = NodeId(cli.node_id);

    let paths: Vec<&str> = cli.config_paths.iter().map(String::as_str).collect();
    let (topology, loaded) = mqk_config::TopologyConfig::load(&paths)
        .context("loading topology config")?;
    info!(node_id = %self_id, config_hash = %loaded.config_hash, "config loaded");

    let audit = match &topology.audit_log_path {
        Some(path) => {
            let writer = mqk_audit::AuditWriter::new(path, true).context("opening audit log")?;
            Some(Arc::new(std::sync::Mutex::new(writer)))
        }
        None => None,
    };

    let (backend, txn_log): (Arc<dyn mqk_db::Backend>, Arc<dyn TxnLogStore>) = if cli.fake_backend {
        (
            Arc::new(FakeBackend::new(topology.backend_pool_size as usize)),
            Arc::new(InMemoryTxnLog::new(self_id)),
        )
    } else {
        let pool = mqk_db::connect_from_env(topology.backend_pool_size, topology.backend_pool_acquire_timeout_ms)
            .await
            .context("connecting to backend")?;
        (
            Arc::new(PostgresBackend::new(pool.clone())),
            Arc::new(PostgresTxnLog::new(pool, self_id, topology.cluster_size())),
        )
    };

    let load_balance_strategy = match topology.load_balance_strategy {
        mqk_config::topology::LoadBalanceStrategyConfig::RoundRobin => LoadBalanceStrategy::RoundRobin,
        mqk_config::topology::LoadBalanceStrategyConfig::LeastLoaded => LoadBalanceStrategy::LeastLoaded,
    };

    let node = Node::build(
        self_id,
        &topology,
        loaded.config_hash.clone(),
        backend,
        txn_log,
        audit,
        load_balance_strategy,
    )?;

    node.spawn().await;

    if let Some(admin_bind_addr) = node.admin_bind_addr {
        let state = mqk_node::admin_http::AdminState {
            node: node.clone(),
            bus: node.events.clone(),
        };
        let router = mqk_node::admin_http::build_router(state);
        let listener = tokio::net::TcpListener::bind(admin_bind_addr)
            .await
            .with_context(|| format!("binding admin http to {admin_bind_addr}"))?;
        info!(%admin_bind_addr, "admin http listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::warn!(error = %e, "admin http server exited");
            }
        });
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl_c")?;
    info!(node_id = %self_id, "shutdown signal received");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
