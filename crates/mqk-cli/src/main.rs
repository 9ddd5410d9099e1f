//! Operator CLI for a running cluster.
//!
//! Deliberately narrow: a topology sanity check plus two admin HTTP probes.
//! Not a SQL client — issuing statements against a node is the client
//! socket's job (`mqk-node`'s `client_listener`), and this binary has no
//! code path that opens one.

use std::io::Write as _;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "mqk-cli")]
#[command(about = "Operator CLI for a middleware cluster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Topology config commands
    Topology {
        #[command(subcommand)]
        cmd: TopologyCmd,
    },

    /// GET /v1/health on a node's admin HTTP surface
    Ping {
        /// host:port of the node's admin HTTP listener
        #[arg(long = "admin-addr")]
        admin_addr: String,
    },

    /// GET /v1/status on a node's admin HTTP surface
    Status {
        #[arg(long = "admin-addr")]
        admin_addr: String,
    },
}

#[derive(Subcommand)]
enum TopologyCmd {
    /// Load and validate a layered topology config, printing its nodes and
    /// tunables plus the config hash every node logs at startup.
    Show {
        /// Layered config paths, in merge order (base -> environment).
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Topology { cmd: TopologyCmd::Show { config_paths } } => {
            let paths: Vec<&str> = config_paths.iter().map(String::as_str).collect();
            let (topology, loaded) =
                mqk_config::TopologyConfig::load(&paths).context("loading topology config")?;

            println!("config_hash={}", loaded.config_hash);
            println!("cluster_size={}", topology.cluster_size());
            for node in &topology.nodes {
                println!(
                    "node_id={} address={}:{} client_port={} backend={}:{}/{}",
                    node.node_id, node.address, node.port, node.client_port, node.backend_host,
                    node.backend_port, node.backend_database
                );
            }
            println!(
                "heartbeat_interval_ms={} heartbeat_timeout_ms={} election_timeout_ms={}",
                topology.heartbeat_interval_ms, topology.heartbeat_timeout_ms, topology.election_timeout_ms
            );
            println!(
                "lock_timeout_ms={} prepare_timeout_ms={} txn_phase_timeout_ms={}",
                topology.lock_timeout_ms, topology.prepare_timeout_ms, topology.txn_phase_timeout_ms
            );
            println!("load_balance_strategy={:?}", topology.load_balance_strategy);
        }

        Commands::Ping { admin_addr } => {
            let body = admin_http_get(&admin_addr, "/v1/health").await?;
            println!("{body}");
        }

        Commands::Status { admin_addr } => {
            let body = admin_http_get(&admin_addr, "/v1/status").await?;
            let pretty: serde_json::Value = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
            println!("{}", serde_json::to_string_pretty(&pretty)?);
        }
    }

    Ok(())
}

/// A bare HTTP/1.1 GET, kept dependency-free on purpose: this CLI only ever
/// talks to two fixed, trusted endpoints on the admin HTTP surface, which
/// does not warrant pulling in a full HTTP client crate.
async fn admin_http_get(admin_addr: &str, path: &str) -> Result<String> {
    let addr: SocketAddr = admin_addr
        .parse()
        .with_context(|| format!("invalid admin address: {admin_addr}"))?;

    let mut stream = tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(addr))
        .await
        .with_context(|| format!("timed out connecting to {addr}"))?
        .with_context(|| format!("connecting to {addr}"))?;

    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {admin_addr}\r\nConnection: close\r\nAccept: application/json\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let response = String::from_utf8_lossy(&raw);

    let (status_line, rest) = response
        .split_once("\r\n")
        .ok_or_else(|| anyhow::anyhow!("malformed HTTP response from {addr}"))?;
    anyhow::ensure!(
        status_line.contains("200"),
        "admin http request failed: {status_line}"
    );

    let body = rest.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or(rest);
    Ok(body.trim_end().to_string())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .try_init();
    let _ = std::io::stdout().flush();
}
