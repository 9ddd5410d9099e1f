//! Typed topology + tunables configuration.
//!
//! Loaded via [`crate::load_layered_yaml`] (base + environment overlay,
//! deep-merged, canonicalized, hashed) and then deserialized into this
//! typed shape. `config_hash` is logged at node startup so operators can
//! confirm every node in the cluster actually agrees on "the same" config.

use anyhow::{Context, Result};
use mqk_schemas::NodeDescriptor;
use serde::{Deserialize, Serialize};

use crate::{load_layered_yaml, LoadedConfig};

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    15_000
}
fn default_lock_timeout_ms() -> u64 {
    30_000
}
fn default_prepare_timeout_ms() -> u64 {
    30_000
}
fn default_election_timeout_ms() -> u64 {
    5_000
}
fn default_coordinator_wait_timeout_ms() -> u64 {
    10_000
}
fn default_txn_phase_timeout_ms() -> u64 {
    60_000
}
fn default_client_reply_timeout_ms() -> u64 {
    30_000
}
fn default_pool_size() -> u32 {
    5
}
fn default_pool_acquire_timeout_ms() -> u64 {
    5_000
}
fn default_load_balance_strategy() -> LoadBalanceStrategyConfig {
    LoadBalanceStrategyConfig::RoundRobin
}

/// Serializable mirror of [`mqk_txn::LoadBalanceStrategy`]; kept here rather
/// than depending on `mqk-txn` from `mqk-config` (txn already depends on
/// config's sibling crates) to avoid a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalanceStrategyConfig {
    RoundRobin,
    LeastLoaded,
}

/// Static cluster topology plus every tunable the control plane needs.
/// `self_node_id` identifies which `nodes[]` entry this process runs as;
/// callers decide it from CLI arg or environment (not embedded in YAML, so
/// one config file can describe the whole cluster).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub nodes: Vec<NodeDescriptor>,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_prepare_timeout_ms")]
    pub prepare_timeout_ms: u64,
    #[serde(default = "default_election_timeout_ms")]
    pub election_timeout_ms: u64,
    #[serde(default = "default_coordinator_wait_timeout_ms")]
    pub coordinator_wait_timeout_ms: u64,
    #[serde(default = "default_txn_phase_timeout_ms")]
    pub txn_phase_timeout_ms: u64,
    #[serde(default = "default_client_reply_timeout_ms")]
    pub client_reply_timeout_ms: u64,
    #[serde(default = "default_pool_size")]
    pub backend_pool_size: u32,
    #[serde(default = "default_pool_acquire_timeout_ms")]
    pub backend_pool_acquire_timeout_ms: u64,

    #[serde(default)]
    pub admin_http_port: Option<u16>,
    #[serde(default)]
    pub audit_log_path: Option<String>,
    #[serde(default = "default_load_balance_strategy")]
    pub load_balance_strategy: LoadBalanceStrategyConfig,
}

impl TopologyConfig {
    /// Loads and type-checks a `TopologyConfig` from layered YAML files,
    /// returning both the typed config and the hashed raw load for logging.
    pub fn load(paths: &[&str]) -> Result<(TopologyConfig, LoadedConfig)> {
        let loaded = load_layered_yaml(paths)?;
        let topo: TopologyConfig = serde_json::from_value(loaded.config_json.clone())
            .context("topology config does not match expected shape")?;
        topo.validate()?;
        Ok((topo, loaded))
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.nodes.is_empty(), "topology config has no nodes");
        let mut ids: Vec<u32> = self.nodes.iter().map(|n| n.node_id.0).collect();
        ids.sort_unstable();
        for w in ids.windows(2) {
            anyhow::ensure!(w[0] != w[1], "duplicate node_id {} in topology", w[0]);
        }
        Ok(())
    }

    pub fn node(&self, id: mqk_schemas::NodeId) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.node_id == id)
    }

    pub fn peer_ids(&self, self_id: mqk_schemas::NodeId) -> Vec<mqk_schemas::NodeId> {
        self.nodes
            .iter()
            .map(|n| n.node_id)
            .filter(|id| *id != self_id)
            .collect()
    }

    pub fn cluster_size(&self) -> u32 {
        self.nodes.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_and_validates_three_node_topology() {
        let f = write_tmp(
            r#"
nodes:
  - node_id: 1
    address: "127.0.0.1"
    port: 7001
    client_port: 8001
    backend_host: "127.0.0.1"
    backend_port: 5432
    backend_database: "mw1"
    backend_user: "mw"
  - node_id: 2
    address: "127.0.0.1"
    port: 7002
    client_port: 8002
    backend_host: "127.0.0.1"
    backend_port: 5433
    backend_database: "mw2"
    backend_user: "mw"
  - node_id: 3
    address: "127.0.0.1"
    port: 7003
    client_port: 8003
    backend_host: "127.0.0.1"
    backend_port: 5434
    backend_database: "mw3"
    backend_user: "mw"
heartbeat_interval_ms: 1000
"#,
        );
        let path = f.path().to_str().unwrap();
        let (topo, loaded) = TopologyConfig::load(&[path]).unwrap();
        assert_eq!(topo.cluster_size(), 3);
        assert_eq!(topo.heartbeat_interval_ms, 1000);
        assert_eq!(topo.heartbeat_timeout_ms, 15_000, "default preserved");
        assert_eq!(loaded.config_hash.len(), 64);
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let f = write_tmp(
            r#"
nodes:
  - node_id: 1
    address: "a"
    port: 1
    client_port: 101
    backend_host: "a"
    backend_port: 1
    backend_database: "d"
    backend_user: "u"
  - node_id: 1
    address: "b"
    port: 2
    client_port: 102
    backend_host: "b"
    backend_port: 2
    backend_database: "d2"
    backend_user: "u2"
"#,
        );
        let path = f.path().to_str().unwrap();
        assert!(TopologyConfig::load(&[path]).is_err());
    }
}
