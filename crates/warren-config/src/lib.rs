//! # warren-config: per-node startup configuration
//!
//! One recognized set of options, merged from three sources in precedence
//! order: built-in defaults, a TOML file (`warren.toml` next to the data
//! dir by default, or an explicit path), and `WARREN_*` environment
//! variables. Durations are plain integer milliseconds/seconds so the
//! file stays obvious.

mod loader;

pub use loader::ConfigLoader;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use warren_types::{NodeRole, Resources};

/// Everything a node reads at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarrenConfig {
    /// Stable node identity; minted on first registration when absent.
    pub node_id: Option<String>,
    pub role: NodeRole,
    /// Consensus listener.
    pub bind_addr: String,
    /// API listener.
    pub api_addr: String,
    /// Address other nodes should use to reach this one, when it differs
    /// from the bind address (NAT, multiple interfaces).
    pub advertise_addr: Option<String>,
    pub data_dir: PathBuf,
    /// Known manager API address for a joining worker.
    pub leader_hint: Option<String>,
    /// Handed out by the CA subsystem; opaque here.
    pub join_token: Option<String>,
    /// Hex AES-256 key for secret sealing. Managers only.
    pub cluster_key: Option<String>,

    /// This manager's index into `peers` / `peer_api_addrs`.
    pub replica_id: u8,
    /// Consensus addresses of every manager, in replica-ID order.
    pub peers: Vec<String>,
    /// API addresses of every manager, in replica-ID order.
    pub peer_api_addrs: Vec<String>,

    /// Worker resource capacity advertised at registration.
    pub capacity: Resources,
    pub labels: BTreeMap<String, String>,

    // Loop periods and timeouts.
    pub heartbeat_period_ms: u64,
    pub assignment_sync_period_ms: u64,
    pub pull_timeout_ms: u64,
    pub node_down_timeout_ms: u64,
    pub scheduler_period_ms: u64,
    pub reconciler_period_ms: u64,
    pub gc_grace_ms: u64,
    pub stop_timeout_seconds: u64,
    pub election_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub snapshot_interval_entries: u64,
}

impl Default for WarrenConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            role: NodeRole::Hybrid,
            bind_addr: "0.0.0.0:7400".into(),
            api_addr: "0.0.0.0:7401".into(),
            advertise_addr: None,
            data_dir: PathBuf::from("./warren-data"),
            leader_hint: None,
            join_token: None,
            cluster_key: None,
            replica_id: 0,
            peers: Vec::new(),
            peer_api_addrs: Vec::new(),
            capacity: Resources::new(4_000, 8 << 30, 64 << 30),
            labels: BTreeMap::new(),
            heartbeat_period_ms: 5_000,
            assignment_sync_period_ms: 3_000,
            pull_timeout_ms: 600_000,
            node_down_timeout_ms: 30_000,
            scheduler_period_ms: 5_000,
            reconciler_period_ms: 10_000,
            gc_grace_ms: 300_000,
            stop_timeout_seconds: 10,
            election_timeout_ms: 500,
            heartbeat_timeout_ms: 500,
            snapshot_interval_entries: 1_024,
        }
    }
}

impl WarrenConfig {
    /// The consensus peer set, defaulting to a solo cluster of this node.
    pub fn effective_peers(&self) -> Vec<String> {
        if self.peers.is_empty() {
            vec![self.advertised_bind_addr()]
        } else {
            self.peers.clone()
        }
    }

    /// API addresses matching `effective_peers`.
    pub fn effective_peer_api_addrs(&self) -> Vec<String> {
        if self.peer_api_addrs.is_empty() {
            vec![self.api_addr.clone()]
        } else {
            self.peer_api_addrs.clone()
        }
    }

    fn advertised_bind_addr(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| self.bind_addr.clone())
    }

    /// Parses the configured cluster key, if any.
    pub fn parsed_cluster_key(&self) -> Result<Option<warren_crypto::ClusterKey>> {
        match &self.cluster_key {
            Some(hex) => Ok(Some(
                warren_crypto::ClusterKey::from_hex(hex).context("invalid cluster_key")?,
            )),
            None => Ok(None),
        }
    }

    /// Structural checks beyond what serde can express.
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.is_empty() || self.api_addr.is_empty() {
            bail!("bind_addr and api_addr must be set");
        }
        let peers = self.effective_peers();
        if usize::from(self.replica_id) >= peers.len() {
            bail!(
                "replica_id {} out of range for {} configured peers",
                self.replica_id,
                peers.len()
            );
        }
        if self.effective_peer_api_addrs().len() != peers.len() {
            bail!("peers and peer_api_addrs must have the same length");
        }
        if self.election_timeout_ms == 0 || self.heartbeat_timeout_ms == 0 {
            bail!("election and heartbeat timeouts must be positive");
        }
        if self.role.is_manager() {
            self.parsed_cluster_key()?;
        }
        Ok(())
    }
}
