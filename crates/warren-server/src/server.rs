//! Manager node assembly: listeners, replicator, control loops.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use warren_controller::{ControllerConfig, run_reconciler, run_scheduler};
use warren_crypto::ClusterKey;
use warren_store::Store;
use warren_vsr::{Message, ReplicaId, VsrConfig};
use warren_wire::read_frame;

use crate::api::{ApiContext, serve_connection};
use crate::broker::Broker;
use crate::replicator::{self, ReplicatorConfig, ReplicatorHandle};
use crate::Result;

/// Everything a manager needs to come up.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// This node's index into the peer lists.
    pub replica_id: u8,
    /// Consensus addresses of every manager, indexed by replica ID.
    pub peer_cluster_addrs: Vec<String>,
    /// API addresses of every manager, indexed by replica ID.
    pub peer_api_addrs: Vec<String>,
    /// Local consensus listener (normally `peer_cluster_addrs[replica_id]`).
    pub bind_addr: String,
    /// Local API listener (normally `peer_api_addrs[replica_id]`).
    pub api_addr: String,
    pub data_dir: PathBuf,
    pub cluster_key: Option<ClusterKey>,
    pub election_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub snapshot_interval_entries: u64,
    pub controller: ControllerConfig,
}

/// A running manager. Dropping it tears everything down.
pub struct ManagerNode {
    pub store: Arc<Store>,
    pub replicator: ReplicatorHandle,
    /// Actually bound addresses (useful when configured with port 0).
    pub api_addr: SocketAddr,
    pub cluster_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl ManagerNode {
    /// Recovers durable state and starts every manager activity: the
    /// replicator loop, both listeners, and the leader-gated control
    /// loops.
    pub async fn start(config: ManagerConfig) -> Result<ManagerNode> {
        std::fs::create_dir_all(&config.data_dir)?;

        let peer_listener = TcpListener::bind(&config.bind_addr).await?;
        let api_listener = TcpListener::bind(&config.api_addr).await?;
        let cluster_addr = peer_listener.local_addr()?;
        let api_addr = api_listener.local_addr()?;

        let store = Arc::new(Store::new());
        let broker = Arc::new(Broker::new());

        let replicator_config = ReplicatorConfig {
            replica_id: ReplicaId::new(config.replica_id),
            vsr: VsrConfig::new(config.peer_cluster_addrs.len() as u8),
            peer_addrs: config.peer_cluster_addrs.clone(),
            peer_api_addrs: config.peer_api_addrs.clone(),
            data_dir: config.data_dir.clone(),
            election_timeout_ms: config.election_timeout_ms,
            heartbeat_timeout_ms: config.heartbeat_timeout_ms,
            snapshot_interval_entries: config.snapshot_interval_entries,
        };
        let parts = replicator::spawn(replicator_config, store.clone(), broker.clone())?;

        let mut tasks = vec![parts.join];

        // Consensus listener: frames from peers feed the replicator.
        let inbound = parts.inbound.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = peer_listener.accept().await else {
                    return;
                };
                debug!(%peer, "peer connected");
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    let mut stream = stream;
                    while let Ok(Some(msg)) = read_frame::<Message, _>(&mut stream).await {
                        if inbound.send(msg).await.is_err() {
                            return;
                        }
                    }
                });
            }
        }));

        // API listener.
        let ctx = Arc::new(ApiContext {
            store: store.clone(),
            replicator: parts.handle.clone(),
            broker,
            cluster_key: config.cluster_key.clone(),
        });
        tasks.push(tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = api_listener.accept().await else {
                    return;
                };
                let ctx = ctx.clone();
                tokio::spawn(serve_connection(ctx, stream));
            }
        }));

        // Leadership gate for the control loops.
        let is_leader = spawn_leader_gate(parts.leadership.clone(), &mut tasks);
        tasks.push(tokio::spawn(run_scheduler(
            store.clone(),
            parts.handle.clone(),
            is_leader.clone(),
            config.controller,
        )));
        tasks.push(tokio::spawn(run_reconciler(
            store.clone(),
            parts.handle.clone(),
            is_leader,
            config.controller,
        )));

        info!(%api_addr, %cluster_addr, replica = config.replica_id, "manager started");
        Ok(ManagerNode {
            store,
            replicator: parts.handle,
            api_addr,
            cluster_addr,
            tasks,
        })
    }

    /// Stops every task. The durable state stays for the next start.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ManagerNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Maps the replicator's `LeaderInfo` watch onto the `bool` gate the
/// control loops consume.
fn spawn_leader_gate(
    mut leadership: watch::Receiver<crate::replicator::LeaderInfo>,
    tasks: &mut Vec<JoinHandle<()>>,
) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(leadership.borrow().is_self);
    tasks.push(tokio::spawn(async move {
        while leadership.changed().await.is_ok() {
            let is_self = leadership.borrow().is_self;
            if tx.send(is_self).is_err() {
                return;
            }
        }
    }));
    rx
}
