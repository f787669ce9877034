//! warrend: the Warren node daemon.
//!
//! One process per cluster member. Managers (and hybrids) run the
//! replicated control plane and the API; workers (and hybrids) run the
//! agent against the process runtime. Configuration merges defaults, the
//! TOML file, `WARREN_*` environment variables, and the flags below;
//! flags win.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use warren_agent::{Agent, AgentConfig, ProcessRuntime};
use warren_config::{ConfigLoader, WarrenConfig};
use warren_controller::ControllerConfig;
use warren_server::{ManagerConfig, ManagerNode};
use warren_types::{ApiError, ErrorKind, NodeId, NodeRole};

/// Exit codes as the CLI contract defines them.
mod exit {
    pub const OK: u8 = 0;
    pub const GENERAL: u8 = 1;
    pub const BAD_ARGS: u8 = 2;
    pub const NO_LEADER: u8 = 3;
    pub const NOT_FOUND: u8 = 4;
    pub const ALREADY_EXISTS: u8 = 5;
}

#[derive(Debug, Parser)]
#[command(name = "warrend", about = "Warren cluster node daemon", version)]
struct Cli {
    /// Configuration file (TOML). Defaults to ./warren.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node role: manager, worker, or hybrid.
    #[arg(long)]
    role: Option<String>,

    /// Consensus listener address.
    #[arg(long)]
    bind_addr: Option<String>,

    /// API listener address.
    #[arg(long)]
    api_addr: Option<String>,

    /// Durable state directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Stable node identity to reuse.
    #[arg(long)]
    node_id: Option<String>,

    /// Manager API address a joining worker should contact first.
    #[arg(long)]
    leader_hint: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            return ExitCode::from(exit::BAD_ARGS);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            error!(%err, "failed to start async runtime");
            return ExitCode::from(exit::GENERAL);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::from(exit::OK),
        Err(err) => {
            error!(%err, "node failed");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn load_config(cli: &Cli) -> Result<WarrenConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load()?;

    if let Some(role) = &cli.role {
        config.role = match role.as_str() {
            "manager" => NodeRole::Manager,
            "worker" => NodeRole::Worker,
            "hybrid" => NodeRole::Hybrid,
            other => anyhow::bail!("unknown role {other:?}"),
        };
    }
    if let Some(addr) = &cli.bind_addr {
        config.bind_addr = addr.clone();
    }
    if let Some(addr) = &cli.api_addr {
        config.api_addr = addr.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(id) = &cli.node_id {
        config.node_id = Some(id.clone());
    }
    if let Some(hint) = &cli.leader_hint {
        config.leader_hint = Some(hint.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn run(config: WarrenConfig) -> Result<()> {
    let mut manager = None;
    if config.role.is_manager() {
        manager = Some(ManagerNode::start(manager_config(&config)?).await?);
        info!(api = %config.api_addr, "control plane up");
    }

    if config.role.hosts_workloads() {
        let agent_config = agent_config(&config)?;
        tokio::spawn(async move {
            let agent = Agent::new(agent_config, ProcessRuntime::new());
            if let Err(err) = agent.run().await {
                error!(%err, "agent stopped");
            }
        });
        info!("worker agent up");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    if let Some(node) = &manager {
        node.shutdown();
    }
    Ok(())
}

fn manager_config(config: &WarrenConfig) -> Result<ManagerConfig> {
    Ok(ManagerConfig {
        replica_id: config.replica_id,
        peer_cluster_addrs: config.effective_peers(),
        peer_api_addrs: config.effective_peer_api_addrs(),
        bind_addr: config.bind_addr.clone(),
        api_addr: config.api_addr.clone(),
        data_dir: config.data_dir.clone(),
        cluster_key: config.parsed_cluster_key()?,
        election_timeout_ms: config.election_timeout_ms,
        heartbeat_timeout_ms: config.heartbeat_timeout_ms,
        snapshot_interval_entries: config.snapshot_interval_entries,
        controller: ControllerConfig {
            scheduler_period_ms: config.scheduler_period_ms,
            reconciler_period_ms: config.reconciler_period_ms,
            node_down_timeout_ms: config.node_down_timeout_ms,
            gc_grace_ms: config.gc_grace_ms,
        },
    })
}

fn agent_config(config: &WarrenConfig) -> Result<AgentConfig> {
    let mut managers = config.effective_peer_api_addrs();
    if let Some(hint) = &config.leader_hint {
        managers.insert(0, hint.clone());
    }
    if config.role == NodeRole::Hybrid && !managers.contains(&config.api_addr) {
        managers.insert(0, config.api_addr.clone());
    }
    Ok(AgentConfig {
        managers,
        node_id: config.node_id.clone().map(NodeId::new),
        role: config.role,
        address: config
            .advertise_addr
            .clone()
            .unwrap_or_else(|| config.api_addr.clone()),
        capacity: config.capacity,
        labels: config.labels.clone(),
        heartbeat_period_ms: config.heartbeat_period_ms,
        assignment_sync_period_ms: config.assignment_sync_period_ms,
        pull_timeout_ms: config.pull_timeout_ms,
        volumes_dir: config.data_dir.join("volumes"),
        secrets_dir: config.data_dir.join("secrets"),
        cluster_key: config.parsed_cluster_key()?,
    })
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ApiError>() {
        Some(api) => match api.kind {
            ErrorKind::Unavailable => exit::NO_LEADER,
            ErrorKind::NotFound => exit::NOT_FOUND,
            ErrorKind::AlreadyExists => exit::ALREADY_EXISTS,
            ErrorKind::InvalidArgument => exit::BAD_ARGS,
            ErrorKind::Transient | ErrorKind::Fatal => exit::GENERAL,
        },
        None => exit::GENERAL,
    }
}
