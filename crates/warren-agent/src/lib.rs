//! # warren-agent: the per-node worker
//!
//! The agent turns container assignments into Runtime calls. It is a
//! single coordinator task plus one lifecycle task per container:
//!
//! - **Registration**: join the cluster (minting or reusing a node ID).
//! - **Heartbeat loop** (5 s): report liveness, available capacity, and
//!   the observed state of every local container.
//! - **Assignment sync loop** (3 s): fetch the containers assigned to this
//!   node and diff against the local set - spawn lifecycle tasks for new
//!   running-intent containers, signal stops for condemned ones, tear down
//!   containers whose records vanished.
//! - **Lifecycle tasks** ([`task`]): drive one container through
//!   pull → create → start → running → {complete, failed} | stopping →
//!   shutdown, reporting transitions over a channel. Health checks run
//!   inside the lifecycle task while the container is up.
//!
//! Partition behavior: every manager call is fire-and-retry. While the
//! control plane is unreachable the agent keeps running what it has,
//! health checks included; on reconnect it replays current statuses and
//! the control plane reconciles.

mod agent;
mod client;
mod health;
mod process;
mod runtime;
mod secrets;
mod task;
mod volumes;

pub use agent::{Agent, AgentConfig};
pub use client::ManagerClient;
pub use process::ProcessRuntime;
pub use runtime::{FakeRuntime, RunConfig, Runtime, RuntimeError};
pub use task::{TaskCommand, TaskEvent};

/// Errors surfaced by the agent itself (loop-level; lifecycle errors are
/// reported as container state, not returned).
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("api: {0}")]
    Api(#[from] warren_types::ApiError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto: {0}")]
    Crypto(#[from] warren_crypto::CryptoError),
}

/// Result alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
