//! # warren-server: the manager daemon
//!
//! Everything that makes a manager a manager lives here:
//!
//! - The **replicator driver** ([`replicator`]): a single event loop that
//!   owns the pure VSR replica, the store, and the write-ahead log. It
//!   feeds the replica with peer messages, election/heartbeat timers
//!   (with jitter), and client submissions, then executes the replica's
//!   output - persist, apply, send, notify.
//! - The **API server** ([`api`]): framed request/response handling for
//!   workers and clients, with mutations funneled into the replicator and
//!   reads served from the local store at bounded staleness.
//! - The **watch broker** ([`broker`]): per-subscriber bounded queues of
//!   container-assignment events; overflow disconnects the subscriber,
//!   which reconnects and re-reads a snapshot.
//!
//! [`ManagerNode::start`] wires the pieces together with the leader-only
//! control loops from `warren-controller`.

mod api;
mod broker;
mod replicator;
mod server;
mod wal;

pub use broker::{Broker, Subscription};
pub use replicator::{LeaderInfo, ReplicatorHandle};
pub use server::{ManagerConfig, ManagerNode};
pub use wal::WalRecord;

/// Server-level errors. Fatal variants crash the process by design: a
/// store that cannot be trusted must not keep serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("store: {0}")]
    Store(#[from] warren_store::StoreError),

    #[error("wire: {0}")]
    Wire(#[from] warren_wire::WireError),

    #[error("recovery failed: {0}")]
    Recovery(String),
}

/// Result alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
