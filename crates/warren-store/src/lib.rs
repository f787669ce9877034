//! # warren-store: embedded cluster-state persistence
//!
//! The store holds the entire declared and observed cluster state as ordered
//! buckets, one per entity kind (`nodes`, `services`, `containers`,
//! `secrets`, `volumes`, `ingress_rules`, `certificates`). It is the state
//! machine behind the replicator:
//!
//! - All writes flow through [`Store::transaction`], which either commits
//!   atomically or leaves the state untouched. Direct writes do not exist;
//!   the only caller of the write path is the replicated apply loop.
//! - Reads are point-in-time consistent: listings decode a snapshot that
//!   later mutations do not affect, and [`Store::view`] hands control loops
//!   a full start-of-cycle snapshot.
//! - Durability is the replicated command log ([`CommandLog`]: append-only,
//!   length-prefixed, checksummed, fsynced before acknowledgment) plus
//!   periodic full-state [`snapshot`]s. Recovery restores the newest valid
//!   snapshot and replays the log tail.
//!
//! Bucket iteration order is fixed (bucket declaration order, keys
//! ascending), so two replicas that applied the same log prefix produce
//! byte-identical snapshots.

mod log;
mod snapshot;
mod state;
mod store;

pub use log::{CommandLog, LOG_DIR};
pub use snapshot::{SNAPSHOT_DIR, SnapshotManifest, load_latest_snapshot, write_snapshot};
pub use state::StoreState;
pub use store::{Store, Txn};

use warren_types::{ApiError, ErrorKind};

/// Errors from store operations.
///
/// `AlreadyExists` and `NotFound` are deterministic precondition failures:
/// every replica applying the same command reaches the same result. `Io`
/// and `Corrupt` are fatal to the node.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id:?} already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("{kind} {id:?} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(#[from] postcard::Error),

    #[error("corrupt store data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for deterministic precondition failures that every replica
    /// reproduces identically. Everything else implies local damage.
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyExists { .. } | StoreError::NotFound { .. }
        )
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Io(_) | StoreError::Codec(_) | StoreError::Corrupt(_) => ErrorKind::Fatal,
        };
        ApiError::new(kind, err.to_string())
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
