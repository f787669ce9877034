//! # warren-kernel: the replicated state machine
//!
//! This crate defines the complete set of state-changing [`Command`]s and
//! the apply path that turns a committed command into store writes.
//!
//! The apply path is deterministic: no I/O beyond the store transaction, no
//! clocks (the leader's log-entry timestamp is passed in), no randomness
//! (IDs are minted by command producers). Two replicas applying the same
//! log prefix reach byte-identical stores, and a command that fails a
//! precondition fails identically everywhere.
//!
//! ```ignore
//! store.transaction(|txn| apply_committed(txn, command, entry.timestamp))?;
//! ```

mod apply;
mod command;

#[cfg(test)]
mod tests;

pub use apply::{KernelError, MAX_REPLICAS, apply_committed};
pub use command::{Command, CommandKind};

/// Result alias for apply-path operations.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Applies one committed command inside a store transaction.
///
/// A failing command leaves the store untouched. This is the whole apply
/// path as the replicator's driver calls it, one log entry at a time.
pub fn apply_to_store(
    store: &warren_store::Store,
    cmd: Command,
    now: warren_types::Timestamp,
) -> Result<()> {
    store.transaction(|txn| apply_committed(txn, cmd, now))
}
