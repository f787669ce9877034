//! Protocol messages.
//!
//! ## Normal operation
//! - [`Prepare`] - leader → backup: replicate this entry
//! - [`PrepareOk`] - backup → leader: entry is persisted locally
//! - [`Commit`] - leader → all: entries up to this point are committed
//! - [`Heartbeat`] - leader → all: liveness plus the current commit point
//!
//! ## View change
//! - [`StartViewChange`] - backup → all: the leader looks dead
//! - [`DoViewChange`] - backup → new leader: my log and commit point
//! - [`StartView`] - new leader → all: the authoritative log for the view
//!
//! ## Catch-up
//! - [`StateTransferRequest`] / [`StateTransferResponse`] - snapshot plus
//!   log suffix for replicas behind the compaction horizon
//!
//! All messages travel postcard-encoded inside the server's framed
//! transport; encoding is canonical so any two replicas serialize a message
//! identically.

use serde::{Deserialize, Serialize};

use crate::types::{LogEntry, OpNumber, ReplicaId, ViewNumber};

/// A protocol message with routing information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: ReplicaId,
    /// `None` for broadcast.
    pub to: Option<ReplicaId>,
    pub payload: MessagePayload,
}

impl Message {
    pub fn targeted(from: ReplicaId, to: ReplicaId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: Some(to),
            payload,
        }
    }

    pub fn broadcast(from: ReplicaId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: None,
            payload,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }
}

/// Every message the protocol exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessagePayload {
    Prepare(Prepare),
    PrepareOk(PrepareOk),
    Commit(Commit),
    Heartbeat(Heartbeat),
    StartViewChange(StartViewChange),
    DoViewChange(DoViewChange),
    StartView(StartView),
    StateTransferRequest(StateTransferRequest),
    StateTransferResponse(StateTransferResponse),
}

/// Leader → backup: append this entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prepare {
    pub view: ViewNumber,
    pub entry: LogEntry,
    /// Piggybacked commit point so backups apply without waiting for an
    /// explicit Commit.
    pub commit_number: OpNumber,
}

/// Backup → leader: the entry at `op_number` is persisted locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareOk {
    pub view: ViewNumber,
    pub op_number: OpNumber,
}

/// Leader → all: entries up to `commit_number` are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub view: ViewNumber,
    pub commit_number: OpNumber,
}

/// Leader → all: periodic liveness carrying the commit point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub view: ViewNumber,
    pub commit_number: OpNumber,
}

/// Backup → all: vote to replace the leader of the current view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartViewChange {
    pub new_view: ViewNumber,
}

/// Backup → new leader: everything needed to pick the authoritative log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoViewChange {
    pub new_view: ViewNumber,
    /// Last view in which this replica was in normal status.
    pub last_normal_view: ViewNumber,
    /// Log suffix above this replica's compaction horizon.
    pub log: Vec<LogEntry>,
    /// Ops at or below this are compacted into a store snapshot.
    pub snapshot_op: OpNumber,
    pub op_number: OpNumber,
    pub commit_number: OpNumber,
}

/// New leader → all: adopt this log and enter the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartView {
    pub view: ViewNumber,
    pub log: Vec<LogEntry>,
    pub snapshot_op: OpNumber,
    pub op_number: OpNumber,
    pub commit_number: OpNumber,
}

/// Replica → peer: I am missing entries from `from_op` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransferRequest {
    pub from_op: OpNumber,
}

/// Peer → replica: snapshot (when the request fell below the compaction
/// horizon) plus the log suffix. Built by the driver, which owns the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransferResponse {
    pub view: ViewNumber,
    /// Canonical store snapshot covering ops `..= snapshot_op`, when needed.
    pub snapshot: Option<Vec<u8>>,
    pub snapshot_op: OpNumber,
    pub log: Vec<LogEntry>,
    pub op_number: OpNumber,
    pub commit_number: OpNumber,
}

impl MessagePayload {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            MessagePayload::Prepare(_) => "prepare",
            MessagePayload::PrepareOk(_) => "prepare-ok",
            MessagePayload::Commit(_) => "commit",
            MessagePayload::Heartbeat(_) => "heartbeat",
            MessagePayload::StartViewChange(_) => "start-view-change",
            MessagePayload::DoViewChange(_) => "do-view-change",
            MessagePayload::StartView(_) => "start-view",
            MessagePayload::StateTransferRequest(_) => "state-transfer-request",
            MessagePayload::StateTransferResponse(_) => "state-transfer-response",
        }
    }
}
