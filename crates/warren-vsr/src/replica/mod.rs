//! The replica state machine.
//!
//! Pure and deterministic: every method consumes an input (message, timeout,
//! submission) and returns an [`Output`] describing what the driver must do
//! - send messages, persist and apply committed entries, react to
//! leadership changes. The replica never touches sockets, disks, clocks, or
//! randomness.
//!
//! # Driver contract
//!
//! For every [`Output`], in this order:
//! 1. Persist `appended` entries to the durable log.
//! 2. If `install_snapshot` is set, restore the store from it.
//! 3. Apply `committed` entries to the store, in order, skipping ops at or
//!    below the store's applied mark.
//! 4. Send `messages`.
//! 5. If `reset_election_timer`, re-arm the election timer with jitter.
//! 6. If `leadership` is set, start/stop the leader-only loops.

mod normal;
mod state_transfer;
mod view_change;

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::config::VsrConfig;
use crate::message::{DoViewChange, Message, MessagePayload, StateTransferResponse};
use crate::types::{LogEntry, OpNumber, ReplicaId, ReplicaStatus, ViewNumber};

// ============================================================================
// Output
// ============================================================================

/// A leadership transition as observed by this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leadership {
    pub view: ViewNumber,
    /// `None` while a view change is in flight.
    pub leader: Option<ReplicaId>,
    /// True if this replica is now the leader.
    pub is_self: bool,
}

/// Store snapshot handed over by a state transfer; the driver restores it
/// before applying any further committed entries.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallSnapshot {
    pub data: Vec<u8>,
    pub snapshot_op: OpNumber,
}

/// Everything a single state-machine step asks of the driver.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Output {
    /// Messages to send to peers.
    pub messages: Vec<Message>,
    /// Entries newly appended to the in-memory log; persist before sending
    /// `messages` (a PrepareOk promises local persistence).
    pub appended: Vec<LogEntry>,
    /// Newly committed entries, in op order. Apply to the store, skipping
    /// ops the store already has.
    pub committed: Vec<LogEntry>,
    /// Set when the view or leader changed.
    pub leadership: Option<Leadership>,
    /// Evidence of a live leader arrived; re-arm the election timer.
    pub reset_election_timer: bool,
    /// A peer needs entries below our compaction horizon; the driver builds
    /// a [`StateTransferResponse`] with a store snapshot and sends it.
    pub snapshot_request: Option<(ReplicaId, OpNumber)>,
    /// Restore the store from this snapshot before applying `committed`.
    pub install_snapshot: Option<InstallSnapshot>,
}

impl Output {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.appended.is_empty()
            && self.committed.is_empty()
            && self.leadership.is_none()
            && !self.reset_election_timer
            && self.snapshot_request.is_none()
            && self.install_snapshot.is_none()
    }

    pub fn merge(&mut self, other: Output) {
        self.messages.extend(other.messages);
        self.appended.extend(other.appended);
        self.committed.extend(other.committed);
        if other.leadership.is_some() {
            self.leadership = other.leadership;
        }
        self.reset_election_timer |= other.reset_election_timer;
        if other.snapshot_request.is_some() {
            self.snapshot_request = other.snapshot_request;
        }
        if other.install_snapshot.is_some() {
            self.install_snapshot = other.install_snapshot;
        }
    }
}

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("not the leader")]
    NotLeader {
        /// The current leader, when one is known.
        leader: Option<ReplicaId>,
    },
}

// ============================================================================
// Replica
// ============================================================================

/// A VSR replica.
///
/// The in-memory log is a contiguous suffix: ops `snapshot_op + 1 ..=
/// op_number`. Everything at or below `snapshot_op` lives only in the
/// store snapshot.
#[derive(Debug, Clone)]
pub struct Replica {
    pub(crate) id: ReplicaId,
    pub(crate) config: VsrConfig,

    // View state
    pub(crate) view: ViewNumber,
    pub(crate) status: ReplicaStatus,
    pub(crate) last_normal_view: ViewNumber,

    // Log state
    pub(crate) log: Vec<LogEntry>,
    pub(crate) snapshot_op: OpNumber,
    pub(crate) op_number: OpNumber,
    pub(crate) commit_number: OpNumber,

    // Leader bookkeeping: acks per uncommitted op.
    pub(crate) prepare_oks: BTreeMap<OpNumber, BTreeSet<ReplicaId>>,

    // View-change bookkeeping.
    pub(crate) svc_votes: BTreeMap<ViewNumber, BTreeSet<ReplicaId>>,
    pub(crate) dvc_msgs: BTreeMap<ViewNumber, BTreeMap<ReplicaId, DoViewChange>>,
    pub(crate) sent_dvc_for: Option<ViewNumber>,

    // One state transfer in flight at a time.
    pub(crate) awaiting_state_transfer: bool,
}

impl Replica {
    /// A fresh replica at view 0.
    pub fn new(id: ReplicaId, config: VsrConfig) -> Self {
        Self {
            id,
            config,
            view: ViewNumber::ZERO,
            status: ReplicaStatus::Normal,
            last_normal_view: ViewNumber::ZERO,
            log: Vec::new(),
            snapshot_op: OpNumber::ZERO,
            op_number: OpNumber::ZERO,
            commit_number: OpNumber::ZERO,
            prepare_oks: BTreeMap::new(),
            svc_votes: BTreeMap::new(),
            dvc_msgs: BTreeMap::new(),
            sent_dvc_for: None,
            awaiting_state_transfer: false,
        }
    }

    /// Rebuilds a replica from recovered durable state: the snapshot
    /// boundary, the highest durably committed op, and the log suffix read
    /// back from the write-ahead log (deduplicated, in op order).
    pub fn recover(
        id: ReplicaId,
        config: VsrConfig,
        snapshot_op: OpNumber,
        commit_number: OpNumber,
        log: Vec<LogEntry>,
    ) -> Self {
        let op_number = log.last().map_or(snapshot_op, |e| e.op);
        debug_assert!(commit_number >= snapshot_op);
        debug_assert!(op_number >= commit_number || log.is_empty());
        let view = log.last().map_or(ViewNumber::ZERO, |e| e.view);
        Self {
            view,
            last_normal_view: view,
            log,
            snapshot_op,
            op_number,
            commit_number,
            ..Self::new(id, config)
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn status(&self) -> ReplicaStatus {
        self.status
    }

    pub fn op_number(&self) -> OpNumber {
        self.op_number
    }

    pub fn commit_number(&self) -> OpNumber {
        self.commit_number
    }

    pub fn snapshot_op(&self) -> OpNumber {
        self.snapshot_op
    }

    pub fn is_leader(&self) -> bool {
        self.status == ReplicaStatus::Normal && self.config.leader_of(self.view) == self.id
    }

    /// The current leader, if normal operation is established.
    pub fn leader_hint(&self) -> Option<ReplicaId> {
        match self.status {
            ReplicaStatus::Normal => Some(self.config.leader_of(self.view)),
            ReplicaStatus::ViewChange => None,
        }
    }

    /// The leadership picture right now (used by the driver at startup).
    pub fn current_leadership(&self) -> Leadership {
        Leadership {
            view: self.view,
            leader: self.leader_hint(),
            is_self: self.is_leader(),
        }
    }

    /// The log entry at `op`, if above the compaction horizon.
    pub(crate) fn entry_at(&self, op: OpNumber) -> Option<&LogEntry> {
        if op <= self.snapshot_op || op > self.op_number {
            return None;
        }
        let idx = (op.as_u64() - self.snapshot_op.as_u64() - 1) as usize;
        self.log.get(idx)
    }

    /// Clones the log suffix starting at `from` (inclusive).
    pub fn log_suffix_from(&self, from: OpNumber) -> Vec<LogEntry> {
        self.log.iter().filter(|e| e.op >= from).cloned().collect()
    }

    /// Drops log entries at or below `op` after the driver has durably
    /// snapshotted the store at that point. Only committed entries compact.
    pub fn compact_to(&mut self, op: OpNumber) {
        let op = op.min(self.commit_number);
        if op <= self.snapshot_op {
            return;
        }
        self.log.retain(|e| e.op > op);
        self.snapshot_op = op;
        trace!(replica = %self.id, to = %op, "compacted log");
    }

    /// Builds a state-transfer response for a peer. `snapshot` covers ops
    /// up to `snapshot_op`; the log suffix above it comes from memory.
    pub fn compose_state_transfer(
        &self,
        snapshot: Option<Vec<u8>>,
        snapshot_op: OpNumber,
    ) -> StateTransferResponse {
        StateTransferResponse {
            view: self.view,
            snapshot,
            snapshot_op,
            log: self.log_suffix_from(snapshot_op.next()),
            op_number: self.op_number,
            commit_number: self.commit_number,
        }
    }

    // ========================================================================
    // Event dispatch
    // ========================================================================

    /// Processes one incoming protocol message.
    pub fn on_message(&mut self, msg: Message) -> Output {
        trace!(replica = %self.id, from = %msg.from, kind = msg.payload.name(), "message");
        let from = msg.from;
        match msg.payload {
            MessagePayload::Prepare(p) => self.on_prepare(from, p),
            MessagePayload::PrepareOk(p) => self.on_prepare_ok(from, p),
            MessagePayload::Commit(c) => self.on_commit_point(from, c.view, c.commit_number),
            MessagePayload::Heartbeat(h) => self.on_commit_point(from, h.view, h.commit_number),
            MessagePayload::StartViewChange(m) => self.on_start_view_change(from, m),
            MessagePayload::DoViewChange(m) => self.on_do_view_change(from, m),
            MessagePayload::StartView(m) => self.on_start_view(from, m),
            MessagePayload::StateTransferRequest(m) => self.on_state_transfer_request(from, m),
            MessagePayload::StateTransferResponse(m) => self.on_state_transfer_response(from, m),
        }
    }
}
