//! Snapshot-based catch-up for replicas behind the log or its compaction
//! horizon.

use tracing::{debug, warn};

use crate::message::{
    Message, MessagePayload, PrepareOk, StateTransferRequest, StateTransferResponse,
};
use crate::types::{OpNumber, ReplicaId, ReplicaStatus};

use super::{InstallSnapshot, Leadership, Output, Replica};

impl Replica {
    /// Asks `peer` for entries from `from_op` onward. Within the current
    /// view that is everything past our log tail; across views it must be
    /// everything past our *commit* point, because an uncommitted tail from
    /// a dead view cannot be trusted. At most one transfer is kept in
    /// flight; the flag clears on response or view change.
    pub(super) fn request_state_transfer(
        &mut self,
        peer: ReplicaId,
        from_op: OpNumber,
        out: &mut Output,
    ) {
        if self.awaiting_state_transfer {
            return;
        }
        self.awaiting_state_transfer = true;
        debug!(replica = %self.id, %peer, %from_op, "requesting state transfer");
        out.messages.push(Message::targeted(
            self.id,
            peer,
            MessagePayload::StateTransferRequest(StateTransferRequest { from_op }),
        ));
    }

    pub(super) fn on_state_transfer_request(
        &mut self,
        from: ReplicaId,
        req: StateTransferRequest,
    ) -> Output {
        let mut out = Output::default();
        if self.status != ReplicaStatus::Normal {
            return out; // can't serve authoritative state mid-election
        }
        if req.from_op > self.snapshot_op {
            // Serve purely from the in-memory log.
            let baseline = OpNumber::new(req.from_op.as_u64().saturating_sub(1));
            let response = self.compose_state_transfer(None, baseline);
            out.messages.push(Message::targeted(
                self.id,
                from,
                MessagePayload::StateTransferResponse(response),
            ));
        } else {
            // The requested range is compacted; the driver attaches a store
            // snapshot and sends the response.
            out.snapshot_request = Some((from, req.from_op));
        }
        out
    }

    pub(super) fn on_state_transfer_response(
        &mut self,
        _from: ReplicaId,
        resp: StateTransferResponse,
    ) -> Output {
        let mut out = Output::default();
        if resp.view < self.view {
            return out; // stale
        }
        self.awaiting_state_transfer = false;
        out.reset_election_timer = true;

        if resp.view > self.view {
            self.view = resp.view;
            self.status = ReplicaStatus::Normal;
            self.last_normal_view = resp.view;
            self.sent_dvc_for = None;
            self.prepare_oks.clear();
            // Whatever we appended beyond our commit point belongs to a dead
            // view; the authoritative log may disagree with it.
            self.log.retain(|e| e.op <= self.commit_number);
            self.op_number = self.commit_number;
            out.leadership = Some(Leadership {
                view: resp.view,
                leader: Some(self.config.leader_of(resp.view)),
                is_self: false,
            });
        }

        let old_commit = self.commit_number;
        if let Some(data) = resp.snapshot {
            // Wholesale adoption: snapshot plus suffix replaces our state.
            if resp.commit_number < self.commit_number {
                warn!(replica = %self.id, "state transfer would rewind commit point, ignoring");
                return out;
            }
            self.log = resp.log;
            self.snapshot_op = resp.snapshot_op;
            self.op_number = resp.op_number;
            self.commit_number = resp.commit_number;
            out.install_snapshot = Some(InstallSnapshot {
                data,
                snapshot_op: resp.snapshot_op,
            });
            out.appended = self.log.clone();
            out.committed = self
                .log
                .iter()
                .filter(|e| e.op <= self.commit_number)
                .cloned()
                .collect();
        } else {
            // Entries only: splice onto our log, replacing any divergent
            // uncommitted tail.
            for entry in resp.log {
                if entry.op <= self.snapshot_op {
                    continue;
                }
                if entry.op <= self.op_number {
                    if self.entry_at(entry.op) != Some(&entry) {
                        // Uncommitted tail from a dead view; cut it off.
                        debug_assert!(entry.op > self.commit_number);
                        self.log.retain(|e| e.op < entry.op);
                        self.op_number = entry.op;
                        out.appended.push(entry.clone());
                        self.log.push(entry);
                    }
                } else if entry.op == self.op_number.next() {
                    self.op_number = entry.op;
                    out.appended.push(entry.clone());
                    self.log.push(entry);
                } else {
                    warn!(replica = %self.id, op = %entry.op, "gap inside state transfer response");
                    break;
                }
            }
            self.advance_commit_to(resp.commit_number, &mut out);
        }

        // Acknowledge what we now hold so the leader can keep committing.
        let leader = self.config.leader_of(self.view);
        if leader != self.id {
            let mut ack = old_commit.max(self.commit_number);
            while ack < self.op_number {
                ack = ack.next();
                out.messages.push(Message::targeted(
                    self.id,
                    leader,
                    MessagePayload::PrepareOk(PrepareOk {
                        view: self.view,
                        op_number: ack,
                    }),
                ));
            }
        }
        out
    }
}
