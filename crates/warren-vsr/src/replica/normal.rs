//! Normal operation: submit, prepare, ack, commit.

use tracing::{debug, trace};
use warren_kernel::Command;
use warren_types::Timestamp;

use crate::message::{Commit, Heartbeat, Message, MessagePayload, Prepare, PrepareOk};
use crate::types::{LogEntry, OpNumber, ReplicaId, ReplicaStatus, ViewNumber};

use super::{Output, Replica, SubmitError};

impl Replica {
    /// Leader-only: order a command into the log.
    ///
    /// On success the entry is appended locally and broadcast; the returned
    /// op number commits once a quorum acknowledges. Non-leaders refuse
    /// with the current leader as a hint.
    pub fn submit(
        &mut self,
        command: Command,
        timestamp: Timestamp,
    ) -> (Result<OpNumber, SubmitError>, Output) {
        if !self.is_leader() {
            return (
                Err(SubmitError::NotLeader {
                    leader: self.leader_hint().filter(|l| *l != self.id),
                }),
                Output::default(),
            );
        }

        let op = self.op_number.next();
        let entry = LogEntry {
            op,
            view: self.view,
            timestamp,
            command,
        };
        self.op_number = op;
        self.log.push(entry.clone());
        self.prepare_oks
            .entry(op)
            .or_default()
            .insert(self.id);

        let mut out = Output {
            appended: vec![entry.clone()],
            ..Output::default()
        };
        if !self.config.is_solo() {
            out.messages.push(Message::broadcast(
                self.id,
                MessagePayload::Prepare(Prepare {
                    view: self.view,
                    entry,
                    commit_number: self.commit_number,
                }),
            ));
        }
        // Solo clusters commit on their own ack.
        self.try_advance_commit(&mut out);
        (Ok(op), out)
    }

    /// Leader-only: periodic heartbeat carrying the commit point.
    pub fn on_heartbeat_timeout(&mut self) -> Output {
        let mut out = Output::default();
        if self.is_leader() && !self.config.is_solo() {
            out.messages.push(Message::broadcast(
                self.id,
                MessagePayload::Heartbeat(Heartbeat {
                    view: self.view,
                    commit_number: self.commit_number,
                }),
            ));
        }
        out
    }

    pub(super) fn on_prepare(&mut self, from: ReplicaId, prepare: Prepare) -> Output {
        let mut out = Output::default();
        if prepare.view < self.view {
            return out; // stale leader
        }
        if prepare.view > self.view || self.status != ReplicaStatus::Normal {
            // A view advanced without us; catch up from whoever is ahead.
            // Our uncommitted tail may be dead, so ask from the commit point.
            let from_op = self.commit_number.next();
            self.request_state_transfer(from, from_op, &mut out);
            return out;
        }

        out.reset_election_timer = true;
        let expected = self.op_number.next();
        if prepare.entry.op == expected {
            self.op_number = prepare.entry.op;
            out.appended.push(prepare.entry.clone());
            self.log.push(prepare.entry);
            out.messages.push(Message::targeted(
                self.id,
                from,
                MessagePayload::PrepareOk(PrepareOk {
                    view: self.view,
                    op_number: self.op_number,
                }),
            ));
        } else if prepare.entry.op <= self.op_number {
            // Duplicate delivery: re-acknowledge.
            out.messages.push(Message::targeted(
                self.id,
                from,
                MessagePayload::PrepareOk(PrepareOk {
                    view: self.view,
                    op_number: prepare.entry.op,
                }),
            ));
        } else {
            // Gap: we missed at least one Prepare.
            debug!(
                replica = %self.id,
                have = %self.op_number,
                got = %prepare.entry.op,
                "prepare gap, requesting state transfer"
            );
            let from_op = self.op_number.next();
            self.request_state_transfer(from, from_op, &mut out);
            return out;
        }

        self.advance_commit_to(prepare.commit_number, &mut out);
        out
    }

    pub(super) fn on_prepare_ok(&mut self, from: ReplicaId, ack: PrepareOk) -> Output {
        let mut out = Output::default();
        if ack.view != self.view || !self.is_leader() {
            return out;
        }
        if ack.op_number <= self.commit_number {
            return out; // already committed
        }
        self.prepare_oks
            .entry(ack.op_number)
            .or_default()
            .insert(from);
        self.try_advance_commit(&mut out);
        out
    }

    /// Commit or Heartbeat from the leader: advance our commit point.
    pub(super) fn on_commit_point(
        &mut self,
        from: ReplicaId,
        view: ViewNumber,
        commit_number: OpNumber,
    ) -> Output {
        let mut out = Output::default();
        if view < self.view {
            return out;
        }
        if view > self.view || self.status != ReplicaStatus::Normal {
            let from_op = self.commit_number.next();
            self.request_state_transfer(from, from_op, &mut out);
            return out;
        }
        out.reset_election_timer = true;
        if commit_number > self.op_number {
            // The leader has committed entries we never received.
            let from_op = self.op_number.next();
            self.request_state_transfer(from, from_op, &mut out);
        }
        self.advance_commit_to(commit_number, &mut out);
        out
    }

    /// Leader-side: advance the commit point over quorum-acked ops.
    pub(super) fn try_advance_commit(&mut self, out: &mut Output) {
        let quorum = self.config.quorum();
        let mut advanced = false;
        loop {
            let next = self.commit_number.next();
            if next > self.op_number {
                break;
            }
            let acked = self
                .prepare_oks
                .get(&next)
                .is_some_and(|acks| acks.len() >= quorum);
            if !acked {
                break;
            }
            self.commit_number = next;
            advanced = true;
            if let Some(entry) = self.entry_at(next) {
                out.committed.push(entry.clone());
            }
            self.prepare_oks.remove(&next);
        }
        if advanced {
            trace!(replica = %self.id, commit = %self.commit_number, "commit advanced");
            if self.is_leader() && !self.config.is_solo() {
                out.messages.push(Message::broadcast(
                    self.id,
                    MessagePayload::Commit(Commit {
                        view: self.view,
                        commit_number: self.commit_number,
                    }),
                ));
            }
        }
    }

    /// Backup-side: move the commit point toward the leader's, bounded by
    /// what we actually hold.
    pub(super) fn advance_commit_to(&mut self, target: OpNumber, out: &mut Output) {
        let target = target.min(self.op_number);
        while self.commit_number < target {
            let next = self.commit_number.next();
            let Some(entry) = self.entry_at(next) else {
                break;
            };
            out.committed.push(entry.clone());
            self.commit_number = next;
        }
    }
}
