//! View changes: electing a new leader when the current one goes quiet.

use tracing::{debug, info};

use crate::message::{
    DoViewChange, Message, MessagePayload, PrepareOk, StartView, StartViewChange,
};
use crate::types::{ReplicaId, ReplicaStatus, ViewNumber};

use super::{Leadership, Output, Replica};

impl Replica {
    /// The election timer fired without evidence of a live leader.
    pub fn on_election_timeout(&mut self) -> Output {
        if self.config.is_solo() {
            return Output::default();
        }
        if self.status == ReplicaStatus::Normal && self.is_leader() {
            // The leader's own election timer is a no-op; its authority is
            // bounded by quorum, not by timers.
            return Output::default();
        }
        let candidate = self.view.next();
        debug!(replica = %self.id, %candidate, "election timeout, starting view change");
        self.start_view_change(candidate)
    }

    pub(super) fn start_view_change(&mut self, candidate: ViewNumber) -> Output {
        self.view = candidate;
        self.status = ReplicaStatus::ViewChange;
        self.sent_dvc_for = None;
        self.awaiting_state_transfer = false;
        self.prepare_oks.clear();
        self.svc_votes.retain(|v, _| *v >= candidate);
        self.dvc_msgs.retain(|v, _| *v >= candidate);
        self.svc_votes
            .entry(candidate)
            .or_default()
            .insert(self.id);

        let mut out = Output {
            leadership: Some(Leadership {
                view: candidate,
                leader: None,
                is_self: false,
            }),
            ..Output::default()
        };
        out.messages.push(Message::broadcast(
            self.id,
            MessagePayload::StartViewChange(StartViewChange {
                new_view: candidate,
            }),
        ));
        self.maybe_send_do_view_change(candidate, &mut out);
        out
    }

    pub(super) fn on_start_view_change(
        &mut self,
        from: ReplicaId,
        msg: StartViewChange,
    ) -> Output {
        let mut out = Output::default();
        if msg.new_view < self.view
            || (msg.new_view == self.view && self.status == ReplicaStatus::Normal)
        {
            return out; // stale
        }
        if msg.new_view > self.view {
            out = self.start_view_change(msg.new_view);
        }
        if self.status == ReplicaStatus::ViewChange && msg.new_view == self.view {
            self.svc_votes
                .entry(msg.new_view)
                .or_default()
                .insert(from);
            self.maybe_send_do_view_change(msg.new_view, &mut out);
        }
        out
    }

    fn maybe_send_do_view_change(&mut self, view: ViewNumber, out: &mut Output) {
        let have_quorum = self
            .svc_votes
            .get(&view)
            .is_some_and(|votes| votes.len() >= self.config.quorum());
        if !have_quorum || self.sent_dvc_for == Some(view) {
            return;
        }
        self.sent_dvc_for = Some(view);

        let dvc = DoViewChange {
            new_view: view,
            last_normal_view: self.last_normal_view,
            log: self.log.clone(),
            snapshot_op: self.snapshot_op,
            op_number: self.op_number,
            commit_number: self.commit_number,
        };
        let leader = self.config.leader_of(view);
        if leader == self.id {
            self.record_do_view_change(self.id, dvc, out);
        } else {
            out.messages.push(Message::targeted(
                self.id,
                leader,
                MessagePayload::DoViewChange(dvc),
            ));
        }
    }

    pub(super) fn on_do_view_change(&mut self, from: ReplicaId, msg: DoViewChange) -> Output {
        let mut out = Output::default();
        if msg.new_view < self.view || self.config.leader_of(msg.new_view) != self.id {
            return out;
        }
        if msg.new_view > self.view {
            out = self.start_view_change(msg.new_view);
        }
        if self.status != ReplicaStatus::ViewChange || self.view != msg.new_view {
            return out; // already normal in this view
        }
        self.record_do_view_change(from, msg, &mut out);
        out
    }

    fn record_do_view_change(&mut self, from: ReplicaId, msg: DoViewChange, out: &mut Output) {
        let view = msg.new_view;
        let msgs = self.dvc_msgs.entry(view).or_default();
        msgs.insert(from, msg);
        if msgs.len() >= self.config.quorum() {
            self.finish_view_change(view, out);
        }
    }

    /// Quorum of DoViewChange collected: adopt the best log and lead.
    fn finish_view_change(&mut self, view: ViewNumber, out: &mut Output) {
        let msgs = self.dvc_msgs.remove(&view).expect("quorum just checked");

        // The authoritative log: highest last-normal view, then longest.
        let (donor, best) = msgs
            .iter()
            .max_by_key(|(_, m)| (m.last_normal_view, m.op_number))
            .map(|(id, m)| (*id, m.clone()))
            .expect("quorum is non-empty");

        let old_commit = self.commit_number;
        self.log = best.log;
        self.snapshot_op = best.snapshot_op;
        self.op_number = best.op_number;
        self.commit_number = old_commit
            .max(msgs.values().map(|m| m.commit_number).max().unwrap_or(old_commit));

        self.status = ReplicaStatus::Normal;
        self.last_normal_view = view;
        self.svc_votes.retain(|v, _| *v > view);
        self.sent_dvc_for = None;

        // The adopted tail counts as acked by us; backups re-ack via the
        // StartView below.
        self.prepare_oks.clear();
        for entry in self.log.iter().filter(|e| e.op > self.commit_number) {
            self.prepare_oks
                .entry(entry.op)
                .or_default()
                .insert(self.id);
        }

        info!(replica = %self.id, %view, op = %self.op_number, commit = %self.commit_number,
            "view change complete, assuming leadership");

        out.messages.push(Message::broadcast(
            self.id,
            MessagePayload::StartView(StartView {
                view,
                log: self.log.clone(),
                snapshot_op: self.snapshot_op,
                op_number: self.op_number,
                commit_number: self.commit_number,
            }),
        ));
        // Persist whatever the adopted log gave us that we did not have.
        out.appended = self.log_suffix_from(old_commit.next());
        // Re-emit the committed range; the driver skips what it already
        // applied. If the adopted log starts above our old applied point we
        // additionally need the donor's snapshot.
        out.committed = self
            .log
            .iter()
            .filter(|e| e.op <= self.commit_number)
            .cloned()
            .collect();
        if best.snapshot_op > old_commit && donor != self.id {
            self.request_state_transfer(donor, old_commit.next(), out);
        }
        out.leadership = Some(Leadership {
            view,
            leader: Some(self.id),
            is_self: true,
        });
        out.reset_election_timer = true;
    }

    pub(super) fn on_start_view(&mut self, from: ReplicaId, msg: StartView) -> Output {
        let mut out = Output::default();
        if msg.view < self.view
            || (msg.view == self.view && self.status == ReplicaStatus::Normal)
        {
            return out;
        }

        let old_commit = self.commit_number;
        self.view = msg.view;
        self.status = ReplicaStatus::Normal;
        self.last_normal_view = msg.view;
        self.log = msg.log;
        self.snapshot_op = msg.snapshot_op;
        self.op_number = msg.op_number;
        self.commit_number = old_commit.max(msg.commit_number);
        self.prepare_oks.clear();
        self.sent_dvc_for = None;
        self.awaiting_state_transfer = false;
        self.svc_votes.retain(|v, _| *v > msg.view);
        self.dvc_msgs.retain(|v, _| *v > msg.view);

        info!(replica = %self.id, view = %msg.view, leader = %from, "entering new view");

        out.appended = self.log_suffix_from(old_commit.next());
        out.committed = self
            .log
            .iter()
            .filter(|e| e.op <= self.commit_number)
            .cloned()
            .collect();
        if msg.snapshot_op > old_commit {
            // Our store predates the new log's horizon.
            self.request_state_transfer(from, old_commit.next(), &mut out);
        }
        // Acknowledge the uncommitted tail so the new leader can commit it.
        let mut ack = self.commit_number;
        while ack < self.op_number {
            ack = ack.next();
            out.messages.push(Message::targeted(
                self.id,
                from,
                MessagePayload::PrepareOk(PrepareOk {
                    view: self.view,
                    op_number: ack,
                }),
            ));
        }
        out.leadership = Some(Leadership {
            view: self.view,
            leader: Some(from),
            is_self: false,
        });
        out.reset_election_timer = true;
        out
    }
}
