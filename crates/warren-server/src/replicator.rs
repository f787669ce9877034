//! The replicator driver: the imperative shell around the pure replica.
//!
//! One event loop owns the replica, the store, and the write-ahead log.
//! Inputs: peer messages, the election timer (jittered), the leader
//! heartbeat timer, and client submissions. For every replica output the
//! loop persists appended entries, fsyncs and applies committed ones,
//! sends messages, and publishes leadership changes - in that order, so a
//! PrepareOk never leaves before its entry is durable and a submitter
//! never sees success before the commit marker is on disk.
//!
//! Durability note: an I/O failure on the log or a non-deterministic apply
//! failure is fatal - the process exits and recovers from snapshot + log
//! on restart rather than risk serving a corrupt store.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use warren_kernel::{Command, KernelError, apply_committed};
use warren_store::{CommandLog, Store, StoreState, load_latest_snapshot, write_snapshot};
use warren_types::{ApiError, ApiResult, ContainerId, NodeId, Timestamp};
use warren_vsr::{
    Leadership, LogEntry, Message, MessagePayload, OpNumber, Output, Replica, ReplicaId,
    SubmitError, VsrConfig,
};
use warren_wire::{WatchEvent, write_frame};

use crate::broker::Broker;
use crate::wal::{WalRecord, fold_records};
use crate::{Result, ServerError};

/// The leadership picture published to the rest of the process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaderInfo {
    pub view: u64,
    /// True when this node is the leader.
    pub is_self: bool,
    /// The leader's API address, for `Unavailable` hints and redirects.
    pub leader_api_addr: Option<String>,
}

enum ReplicatorRequest {
    Submit {
        command: Command,
        reply: oneshot::Sender<ApiResult<()>>,
    },
}

/// Cloneable handle for submitting commands into the replicated log.
#[derive(Clone)]
pub struct ReplicatorHandle {
    tx: mpsc::Sender<ReplicatorRequest>,
    leadership: watch::Receiver<LeaderInfo>,
}

impl ReplicatorHandle {
    /// Orders one command. Resolves once the command is committed and
    /// applied (or refused) - linearizable on the leader, `Unavailable`
    /// with a leader hint elsewhere.
    pub async fn submit(&self, command: Command) -> ApiResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ReplicatorRequest::Submit {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ApiError::unavailable("replicator stopped", None))?;
        reply_rx
            .await
            .map_err(|_| ApiError::unavailable("replicator stopped", None))?
    }

    pub fn leadership(&self) -> watch::Receiver<LeaderInfo> {
        self.leadership.clone()
    }
}

impl warren_controller::CommandSink for ReplicatorHandle {
    fn submit(&self, cmd: Command) -> impl Future<Output = ApiResult<()>> + Send {
        ReplicatorHandle::submit(self, cmd)
    }
}

/// Everything `spawn` hands back to the node assembly.
pub(crate) struct ReplicatorParts {
    pub handle: ReplicatorHandle,
    /// Where the peer listener forwards inbound consensus messages.
    pub inbound: mpsc::Sender<Message>,
    pub leadership: watch::Receiver<LeaderInfo>,
    pub join: tokio::task::JoinHandle<()>,
}

/// Static knobs of the replicator loop.
#[derive(Debug, Clone)]
pub(crate) struct ReplicatorConfig {
    pub replica_id: ReplicaId,
    pub vsr: VsrConfig,
    /// Consensus addresses, indexed by replica ID.
    pub peer_addrs: Vec<String>,
    /// API addresses, indexed by replica ID (leader hints).
    pub peer_api_addrs: Vec<String>,
    pub data_dir: PathBuf,
    pub election_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Entries applied between snapshots.
    pub snapshot_interval_entries: u64,
}

/// Recovers durable state and spawns the replicator loop.
pub(crate) fn spawn(
    config: ReplicatorConfig,
    store: Arc<Store>,
    broker: Arc<Broker>,
) -> Result<ReplicatorParts> {
    let (wal, replica) = recover(&config, &store)?;

    let (requests_tx, requests_rx) = mpsc::channel(256);
    let (inbound_tx, inbound_rx) = mpsc::channel(1024);
    let (leadership_tx, leadership_rx) = watch::channel(LeaderInfo::default());

    let peer_links = config
        .peer_addrs
        .iter()
        .enumerate()
        .map(|(idx, addr)| {
            if idx == usize::from(config.replica_id.as_u8()) {
                None
            } else {
                Some(spawn_peer_link(addr.clone()))
            }
        })
        .collect();

    let driver = Replicator {
        config,
        replica,
        store,
        wal,
        broker,
        peer_links,
        requests: requests_rx,
        inbound: inbound_rx,
        leadership: leadership_tx,
        pending: BTreeMap::new(),
        election_deadline: Instant::now(),
        entries_since_snapshot: 0,
    };

    let handle = ReplicatorHandle {
        tx: requests_tx,
        leadership: leadership_rx.clone(),
    };
    let join = tokio::spawn(driver.run());

    Ok(ReplicatorParts {
        handle,
        inbound: inbound_tx,
        leadership: leadership_rx,
        join,
    })
}

/// Restores store + log + replica from the data dir.
fn recover(config: &ReplicatorConfig, store: &Arc<Store>) -> Result<(CommandLog, Replica)> {
    let snapshot_state = match load_latest_snapshot(&config.data_dir)? {
        Some((state, manifest)) => {
            info!(applied_op = manifest.applied_op, "recovered store snapshot");
            state
        }
        None => StoreState::new(),
    };
    let snapshot_op = snapshot_state.applied_op();
    store.replace(snapshot_state);

    let wal = CommandLog::open(&config.data_dir)?;
    let recovered = fold_records(&wal.replay()?)?;
    let commit = recovered.commit.max(snapshot_op);

    // Replay the durably committed tail into the store.
    if commit > snapshot_op {
        for (&op, entry) in recovered.entries.range(snapshot_op + 1..=commit) {
            apply_one(store, entry).map_err(|e| {
                ServerError::Recovery(format!("replaying op {op}: {e}"))
            })?;
        }
    }
    if store.applied_op() != commit {
        return Err(ServerError::Recovery(format!(
            "log replay stopped at op {} short of commit {commit}",
            store.applied_op()
        )));
    }

    // The replica keeps the contiguous suffix above the snapshot point.
    let mut log = Vec::new();
    let mut expect = snapshot_op + 1;
    for (&op, entry) in recovered.entries.range(snapshot_op + 1..) {
        if op != expect {
            return Err(ServerError::Recovery(format!(
                "log gap at op {expect} (found {op})"
            )));
        }
        log.push(entry.clone());
        expect += 1;
    }

    info!(
        snapshot_op,
        commit,
        tail = log.len(),
        "replica state recovered"
    );
    Ok((
        wal,
        Replica::recover(
            config.replica_id,
            config.vsr,
            OpNumber::new(snapshot_op),
            OpNumber::new(commit),
            log,
        ),
    ))
}

/// Applies one committed entry inside a store transaction. Deterministic
/// command failures still advance the applied mark (a failed command is a
/// consumed log position); anything else is fatal.
fn apply_one(store: &Store, entry: &LogEntry) -> Result<ApiResult<()>> {
    let op = entry.op.as_u64();
    let result = store.transaction(|txn| {
        apply_committed(txn, entry.command.clone(), entry.timestamp)?;
        txn.set_applied_op(op);
        Ok::<(), KernelError>(())
    });
    match result {
        Ok(()) => Ok(Ok(())),
        Err(KernelError::Store(inner)) if !inner.is_deterministic() => {
            Err(ServerError::Store(inner))
        }
        Err(deterministic) => {
            // The command's writes were discarded; record the position.
            store
                .transaction(|txn| {
                    txn.set_applied_op(op);
                    Ok::<(), warren_store::StoreError>(())
                })
                .map_err(ServerError::Store)?;
            Ok(Err(deterministic.into()))
        }
    }
}

// ============================================================================
// The loop
// ============================================================================

struct Replicator {
    config: ReplicatorConfig,
    replica: Replica,
    store: Arc<Store>,
    wal: CommandLog,
    broker: Arc<Broker>,
    peer_links: Vec<Option<mpsc::Sender<Message>>>,
    requests: mpsc::Receiver<ReplicatorRequest>,
    inbound: mpsc::Receiver<Message>,
    leadership: watch::Sender<LeaderInfo>,
    /// Submitters waiting for their op to commit.
    pending: BTreeMap<u64, oneshot::Sender<ApiResult<()>>>,
    election_deadline: Instant,
    entries_since_snapshot: u64,
}

impl Replicator {
    async fn run(mut self) {
        let mut heartbeat = tokio::time::interval(Duration::from_millis(
            self.config.heartbeat_timeout_ms.max(50),
        ));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // A generous first deadline: peers are still binding listeners and
        // dialing links, and a cold-start election storm helps nobody.
        self.arm_election_scaled(3);
        self.publish_leadership(self.replica.current_leadership());

        loop {
            tokio::select! {
                Some(msg) = self.inbound.recv() => {
                    let out = self.replica.on_message(msg);
                    self.handle_output(out);
                }
                Some(req) = self.requests.recv() => self.on_request(req),
                _ = heartbeat.tick() => {
                    let out = self.replica.on_heartbeat_timeout();
                    self.handle_output(out);
                }
                () = tokio::time::sleep_until(self.election_deadline) => {
                    let out = self.replica.on_election_timeout();
                    self.arm_election();
                    self.handle_output(out);
                }
                else => {
                    info!("replicator channels closed, stopping");
                    return;
                }
            }
        }
    }

    fn on_request(&mut self, req: ReplicatorRequest) {
        match req {
            ReplicatorRequest::Submit { command, reply } => {
                let (result, out) = self.replica.submit(command, Timestamp::now());
                match result {
                    Ok(op) => {
                        // Resolved when the op commits (possibly within
                        // this same output for a solo cluster).
                        self.pending.insert(op.as_u64(), reply);
                    }
                    Err(SubmitError::NotLeader { leader }) => {
                        let hint = leader
                            .and_then(|l| self.config.peer_api_addrs.get(usize::from(l.as_u8())))
                            .cloned();
                        let _ = reply.send(Err(ApiError::unavailable("not the leader", hint)));
                    }
                }
                self.handle_output(out);
            }
        }
    }

    /// Executes one replica output. Order matters; see the module docs.
    fn handle_output(&mut self, out: Output) {
        if out.is_empty() {
            return;
        }

        // 1. Persist appended entries.
        let must_sync = !out.appended.is_empty() || !out.committed.is_empty();
        for entry in &out.appended {
            let record = match WalRecord::from_entry(entry).and_then(|r| r.encode()) {
                Ok(bytes) => bytes,
                Err(err) => self.fatal(&format!("encoding log entry: {err}")),
            };
            if let Err(err) = self.wal.append(&record) {
                self.fatal(&format!("appending to log: {err}"));
            }
        }

        // 2. Install a transferred snapshot before applying past it.
        if let Some(install) = &out.install_snapshot {
            match StoreState::decode(&install.data) {
                Ok(state) => {
                    info!(snapshot_op = %install.snapshot_op, "installing transferred snapshot");
                    if let Err(err) = write_snapshot(&self.config.data_dir, &state) {
                        self.fatal(&format!("persisting transferred snapshot: {err}"));
                    }
                    self.store.replace(state);
                    if let Err(err) = self.wal.rotate(install.snapshot_op.as_u64() + 1) {
                        warn!(%err, "log rotation after snapshot install failed");
                    }
                }
                Err(err) => self.fatal(&format!("decoding transferred snapshot: {err}")),
            }
        }

        // 3. Commit marker, fsync, then apply.
        if let Some(last) = out.committed.last() {
            let marker = WalRecord::Commit {
                op: last.op.as_u64(),
            };
            match marker.encode() {
                Ok(bytes) => {
                    if let Err(err) = self.wal.append(&bytes) {
                        self.fatal(&format!("appending commit marker: {err}"));
                    }
                }
                Err(err) => self.fatal(&format!("encoding commit marker: {err}")),
            }
        }
        if must_sync {
            if let Err(err) = self.wal.sync() {
                self.fatal(&format!("log fsync: {err}"));
            }
        }
        for entry in &out.committed {
            self.apply_entry(entry);
        }
        if self.entries_since_snapshot >= self.config.snapshot_interval_entries.max(1) {
            self.take_snapshot();
        }

        // 4. A peer fell below our compaction horizon: answer with a full
        // store snapshot plus the log suffix.
        if let Some((peer, from_op)) = out.snapshot_request {
            debug!(%peer, %from_op, "serving snapshot state transfer");
            let state = self.store.view();
            let applied = state.applied_op();
            match state.encode() {
                Ok(bytes) => {
                    let response = self
                        .replica
                        .compose_state_transfer(Some(bytes), OpNumber::new(applied));
                    self.send(Message::targeted(
                        self.replica.id(),
                        peer,
                        MessagePayload::StateTransferResponse(response),
                    ));
                }
                Err(err) => self.fatal(&format!("encoding snapshot for transfer: {err}")),
            }
        }

        // 5. Send protocol messages.
        for msg in out.messages {
            self.send(msg);
        }

        // 6. Evidence of a live leader re-arms the election timer.
        if out.reset_election_timer {
            self.arm_election();
        }

        // 7. Leadership changes gate the control loops and pending waits.
        if let Some(leadership) = out.leadership {
            self.publish_leadership(leadership);
        }
    }

    fn apply_entry(&mut self, entry: &LogEntry) {
        let applied = self.store.applied_op();
        let op = entry.op.as_u64();
        if op <= applied {
            return; // replayed after a view change; already in the store
        }
        if op != applied + 1 {
            // A state transfer is in flight; the snapshot will bridge this.
            debug!(op, applied, "holding apply until the gap closes");
            return;
        }

        let affected = affected_containers(&entry.command, &self.store);
        let outcome = match apply_one(&self.store, entry) {
            Ok(outcome) => outcome,
            Err(err) => self.fatal(&format!("apply at op {op}: {err}")),
        };
        self.entries_since_snapshot += 1;

        self.publish_watch_events(&affected);
        if let Some(reply) = self.pending.remove(&op) {
            let _ = reply.send(outcome);
        }
    }

    fn take_snapshot(&mut self) {
        let state = self.store.view();
        match write_snapshot(&self.config.data_dir, &state) {
            Ok(manifest) => {
                if let Err(err) = self.wal.rotate(manifest.applied_op + 1) {
                    warn!(%err, "log rotation after snapshot failed");
                }
                self.replica.compact_to(OpNumber::new(manifest.applied_op));
                self.entries_since_snapshot = 0;
            }
            Err(err) => {
                // Not fatal: the log still covers everything.
                warn!(%err, "snapshot failed, retrying next interval");
            }
        }
    }

    fn send(&self, msg: Message) {
        let forward = |link: &Option<mpsc::Sender<Message>>, msg: Message| {
            if let Some(tx) = link {
                // Consensus tolerates loss; a full link drops the message.
                let _ = tx.try_send(msg);
            }
        };
        match msg.to {
            Some(to) => forward(self.peer_links.get(usize::from(to.as_u8())).unwrap_or(&None), msg),
            None => {
                for link in &self.peer_links {
                    forward(link, msg.clone());
                }
            }
        }
    }

    fn arm_election(&mut self) {
        self.arm_election_scaled(1);
    }

    fn arm_election_scaled(&mut self, scale: u64) {
        let base = self.config.election_timeout_ms.max(10) * scale;
        let jitter = rand::thread_rng().gen_range(0..base);
        self.election_deadline = Instant::now() + Duration::from_millis(base + jitter);
    }

    fn publish_leadership(&mut self, leadership: Leadership) {
        if !leadership.is_self {
            // A demoted leader abandons its in-flight submissions; the new
            // leader's state decides their fate and callers retry.
            let hint = leadership
                .leader
                .and_then(|l| self.config.peer_api_addrs.get(usize::from(l.as_u8())))
                .cloned();
            for (_, reply) in std::mem::take(&mut self.pending) {
                let _ = reply.send(Err(ApiError::unavailable(
                    "leadership lost before commit",
                    hint.clone(),
                )));
            }
        }
        let info = LeaderInfo {
            view: leadership.view.as_u64(),
            is_self: leadership.is_self,
            leader_api_addr: leadership
                .leader
                .and_then(|l| self.config.peer_api_addrs.get(usize::from(l.as_u8())))
                .cloned(),
        };
        if *self.leadership.borrow() != info {
            info!(view = info.view, is_self = info.is_self, "leadership changed");
        }
        let _ = self.leadership.send_replace(info);
    }

    fn fatal(&self, what: &str) -> ! {
        error!(what, "fatal replicator error, exiting for recovery");
        std::process::exit(1);
    }

    fn publish_watch_events(&self, affected: &[(ContainerId, NodeId)]) {
        for (id, node) in affected {
            let event = self.store.with_read(|s| {
                s.container(id)
                    .map(|c| WatchEvent::Updated(c.clone()))
                    .unwrap_or_else(|| WatchEvent::Deleted(id.clone()))
            });
            self.broker.publish(node, &event);
        }
    }
}

/// The containers (and their nodes) a command may touch, computed against
/// the pre-apply store so deletions can still be routed.
fn affected_containers(command: &Command, store: &Store) -> Vec<(ContainerId, NodeId)> {
    store.with_read(|view| match command {
        Command::CreateContainer { container } => {
            vec![(container.id.clone(), container.node_id.clone())]
        }
        Command::UpdateContainerDesired { id, .. }
        | Command::RestartContainer { id, .. }
        | Command::MarkContainerShutdown { id }
        | Command::DeleteContainer { id } => view
            .container(id)
            .map(|c| vec![(c.id.clone(), c.node_id.clone())])
            .unwrap_or_default(),
        Command::Heartbeat { task_statuses, .. } => task_statuses
            .iter()
            .filter_map(|s| {
                view.container(&s.container_id)
                    .map(|c| (c.id.clone(), c.node_id.clone()))
            })
            .collect(),
        Command::DeleteService { id }
        | Command::RollbackService { id }
        | Command::FinalizeBlueGreen { primary_id: id, .. }
        | Command::RevertBlueGreen { primary_id: id, .. } => {
            let mut affected: Vec<(ContainerId, NodeId)> = view
                .containers_of_service(id)
                .into_iter()
                .map(|c| (c.id.clone(), c.node_id.clone()))
                .collect();
            if let Some(shadow) = view.shadow_of(id) {
                affected.extend(
                    view.containers_of_service(&shadow.id)
                        .into_iter()
                        .map(|c| (c.id.clone(), c.node_id.clone())),
                );
            }
            affected
        }
        Command::RemoveNode { id } => view
            .containers_on_node(id)
            .into_iter()
            .map(|c| (c.id.clone(), c.node_id.clone()))
            .collect(),
        _ => Vec::new(),
    })
}

// ============================================================================
// Peer links
// ============================================================================

/// One persistent outbound connection per peer, reconnecting with backoff.
/// Messages queued while disconnected are discarded - the protocol repairs
/// gaps itself.
fn spawn_peer_link(addr: String) -> mpsc::Sender<Message> {
    let (tx, mut rx) = mpsc::channel::<Message>(1024);
    tokio::spawn(async move {
        loop {
            match TcpStream::connect(&addr).await {
                Ok(mut stream) => loop {
                    match rx.recv().await {
                        Some(msg) => {
                            if write_frame(&mut stream, &msg).await.is_err() {
                                debug!(%addr, "peer link broken, reconnecting");
                                break;
                            }
                        }
                        None => return, // replicator gone
                    }
                },
                Err(_) => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    // Drop whatever piled up while the peer was away.
                    while rx.try_recv().is_ok() {}
                    if rx.is_closed() {
                        return;
                    }
                }
            }
        }
    });
    tx
}
