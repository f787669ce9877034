//! The agent coordinator: registration, heartbeats, assignment sync, and
//! the local container map.
//!
//! The coordinator owns all local state; lifecycle tasks only report back
//! through the event channel. Every control-plane call is best-effort:
//! a partitioned agent keeps its containers running, keeps health-checking
//! them, and replays current statuses when the connection returns.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warren_crypto::ClusterKey;
use warren_types::{
    ActualState, Container, ContainerId, DesiredState, NodeId, NodeRole, Resources, TaskStatus,
};

use crate::client::ManagerClient;
use crate::runtime::{RunConfig, Runtime};
use crate::task::{TaskCommand, TaskEvent, run_container};
use crate::{secrets, volumes};

/// Per-node agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Manager API addresses to try, in order.
    pub managers: Vec<String>,
    /// Reuse a prior identity; `None` mints a fresh one on registration.
    pub node_id: Option<NodeId>,
    pub role: NodeRole,
    /// Address this agent is reachable at, reported on registration.
    pub address: String,
    pub capacity: Resources,
    pub labels: BTreeMap<String, String>,
    pub heartbeat_period_ms: u64,
    pub assignment_sync_period_ms: u64,
    /// Deadline for image pulls. Generous: pulls are slow, but a hung
    /// Runtime must still fail the container.
    pub pull_timeout_ms: u64,
    /// Backing directory for local-driver volumes.
    pub volumes_dir: PathBuf,
    /// tmpfs-backed directory for materialized secrets.
    pub secrets_dir: PathBuf,
    /// Required to run containers with secret refs.
    pub cluster_key: Option<ClusterKey>,
}

struct TaskHandle {
    command: watch::Sender<TaskCommand>,
    join: JoinHandle<()>,
    resources: Resources,
}

/// The worker agent. Generic over the Runtime so tests script the engine.
pub struct Agent<R: Runtime> {
    config: AgentConfig,
    runtime: Arc<R>,
    client: Arc<ManagerClient>,
    node_id: NodeId,
    tasks: HashMap<ContainerId, TaskHandle>,
    /// Latest observed status per container, replayed in heartbeats.
    latest: HashMap<ContainerId, TaskStatus>,
    events_tx: mpsc::Sender<TaskEvent>,
    events_rx: mpsc::Receiver<TaskEvent>,
}

impl<R: Runtime> Agent<R> {
    pub fn new(config: AgentConfig, runtime: R) -> Self {
        let client = Arc::new(ManagerClient::new(config.managers.clone()));
        let (events_tx, events_rx) = mpsc::channel(256);
        let node_id = config.node_id.clone().unwrap_or_default();
        Self {
            config,
            runtime: Arc::new(runtime),
            client,
            node_id,
            tasks: HashMap::new(),
            latest: HashMap::new(),
            events_tx,
            events_rx,
        }
    }

    /// Registers, then runs the heartbeat and sync loops forever.
    pub async fn run(mut self) -> crate::Result<()> {
        self.register().await;

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_period_ms.max(100)));
        let mut sync = tokio::time::interval(Duration::from_millis(
            self.config.assignment_sync_period_ms.max(100),
        ));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.on_event(event).await,
                _ = heartbeat.tick() => self.heartbeat().await,
                _ = sync.tick() => self.sync().await,
            }
        }
    }

    /// Registration retries forever; a worker without a control plane just
    /// keeps trying.
    async fn register(&mut self) {
        let mut backoff = Duration::from_secs(1);
        loop {
            match self
                .client
                .register_node(
                    self.config.node_id.clone(),
                    self.config.role,
                    self.config.address.clone(),
                    self.config.capacity,
                    self.config.labels.clone(),
                )
                .await
            {
                Ok(id) => {
                    info!(node = %id, "registered with control plane");
                    self.node_id = id;
                    return;
                }
                Err(err) => {
                    warn!(%err, ?backoff, "registration failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                }
            }
        }
    }

    async fn heartbeat(&self) {
        let consumed = self
            .tasks
            .values()
            .fold(Resources::ZERO, |acc, t| acc.saturating_add(&t.resources));
        let available = self.config.capacity.saturating_sub(&consumed);
        let statuses: Vec<TaskStatus> = self.latest.values().cloned().collect();

        if let Err(err) = self
            .client
            .heartbeat(self.node_id.clone(), available, statuses)
            .await
        {
            // Partition behavior: log and carry on; containers keep running.
            debug!(%err, "heartbeat failed");
        }
    }

    async fn sync(&mut self) {
        let assigned = match self.client.list_assignments(self.node_id.clone()).await {
            Ok(assigned) => assigned,
            Err(err) => {
                debug!(%err, "assignment sync failed");
                return;
            }
        };

        let running_tasks: Vec<ContainerId> = self.tasks.keys().cloned().collect();
        let actions = plan_sync(&assigned, &running_tasks);

        for container in actions.spawn {
            // A fresh lifecycle owns the reporting now; a stale terminal
            // status from the previous incarnation must not be replayed
            // over the control plane's restart reset.
            self.latest.remove(&container.id);
            self.spawn_task(container).await;
        }
        for id in actions.stop {
            if let Some(task) = self.tasks.get(&id) {
                debug!(container = %id, "signaling stop");
                let _ = task.command.send(TaskCommand::Stop);
            }
        }

        // Forget statuses of records the control plane no longer has.
        let assigned_ids: std::collections::HashSet<&ContainerId> =
            assigned.iter().map(|c| &c.id).collect();
        self.latest
            .retain(|id, _| assigned_ids.contains(id) || self.tasks.contains_key(id));
    }

    /// Prepares mounts and spawns the lifecycle task. Preparation failures
    /// are reported as container failures, not agent errors.
    async fn spawn_task(&mut self, container: Container) {
        let run_config = match self.prepare(&container).await {
            Ok(config) => config,
            Err(err) => {
                warn!(container = %container.id, %err, "container preparation failed");
                let status = TaskStatus {
                    container_id: container.id.clone(),
                    actual_state: ActualState::Failed,
                    health: warren_types::Health::Unknown,
                    runtime_id: None,
                    error: Some(err.to_string()),
                    finished_at: Some(warren_types::Timestamp::now()),
                };
                self.latest.insert(container.id.clone(), status);
                return;
            }
        };

        let (command_tx, command_rx) = watch::channel(TaskCommand::Run);
        let resources = container.spec.resources;
        let id = container.id.clone();
        let join = tokio::spawn(run_container(
            container,
            run_config,
            self.runtime.clone(),
            Duration::from_millis(self.config.pull_timeout_ms.max(1_000)),
            command_rx,
            self.events_tx.clone(),
        ));
        self.tasks.insert(
            id,
            TaskHandle {
                command: command_tx,
                join,
                resources,
            },
        );
    }

    /// Resolves volumes and secrets into host paths for the Runtime.
    async fn prepare(&self, container: &Container) -> crate::Result<RunConfig> {
        let mut mounts = volumes::prepare_mounts(
            &self.config.volumes_dir,
            &self.client,
            &self.node_id,
            &container.spec.volume_mounts,
        )
        .await?;

        if !container.spec.secret_refs.is_empty() {
            let key = self.config.cluster_key.as_ref().ok_or_else(|| {
                crate::AgentError::Api(warren_types::ApiError::invalid_argument(
                    "container references secrets but this node has no cluster key",
                ))
            })?;
            for name in &container.spec.secret_refs {
                let ciphertext = self.client.get_secret_ciphertext(name).await?;
                let host_path = secrets::materialize(
                    &self.config.secrets_dir,
                    key,
                    &container.id,
                    name,
                    &ciphertext,
                )
                .await?;
                mounts.push((
                    host_path.to_string_lossy().into_owned(),
                    secrets::mount_path(name),
                    true,
                ));
            }
        }

        Ok(RunConfig {
            image: container.spec.image.clone(),
            env: container.spec.env.clone(),
            command: container.spec.command.clone(),
            mounts,
        })
    }

    async fn on_event(&mut self, event: TaskEvent) {
        let TaskEvent::StateChanged(status) = event;
        let id = status.container_id.clone();
        let terminal = status.actual_state.is_terminal();
        self.latest.insert(id.clone(), status);

        if terminal {
            if let Some(task) = self.tasks.remove(&id) {
                task.join.abort(); // already finished; belt and braces
            }
            if let Err(err) = secrets::cleanup(&self.config.secrets_dir, &id).await {
                warn!(container = %id, %err, "secret cleanup failed");
            }
        }
    }
}

/// The sync diff, pure for testing.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct SyncActions {
    pub spawn: Vec<Container>,
    pub stop: Vec<ContainerId>,
}

pub(crate) fn plan_sync(assigned: &[Container], local: &[ContainerId]) -> SyncActions {
    let mut actions = SyncActions::default();
    let assigned_ids: std::collections::HashSet<&ContainerId> =
        assigned.iter().map(|c| &c.id).collect();

    for container in assigned {
        let have = local.contains(&container.id);
        match container.desired_state {
            DesiredState::Running if !have && !container.actual_state.is_terminal() => {
                actions.spawn.push(container.clone());
            }
            DesiredState::Shutdown if have => {
                actions.stop.push(container.id.clone());
            }
            _ => {}
        }
    }

    // Records that vanished entirely (deleted service, GC) stop too.
    for id in local {
        if !assigned_ids.contains(id) {
            actions.stop.push(id.clone());
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use warren_types::{ContainerSpec, Health, RestartPolicy, ServiceId, Timestamp};

    fn assigned(id: &str, desired: DesiredState, actual: ActualState) -> Container {
        Container {
            id: ContainerId::new(id),
            service_id: ServiceId::new("svc"),
            service_version: 1,
            node_id: NodeId::new("n1"),
            desired_state: desired,
            actual_state: actual,
            health: Health::Unknown,
            spec: ContainerSpec {
                image: "nginx:1".into(),
                env: BTreeMap::new(),
                command: Vec::new(),
                resources: Resources::ZERO,
                volume_mounts: Vec::new(),
                secret_refs: Vec::new(),
                health_check: None,
                restart_policy: RestartPolicy::default(),
                stop_timeout_seconds: 10,
            },
            labels: BTreeMap::new(),
            error: None,
            restart_count: 0,
            next_start_at: None,
            finished_at: None,
            created_at: Timestamp::ZERO,
            updated_at: Timestamp::ZERO,
        }
    }

    #[test]
    fn new_running_assignments_spawn() {
        let actions = plan_sync(
            &[assigned("c1", DesiredState::Running, ActualState::Pending)],
            &[],
        );
        assert_eq!(actions.spawn.len(), 1);
        assert!(actions.stop.is_empty());
    }

    #[test]
    fn terminal_records_do_not_respawn() {
        let actions = plan_sync(
            &[assigned("c1", DesiredState::Running, ActualState::Failed)],
            &[],
        );
        assert!(actions.spawn.is_empty(), "failed containers wait for the control plane");
    }

    #[test]
    fn condemned_assignments_stop() {
        let actions = plan_sync(
            &[assigned("c1", DesiredState::Shutdown, ActualState::Running)],
            &[ContainerId::new("c1")],
        );
        assert_eq!(actions.stop, vec![ContainerId::new("c1")]);
    }

    #[test]
    fn vanished_records_stop_local_tasks() {
        let actions = plan_sync(&[], &[ContainerId::new("ghost")]);
        assert_eq!(actions.stop, vec![ContainerId::new("ghost")]);
    }

    #[test]
    fn already_tracked_running_containers_are_left_alone() {
        let actions = plan_sync(
            &[assigned("c1", DesiredState::Running, ActualState::Running)],
            &[ContainerId::new("c1")],
        );
        assert_eq!(actions, SyncActions::default());
    }
}
