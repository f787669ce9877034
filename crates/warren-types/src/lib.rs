//! # warren-types: Core types for Warren
//!
//! This crate contains the shared vocabulary of the Warren control plane:
//! - Entity IDs ([`NodeId`], [`ServiceId`], [`ContainerId`], [`SecretId`], [`VolumeId`])
//! - Temporal types ([`Timestamp`])
//! - Resource accounting ([`Resources`])
//! - The cluster entity model ([`Node`], [`Service`], [`Container`], [`Secret`],
//!   [`Volume`], [`IngressRule`], [`Certificate`])
//! - Deployment bookkeeping labels ([`labels`])
//! - The stable API error taxonomy ([`ErrorKind`], [`ApiError`])
//!
//! Everything here is plain data: serde-serializable, deterministic, and free
//! of I/O. All mutation logic lives in `warren-kernel`; all persistence in
//! `warren-store`.

mod error;

pub use error::{ApiError, ApiResult, ErrorKind};

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs
// ============================================================================

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mints a fresh random identifier (UUID v4).
            ///
            /// Only command *producers* (API handlers, the scheduler) mint IDs;
            /// the replicated apply path never does, so replicas stay identical.
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id! {
    /// Unique identifier of a cluster member node.
    NodeId
}

entity_id! {
    /// Unique identifier of a declared service.
    ServiceId
}

entity_id! {
    /// Unique identifier of a container (task). Never reused.
    ContainerId
}

entity_id! {
    /// Unique identifier of a secret.
    SecretId
}

entity_id! {
    /// Unique identifier of a volume.
    VolumeId
}

entity_id! {
    /// Unique identifier of an ingress rule.
    IngressRuleId
}

entity_id! {
    /// Unique identifier of a stored certificate.
    CertificateId
}

// ============================================================================
// Timestamp
// ============================================================================

/// Milliseconds since the Unix epoch.
///
/// All control-plane timestamps use this representation. The replicated apply
/// path never reads the wall clock: the leader stamps each log entry at
/// append time and every replica applies that same stamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time. Not for use inside the apply path.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, saturating at zero.
    pub fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn saturating_add_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Node resource capacity or a workload's resource requirement.
///
/// CPU is measured in millicores (1000 = one core) so that arithmetic stays
/// integral and deterministic across replicas.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Resources {
    /// CPU in millicores.
    pub cpu_millis: u64,
    /// Memory in bytes.
    pub memory_bytes: u64,
    /// Disk in bytes.
    pub disk_bytes: u64,
}

impl Resources {
    pub const ZERO: Resources = Resources {
        cpu_millis: 0,
        memory_bytes: 0,
        disk_bytes: 0,
    };

    pub fn new(cpu_millis: u64, memory_bytes: u64, disk_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            disk_bytes,
        }
    }

    /// True if a workload requiring `need` fits within this budget.
    pub fn can_fit(&self, need: &Resources) -> bool {
        self.cpu_millis >= need.cpu_millis
            && self.memory_bytes >= need.memory_bytes
            && self.disk_bytes >= need.disk_bytes
    }

    /// Component-wise saturating subtraction.
    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            disk_bytes: self.disk_bytes.saturating_sub(other.disk_bytes),
        }
    }

    /// Component-wise saturating addition.
    pub fn saturating_add(&self, other: &Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
            disk_bytes: self.disk_bytes.saturating_add(other.disk_bytes),
        }
    }
}

// ============================================================================
// Node
// ============================================================================

/// Role of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Participates in the replicated control plane only.
    Manager,
    /// Executes container workloads only.
    Worker,
    /// Both manager and worker.
    Hybrid,
}

impl NodeRole {
    /// True if this node may host containers.
    pub fn hosts_workloads(self) -> bool {
        matches!(self, NodeRole::Worker | NodeRole::Hybrid)
    }

    /// True if this node votes in the control plane.
    pub fn is_manager(self) -> bool {
        matches!(self, NodeRole::Manager | NodeRole::Hybrid)
    }
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeRole::Manager => "manager",
            NodeRole::Worker => "worker",
            NodeRole::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// Liveness status of a node, driven by heartbeat presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Ready,
    Down,
    #[default]
    Unknown,
}

/// A cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    /// Address the node's agent is reachable at (`host:port`).
    pub address: String,
    /// Total resource capacity.
    pub capacity: Resources,
    /// Capacity minus what locally-active containers consume, as last
    /// reported by the node's heartbeat.
    pub available: Resources,
    pub labels: BTreeMap<String, String>,
    pub status: NodeStatus,
    pub last_heartbeat: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Node {
    /// True if the scheduler may place new work here.
    pub fn is_eligible(&self) -> bool {
        self.status == NodeStatus::Ready && self.role.hosts_workloads()
    }

    /// True if the node's labels satisfy every `selector` entry.
    pub fn matches_selector(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|have| have == v))
    }
}

// ============================================================================
// Service
// ============================================================================

/// Replication mode of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// Maintain exactly `replicas` containers cluster-wide.
    #[default]
    Replicated,
    /// Maintain one container per eligible node.
    Global,
}

/// When a failed container is restarted in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartCondition {
    Never,
    #[default]
    OnFailure,
    Always,
}

/// Restart policy applied by the reconciler to failed containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub condition: RestartCondition,
    /// Restart attempts before the container is given up and replaced.
    pub max_attempts: u32,
    /// Base delay before the next start; doubled per attempt.
    pub delay_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            condition: RestartCondition::OnFailure,
            max_attempts: 3,
            delay_ms: 1_000,
        }
    }
}

/// Probe used by the worker to judge container health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthProbe {
    /// HTTP GET against `path` on `port`; 2xx is healthy.
    Http { path: String, port: u16 },
    /// TCP connect to `port`.
    Tcp { port: u16 },
    /// Exec `argv` inside the container; exit 0 is healthy.
    Command { argv: Vec<String> },
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub probe: HealthProbe,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Consecutive failures before the container is reported unhealthy,
    /// and consecutive successes before it is reported healthy again.
    pub retries: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            probe: HealthProbe::Tcp { port: 80 },
            interval_ms: 10_000,
            timeout_ms: 3_000,
            retries: 3,
        }
    }
}

/// What the rolling driver does when a batch exceeds the failure threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    /// Stop driving the update; stale containers stay up.
    Pause,
    /// Revert the service to its previous spec and re-drive.
    #[default]
    Rollback,
    /// Keep going regardless.
    Continue,
}

/// How a service transitions to a new spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployStrategy {
    Rolling {
        /// Containers replaced per batch.
        parallelism: u32,
        /// Sleep between batches.
        delay_ms: u64,
        failure_action: FailureAction,
        /// Failed replacements tolerated per batch.
        failure_threshold: u32,
    },
    BlueGreen {
        /// How long the old cohort is kept after the swap.
        grace_period_ms: u64,
    },
    Canary {
        /// Percentage steps, ending at 100 (e.g. `[10, 50, 100]`).
        steps: Vec<u8>,
        /// Observation window after each step.
        stability_window_ms: u64,
    },
}

impl Default for DeployStrategy {
    fn default() -> Self {
        DeployStrategy::Rolling {
            parallelism: 1,
            delay_ms: 0,
            failure_action: FailureAction::Rollback,
            failure_threshold: 1,
        }
    }
}

impl DeployStrategy {
    /// Label value recorded on containers created under this strategy.
    pub fn label_value(&self) -> &'static str {
        match self {
            DeployStrategy::Rolling { .. } => "rolling",
            DeployStrategy::BlueGreen { .. } => "blue-green",
            DeployStrategy::Canary { .. } => "canary",
        }
    }
}

/// Mount of a named volume into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub volume_name: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Scheduling constraints of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlacementConstraints {
    /// Node labels that must all match.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Names of services whose containers must not share a node with ours.
    #[serde(default)]
    pub anti_affinity: Vec<String>,
}

/// The user-declared shape of a service. Everything a container inherits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub image: String,
    pub replicas: u32,
    #[serde(default)]
    pub mode: ServiceMode,
    #[serde(default)]
    pub update_config: UpdateConfig,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub secret_refs: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,
    #[serde(default)]
    pub placement: PlacementConstraints,
}

fn default_stop_timeout() -> u64 {
    10
}

/// Deployment strategy wrapper so services can omit it entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UpdateConfig {
    #[serde(default)]
    pub strategy: DeployStrategy,
}

/// A declarative service definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    /// Cluster-unique among primary services. A blue-green shadow shares its
    /// primary's name and is distinguished by
    /// [`labels::DEPLOYMENT_ORIGINAL_SERVICE`].
    pub name: String,
    pub spec: ServiceSpec,
    /// The spec before the most recent update; what rollback restores.
    pub previous_spec: Option<Box<ServiceSpec>>,
    /// Monotonically increasing; bumped on every spec change including
    /// rollback (content reverts, version never does).
    pub version: u64,
    pub labels: BTreeMap<String, String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Service {
    /// True if this service is a blue-green shadow of another.
    pub fn is_shadow(&self) -> bool {
        self.labels.contains_key(labels::DEPLOYMENT_ORIGINAL_SERVICE)
    }
}

// ============================================================================
// Container (Task)
// ============================================================================

/// The control plane's intent for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Running,
    Shutdown,
}

/// The observed state of a container, reported by the worker.
///
/// Transitions are monotone through the DAG:
/// `Pending → Running → {Complete, Failed}`, `Running → Shutdown`,
/// `Pending → {Failed, Shutdown}`. Terminal states never go back to
/// `Running`. The one sanctioned reset is the reconciler returning a
/// `Failed` container to `Pending` under its restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActualState {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
    Shutdown,
}

impl ActualState {
    /// Terminal states; a container here no longer consumes node resources.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActualState::Complete | ActualState::Failed | ActualState::Shutdown
        )
    }

    /// True if `next` is a legal worker-reported successor of `self`.
    ///
    /// Reports are idempotent: every state may re-report itself.
    pub fn can_transition_to(self, next: ActualState) -> bool {
        if self == next {
            return true;
        }
        match self {
            ActualState::Pending => matches!(
                next,
                ActualState::Running | ActualState::Failed | ActualState::Shutdown
            ),
            ActualState::Running => matches!(
                next,
                ActualState::Complete | ActualState::Failed | ActualState::Shutdown
            ),
            // Terminal. Only the reconciler's restart path leaves here, and it
            // does so through its own command, not a worker report.
            ActualState::Complete | ActualState::Failed | ActualState::Shutdown => false,
        }
    }
}

impl Display for ActualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActualState::Pending => "pending",
            ActualState::Running => "running",
            ActualState::Complete => "complete",
            ActualState::Failed => "failed",
            ActualState::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Worker-observed health of a running container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// The frozen slice of a service spec a container runs with.
///
/// Captured at creation time; the container's life is controlled by these
/// fields, never re-read from the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub command: Vec<String>,
    pub resources: Resources,
    pub volume_mounts: Vec<VolumeMount>,
    pub secret_refs: Vec<String>,
    pub health_check: Option<HealthCheck>,
    pub restart_policy: RestartPolicy,
    pub stop_timeout_seconds: u64,
}

impl From<&ServiceSpec> for ContainerSpec {
    fn from(spec: &ServiceSpec) -> Self {
        Self {
            image: spec.image.clone(),
            env: spec.env.clone(),
            command: spec.command.clone(),
            resources: spec.resources,
            volume_mounts: spec.volume_mounts.clone(),
            secret_refs: spec.secret_refs.clone(),
            health_check: spec.health_check.clone(),
            restart_policy: spec.restart_policy.clone(),
            stop_timeout_seconds: spec.stop_timeout_seconds,
        }
    }
}

/// The unit of scheduling: one container assigned to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub service_id: ServiceId,
    /// Service version captured at creation.
    pub service_version: u64,
    pub node_id: NodeId,
    pub desired_state: DesiredState,
    pub actual_state: ActualState,
    pub health: Health,
    pub spec: ContainerSpec,
    /// Carries the `deployment.*` bookkeeping labels.
    pub labels: BTreeMap<String, String>,
    pub error: Option<String>,
    /// Restarts consumed under the restart policy.
    pub restart_count: u32,
    /// Earliest time the worker may start this container (restart backoff).
    pub next_start_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Container {
    /// Active-intent: counts toward its service's replica total.
    pub fn is_active_intent(&self) -> bool {
        self.desired_state == DesiredState::Running
            && matches!(self.actual_state, ActualState::Pending | ActualState::Running)
    }

    /// True once the record is eligible for garbage collection, `gc_grace`
    /// after reaching a terminal state with shutdown intent.
    pub fn is_gc_eligible(&self, now: Timestamp, gc_grace_ms: u64) -> bool {
        if self.desired_state != DesiredState::Shutdown || !self.actual_state.is_terminal() {
            return false;
        }
        match self.finished_at {
            Some(finished) => now.millis_since(finished) > gc_grace_ms,
            None => false,
        }
    }
}

// ============================================================================
// Secret
// ============================================================================

/// An encrypted secret. The store only ever holds ciphertext; plaintext is
/// assembled inside the worker just before mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub id: SecretId,
    /// Cluster-unique.
    pub name: String,
    /// AES-256-GCM ciphertext, nonce-prefixed.
    pub ciphertext: Vec<u8>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Secret {
    /// Metadata view. Listings expose only this.
    pub fn info(&self) -> SecretInfo {
        SecretInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
        }
    }
}

/// What secret listings and reads expose: never the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretInfo {
    pub id: SecretId,
    pub name: String,
    pub created_at: Timestamp,
}

// ============================================================================
// Volume
// ============================================================================

/// A named volume. Local-driver volumes develop node affinity once first
/// mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    /// Cluster-unique.
    pub name: String,
    pub driver: String,
    pub driver_opts: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Set on first mount; pins future placements to that node.
    pub bound_node_id: Option<NodeId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ============================================================================
// Ingress & certificates (replicated storage only; the proxy is external)
// ============================================================================

/// A routing rule consumed by the external ingress proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub id: IngressRuleId,
    pub host: String,
    pub path_prefix: String,
    pub service_name: String,
    pub port: u16,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// TLS material stored for the external ingress proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub domain: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ============================================================================
// Worker task status reports
// ============================================================================

/// One container's observed state, carried in worker heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub container_id: ContainerId,
    pub actual_state: ActualState,
    pub health: Health,
    /// The Runtime's own identifier for the container, when known.
    pub runtime_id: Option<String>,
    pub error: Option<String>,
    pub finished_at: Option<Timestamp>,
}

// ============================================================================
// Deployment labels
// ============================================================================

/// Label keys and values used to persist deployment-driver state on
/// containers and services. Keeping this state in the store (rather than in
/// memory on the leader) is what lets a new leader resume a half-finished
/// deployment deterministically.
pub mod labels {
    /// Service version a container was created under.
    pub const DEPLOYMENT_VERSION: &str = "deployment.version";
    /// Deployment cohort state: one of the `STATE_*` values.
    pub const DEPLOYMENT_STATE: &str = "deployment.state";
    /// Strategy the cohort was created under.
    pub const DEPLOYMENT_STRATEGY: &str = "deployment.strategy";
    /// On a blue-green shadow service: the primary service's ID.
    pub const DEPLOYMENT_ORIGINAL_SERVICE: &str = "deployment.original-service";
    /// On a blue-green primary after the swap: when the swap happened
    /// (millis), used to time the grace period.
    pub const DEPLOYMENT_SWAPPED_AT: &str = "deployment.swapped-at";

    pub const STATE_ACTIVE: &str = "active";
    pub const STATE_STANDBY: &str = "standby";
    pub const STATE_CANARY: &str = "canary";
    pub const STATE_ROLLING: &str = "rolling";
    pub const STATE_FAILED: &str = "failed";
    pub const STATE_ROLLED_BACK: &str = "rolled-back";
}
