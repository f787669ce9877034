//! API requests, responses, and watch-stream events.
//!
//! One request frame yields one response frame, except `WatchTasks`: its
//! response is `Subscribed`, after which the server pushes [`WatchEvent`]
//! frames until either side closes. Mutations succeed only on the leader;
//! elsewhere they answer `Error(Unavailable)` with a leader hint.
//!
//! Secret reads are deliberately split: listings and lookups return
//! [`SecretInfo`] metadata only, and the ciphertext fetch is a separate
//! worker-only request. Plaintext never has a wire representation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use warren_types::{
    ApiError, Certificate, Container, ContainerId, IngressRule, IngressRuleId, Node, NodeId,
    NodeRole, Resources, SecretInfo, Service, ServiceSpec, TaskStatus, Volume,
};

/// Every operation callable over the API socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    // ========================================================================
    // Worker plane
    // ========================================================================
    /// Join (or rejoin) the cluster. Without an ID the manager mints one.
    RegisterNode {
        id: Option<NodeId>,
        role: NodeRole,
        address: String,
        capacity: Resources,
        labels: BTreeMap<String, String>,
    },

    /// Periodic liveness + capacity + observed container states.
    Heartbeat {
        node_id: NodeId,
        available: Resources,
        task_statuses: Vec<TaskStatus>,
    },

    /// Snapshot of this node's assignments, then pushed changes.
    WatchTasks { node_id: NodeId },

    /// Poll fallback for assignment sync when no watch stream is up.
    ListAssignments { node_id: NodeId },

    /// Worker-only: ciphertext for materialization. Never in listings.
    GetSecretCiphertext { name: String },

    /// First local mount of a volume pins it to the mounting node.
    BindVolume { name: String, node_id: NodeId },

    // ========================================================================
    // Service CRUD
    // ========================================================================
    CreateService { name: String, spec: ServiceSpec },
    UpdateService { name: String, spec: ServiceSpec },
    DeleteService { name: String },
    GetService { name: String },
    ListServices,
    ScaleService { name: String, replicas: u32 },
    /// Revert to the immediately prior spec version and re-drive the
    /// configured deployment strategy.
    ManualRollback { name: String },

    // ========================================================================
    // Reads
    // ========================================================================
    ListNodes,
    GetNode { id: NodeId },
    RemoveNode { id: NodeId },
    ListContainers,
    GetContainer { id: ContainerId },

    // ========================================================================
    // Secrets / volumes / ingress / certificates
    // ========================================================================
    CreateSecret { name: String, data: Vec<u8> },
    DeleteSecret { name: String },
    ListSecrets,

    CreateVolume {
        name: String,
        driver: String,
        driver_opts: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    },
    DeleteVolume { name: String },
    ListVolumes,

    SetIngressRule {
        id: Option<IngressRuleId>,
        host: String,
        path_prefix: String,
        service_name: String,
        port: u16,
    },
    RemoveIngressRule { id: IngressRuleId },
    ListIngressRules,

    SetCertificate {
        domain: String,
        cert_pem: String,
        key_pem: String,
    },
    ListCertificates,
}

/// The reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(ApiError),

    NodeRegistered { id: NodeId },
    Node(Node),
    Nodes(Vec<Node>),

    Service(Service),
    Services(Vec<Service>),

    Container(Container),
    Containers(Vec<Container>),

    SecretCreated { info: SecretInfo },
    Secrets(Vec<SecretInfo>),
    SecretCiphertext { name: String, ciphertext: Vec<u8> },

    Volume(Volume),
    Volumes(Vec<Volume>),

    IngressRules(Vec<IngressRule>),
    Certificates(Vec<Certificate>),

    /// The watch stream is established; [`WatchEvent`] frames follow.
    Subscribed,
}

impl Response {
    pub fn error(err: impl Into<ApiError>) -> Self {
        Response::Error(err.into())
    }
}

/// One change on a watch stream, keyed by container ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WatchEvent {
    /// Initial state of the node's assignment set.
    Snapshot(Vec<Container>),
    /// A container assigned to the node was created or changed.
    Updated(Container),
    /// A container assigned to the node was deleted.
    Deleted(ContainerId),
}
