//! The replicated command set.
//!
//! Every mutation of cluster state is one of these commands, serialized
//! into the log by the leader and applied in log order on every replica.
//! [`CommandKind`] is the stable wire enumeration: discriminants are
//! assigned once and never renumbered; new commands only append.

use serde::{Deserialize, Serialize};
use warren_types::{
    Certificate, CertificateId, Container, ContainerId, DesiredState, IngressRule, IngressRuleId,
    Node, NodeId, NodeStatus, Resources, Secret, SecretId, Service, ServiceId, ServiceSpec,
    TaskStatus, Timestamp, Volume, VolumeId,
};

/// Stable numbering of every mutation. Additions only; no renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CommandKind {
    RegisterNode = 1,
    UpdateNodeStatus = 2,
    RemoveNode = 3,
    Heartbeat = 4,

    CreateService = 10,
    UpdateService = 11,
    ScaleService = 12,
    RollbackService = 13,
    DeleteService = 14,
    SwapBlueGreen = 15,
    RevertBlueGreen = 16,
    FinalizeBlueGreen = 17,

    CreateContainer = 20,
    UpdateContainerDesired = 21,
    RestartContainer = 22,
    DeleteContainer = 23,
    MarkContainerShutdown = 24,

    CreateSecret = 30,
    DeleteSecret = 31,

    CreateVolume = 40,
    BindVolume = 41,
    DeleteVolume = 42,

    SetIngressRule = 50,
    RemoveIngressRule = 51,
    SetCertificate = 52,
    RemoveCertificate = 53,
}

/// A state-changing operation, ready to be ordered into the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    // ========================================================================
    // Nodes
    // ========================================================================
    /// Insert or refresh a node record. A re-registering node keeps its ID
    /// and updates role/address/capacity/labels; status becomes Ready.
    RegisterNode {
        id: NodeId,
        role: warren_types::NodeRole,
        address: String,
        capacity: Resources,
        labels: std::collections::BTreeMap<String, String>,
    },

    /// Liveness transition driven by the reconciler's heartbeat sweep.
    UpdateNodeStatus { id: NodeId, status: NodeStatus },

    /// Explicit removal of a cluster member.
    RemoveNode { id: NodeId },

    /// Periodic worker report: refreshes liveness and available capacity,
    /// and folds observed container states into the store.
    Heartbeat {
        node_id: NodeId,
        available: Resources,
        task_statuses: Vec<TaskStatus>,
    },

    // ========================================================================
    // Services
    // ========================================================================
    CreateService { service: Service },

    /// Replace the service spec. A change to the container template bumps
    /// `version` and captures the prior spec for rollback; a replicas-only
    /// change adjusts cardinality in place.
    UpdateService { id: ServiceId, spec: ServiceSpec },

    /// Bounds-checked replica-count change.
    ScaleService { id: ServiceId, replicas: u32 },

    /// Restore the previous spec under a fresh (still monotonic) version.
    /// Shared by manual rollback and the automatic deployment rollbacks.
    RollbackService { id: ServiceId },

    /// Delete the service and mark every owned container for teardown.
    DeleteService { id: ServiceId },

    /// Atomic blue-green cutover: primary becomes `rolled-back` (stamped
    /// with the swap time), shadow becomes `active`.
    SwapBlueGreen {
        primary_id: ServiceId,
        shadow_id: ServiceId,
    },

    /// Reverse a swap within the grace period: the primary's swap labels are
    /// cleared and the shadow (with its containers) is torn down.
    RevertBlueGreen {
        primary_id: ServiceId,
        shadow_id: ServiceId,
    },

    /// End of the post-swap grace period: the old primary is deleted with
    /// its containers and the shadow sheds its shadow markers, becoming the
    /// sole holder of the service name.
    FinalizeBlueGreen {
        primary_id: ServiceId,
        shadow_id: ServiceId,
    },

    // ========================================================================
    // Containers
    // ========================================================================
    /// Scheduler-built container record, spec snapshot included.
    CreateContainer { container: Container },

    /// Intent flip by the scheduler or reconciler.
    UpdateContainerDesired {
        id: ContainerId,
        desired_state: DesiredState,
    },

    /// Reconciler restart path: Failed back to Pending under the restart
    /// policy, with backoff encoded in `next_start_at`.
    RestartContainer {
        id: ContainerId,
        next_start_at: Timestamp,
    },

    /// Garbage collection of a terminal record.
    DeleteContainer { id: ContainerId },

    /// Control-plane-side terminal transition for a shutdown-intent
    /// container whose node is down and will never report again.
    MarkContainerShutdown { id: ContainerId },

    // ========================================================================
    // Secrets / volumes / ingress / certificates
    // ========================================================================
    CreateSecret { secret: Secret },
    DeleteSecret { id: SecretId },

    CreateVolume { volume: Volume },

    /// First-mount node affinity, reported by the mounting worker.
    BindVolume { id: VolumeId, node_id: NodeId },

    DeleteVolume { id: VolumeId },

    SetIngressRule { rule: IngressRule },
    RemoveIngressRule { id: IngressRuleId },
    SetCertificate { certificate: Certificate },
    RemoveCertificate { id: CertificateId },
}

impl Command {
    /// The stable kind tag used in the wire envelope.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::RegisterNode { .. } => CommandKind::RegisterNode,
            Command::UpdateNodeStatus { .. } => CommandKind::UpdateNodeStatus,
            Command::RemoveNode { .. } => CommandKind::RemoveNode,
            Command::Heartbeat { .. } => CommandKind::Heartbeat,
            Command::CreateService { .. } => CommandKind::CreateService,
            Command::UpdateService { .. } => CommandKind::UpdateService,
            Command::ScaleService { .. } => CommandKind::ScaleService,
            Command::RollbackService { .. } => CommandKind::RollbackService,
            Command::DeleteService { .. } => CommandKind::DeleteService,
            Command::SwapBlueGreen { .. } => CommandKind::SwapBlueGreen,
            Command::RevertBlueGreen { .. } => CommandKind::RevertBlueGreen,
            Command::FinalizeBlueGreen { .. } => CommandKind::FinalizeBlueGreen,
            Command::CreateContainer { .. } => CommandKind::CreateContainer,
            Command::UpdateContainerDesired { .. } => CommandKind::UpdateContainerDesired,
            Command::RestartContainer { .. } => CommandKind::RestartContainer,
            Command::DeleteContainer { .. } => CommandKind::DeleteContainer,
            Command::MarkContainerShutdown { .. } => CommandKind::MarkContainerShutdown,
            Command::CreateSecret { .. } => CommandKind::CreateSecret,
            Command::DeleteSecret { .. } => CommandKind::DeleteSecret,
            Command::CreateVolume { .. } => CommandKind::CreateVolume,
            Command::BindVolume { .. } => CommandKind::BindVolume,
            Command::DeleteVolume { .. } => CommandKind::DeleteVolume,
            Command::SetIngressRule { .. } => CommandKind::SetIngressRule,
            Command::RemoveIngressRule { .. } => CommandKind::RemoveIngressRule,
            Command::SetCertificate { .. } => CommandKind::SetCertificate,
            Command::RemoveCertificate { .. } => CommandKind::RemoveCertificate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_discriminants_are_stable() {
        // Renumbering would break every persisted log. These values are
        // load-bearing; the test pins them.
        assert_eq!(CommandKind::RegisterNode as u16, 1);
        assert_eq!(CommandKind::Heartbeat as u16, 4);
        assert_eq!(CommandKind::CreateService as u16, 10);
        assert_eq!(CommandKind::SwapBlueGreen as u16, 15);
        assert_eq!(CommandKind::CreateContainer as u16, 20);
        assert_eq!(CommandKind::CreateSecret as u16, 30);
        assert_eq!(CommandKind::CreateVolume as u16, 40);
        assert_eq!(CommandKind::SetIngressRule as u16, 50);
        assert_eq!(CommandKind::RemoveCertificate as u16, 53);
    }

    #[test]
    fn command_round_trips_through_postcard() {
        let cmd = Command::ScaleService {
            id: ServiceId::new("svc-1"),
            replicas: 5,
        };
        let bytes = postcard::to_allocvec(&cmd).unwrap();
        let back: Command = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(cmd, back);
        assert_eq!(back.kind(), CommandKind::ScaleService);
    }
}
