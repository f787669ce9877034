//! The apply path: committed command in, store writes out.
//!
//! Runs on every replica in log order. Everything here must be
//! deterministic: preconditions are checked against the transaction (which
//! sees earlier writes of the same apply batch), timestamps come from the
//! log entry, and errors are structured so that every replica reaches the
//! same verdict for the same command at the same position.

use tracing::debug;
use warren_store::{StoreError, Txn};
use warren_types::{
    ActualState, Container, ContainerId, DesiredState, Health, Node, NodeId, NodeStatus, Service,
    ServiceId, ServiceSpec, TaskStatus, Timestamp, labels,
};

use crate::Command;

/// Upper bound on replica counts, enforced at apply time as well as at the
/// API edge so a malformed command cannot commit an absurd cardinality.
pub const MAX_REPLICAS: u32 = 10_000;

/// Deterministic apply-path errors.
///
/// `Store` wraps the store's precondition failures (`AlreadyExists`,
/// `NotFound`); the remaining variants are domain preconditions. All of
/// them reproduce identically on every replica.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("service name {0:?} already taken")]
    ServiceNameTaken(String),

    #[error("secret name {0:?} already taken")]
    SecretNameTaken(String),

    #[error("volume name {0:?} already taken")]
    VolumeNameTaken(String),

    #[error("service {0} has no previous spec to roll back to")]
    NoRollbackTarget(ServiceId),

    #[error("replicas {0} exceeds the maximum of {MAX_REPLICAS}")]
    ReplicasOutOfBounds(u32),

    #[error("service {shadow} is not the blue-green shadow of {primary}")]
    ShadowMismatch {
        primary: ServiceId,
        shadow: ServiceId,
    },

    #[error("service {0} already has a blue-green shadow")]
    ShadowExists(ServiceId),

    #[error("volume {id} is already bound to node {bound}")]
    VolumeBoundElsewhere { id: String, bound: NodeId },

    #[error("container {0} is not in a restartable state")]
    NotRestartable(ContainerId),
}

impl From<KernelError> for warren_types::ApiError {
    fn from(err: KernelError) -> Self {
        use warren_types::ApiError;
        match err {
            KernelError::Store(inner) => inner.into(),
            KernelError::ServiceNameTaken(_)
            | KernelError::SecretNameTaken(_)
            | KernelError::VolumeNameTaken(_)
            | KernelError::ShadowExists(_) => ApiError::already_exists(err.to_string()),
            KernelError::NoRollbackTarget(_)
            | KernelError::ReplicasOutOfBounds(_)
            | KernelError::ShadowMismatch { .. }
            | KernelError::VolumeBoundElsewhere { .. }
            | KernelError::NotRestartable(_) => ApiError::invalid_argument(err.to_string()),
        }
    }
}

type Result<T> = std::result::Result<T, KernelError>;

/// Applies one committed command. `now` is the leader's log-entry stamp.
pub fn apply_committed(txn: &mut Txn, cmd: Command, now: Timestamp) -> Result<()> {
    match cmd {
        // ====================================================================
        // Nodes
        // ====================================================================
        Command::RegisterNode {
            id,
            role,
            address,
            capacity,
            labels: node_labels,
        } => {
            if let Some(existing) = txn.node(&id).cloned() {
                // Re-registration refreshes everything but identity. The next
                // heartbeat corrects `available`.
                let node = Node {
                    role,
                    address,
                    capacity,
                    available: capacity,
                    labels: node_labels,
                    status: NodeStatus::Ready,
                    last_heartbeat: now,
                    updated_at: now,
                    ..existing
                };
                txn.update_node(node)?;
            } else {
                txn.create_node(Node {
                    id,
                    role,
                    address,
                    capacity,
                    available: capacity,
                    labels: node_labels,
                    status: NodeStatus::Ready,
                    last_heartbeat: now,
                    created_at: now,
                    updated_at: now,
                })?;
            }
            Ok(())
        }

        Command::UpdateNodeStatus { id, status } => {
            let mut node = required(txn.node(&id), "node", id.as_str())?;
            node.status = status;
            node.updated_at = now;
            txn.update_node(node)?;
            Ok(())
        }

        Command::RemoveNode { id } => {
            txn.delete_node(&id)?;
            // The node's containers are torn down, not deleted; replacements
            // are the scheduler's job.
            for container in collect_containers_on_node(txn, &id) {
                mark_desired_shutdown(txn, container, now)?;
            }
            Ok(())
        }

        Command::Heartbeat {
            node_id,
            available,
            task_statuses,
        } => {
            let mut node = required(txn.node(&node_id), "node", node_id.as_str())?;
            node.last_heartbeat = now;
            node.available = available;
            // A previously-down node becomes ready again. Its old containers
            // stay marked for shutdown (one-shot policy).
            node.status = NodeStatus::Ready;
            node.updated_at = now;
            txn.update_node(node)?;

            for status in task_statuses {
                fold_task_status(txn, &status, now);
            }
            Ok(())
        }

        // ====================================================================
        // Services
        // ====================================================================
        Command::CreateService { mut service } => {
            if service.spec.replicas > MAX_REPLICAS {
                return Err(KernelError::ReplicasOutOfBounds(service.spec.replicas));
            }
            if service.is_shadow() {
                if let Some(primary_id) = service
                    .labels
                    .get(labels::DEPLOYMENT_ORIGINAL_SERVICE)
                    .map(|s| ServiceId::new(s.clone()))
                {
                    if txn.shadow_of(&primary_id).is_some() {
                        return Err(KernelError::ShadowExists(primary_id));
                    }
                }
            } else if txn.service_by_name(&service.name).is_some() {
                return Err(KernelError::ServiceNameTaken(service.name));
            }
            service.created_at = now;
            service.updated_at = now;
            txn.create_service(service)?;
            Ok(())
        }

        Command::UpdateService { id, spec } => {
            if spec.replicas > MAX_REPLICAS {
                return Err(KernelError::ReplicasOutOfBounds(spec.replicas));
            }
            let mut service = required(txn.service(&id), "service", id.as_str())?;
            if template_changed(&service.spec, &spec) {
                service.previous_spec = Some(Box::new(service.spec.clone()));
                service.version += 1;
            }
            service.spec = spec;
            service.updated_at = now;
            txn.update_service(service)?;
            Ok(())
        }

        Command::ScaleService { id, replicas } => {
            if replicas > MAX_REPLICAS {
                return Err(KernelError::ReplicasOutOfBounds(replicas));
            }
            let mut service = required(txn.service(&id), "service", id.as_str())?;
            // Cardinality only: no version bump, no rollback capture.
            service.spec.replicas = replicas;
            service.updated_at = now;
            txn.update_service(service)?;
            Ok(())
        }

        Command::RollbackService { id } => {
            let mut service = required(txn.service(&id), "service", id.as_str())?;
            let Some(prior) = service.previous_spec.take() else {
                return Err(KernelError::NoRollbackTarget(id));
            };
            service.previous_spec = Some(Box::new(service.spec.clone()));
            service.spec = *prior;
            service.version += 1;
            service.updated_at = now;
            txn.update_service(service)?;
            Ok(())
        }

        Command::DeleteService { id } => {
            txn.delete_service(&id)?;
            for container in collect_containers_of_service(txn, &id) {
                mark_desired_shutdown(txn, container, now)?;
            }
            // A pending blue-green shadow dies with its primary.
            if let Some(shadow) = txn.shadow_of(&id).cloned() {
                txn.delete_service(&shadow.id)?;
                for container in collect_containers_of_service(txn, &shadow.id) {
                    mark_desired_shutdown(txn, container, now)?;
                }
            }
            Ok(())
        }

        Command::SwapBlueGreen {
            primary_id,
            shadow_id,
        } => {
            let mut primary = required(txn.service(&primary_id), "service", primary_id.as_str())?;
            let mut shadow = required(txn.service(&shadow_id), "service", shadow_id.as_str())?;
            ensure_shadow_of(&primary, &shadow)?;

            primary.labels.insert(
                labels::DEPLOYMENT_STATE.into(),
                labels::STATE_ROLLED_BACK.into(),
            );
            primary.labels.insert(
                labels::DEPLOYMENT_SWAPPED_AT.into(),
                now.as_millis().to_string(),
            );
            primary.updated_at = now;

            shadow
                .labels
                .insert(labels::DEPLOYMENT_STATE.into(), labels::STATE_ACTIVE.into());
            shadow.updated_at = now;

            txn.update_service(primary)?;
            txn.update_service(shadow)?;

            // The deployment record rides on the containers too: both
            // cohorts flip state in the same committed swap.
            relabel_containers(txn, &primary_id, labels::STATE_ROLLED_BACK, now)?;
            relabel_containers(txn, &shadow_id, labels::STATE_ACTIVE, now)?;
            Ok(())
        }

        Command::RevertBlueGreen {
            primary_id,
            shadow_id,
        } => {
            let mut primary = required(txn.service(&primary_id), "service", primary_id.as_str())?;
            let shadow = required(txn.service(&shadow_id), "service", shadow_id.as_str())?;
            ensure_shadow_of(&primary, &shadow)?;

            primary.labels.remove(labels::DEPLOYMENT_STATE);
            primary.labels.remove(labels::DEPLOYMENT_SWAPPED_AT);
            primary.updated_at = now;
            txn.update_service(primary)?;
            relabel_containers(txn, &primary_id, labels::STATE_ACTIVE, now)?;

            txn.delete_service(&shadow_id)?;
            for container in collect_containers_of_service(txn, &shadow_id) {
                mark_desired_shutdown(txn, container, now)?;
            }
            Ok(())
        }

        Command::FinalizeBlueGreen {
            primary_id,
            shadow_id,
        } => {
            let primary = required(txn.service(&primary_id), "service", primary_id.as_str())?;
            let mut shadow = required(txn.service(&shadow_id), "service", shadow_id.as_str())?;
            ensure_shadow_of(&primary, &shadow)?;

            // Shed the shadow markers first so deleting the old primary does
            // not cascade into the promoted service.
            shadow.labels.remove(labels::DEPLOYMENT_ORIGINAL_SERVICE);
            shadow.updated_at = now;
            txn.update_service(shadow)?;

            txn.delete_service(&primary_id)?;
            for container in collect_containers_of_service(txn, &primary_id) {
                mark_desired_shutdown(txn, container, now)?;
            }
            Ok(())
        }

        // ====================================================================
        // Containers
        // ====================================================================
        Command::CreateContainer { mut container } => {
            // Both ends of the assignment must exist at apply time; the
            // scheduler may lose this race against deletes, deterministically.
            required(txn.service(&container.service_id), "service",
                container.service_id.as_str())?;
            required(txn.node(&container.node_id), "node", container.node_id.as_str())?;
            container.created_at = now;
            container.updated_at = now;
            txn.create_container(container)?;
            Ok(())
        }

        Command::UpdateContainerDesired { id, desired_state } => {
            let mut container = required(txn.container(&id), "container", id.as_str())?;
            if container.desired_state != desired_state {
                container.desired_state = desired_state;
                container.updated_at = now;
                txn.update_container(container)?;
            }
            Ok(())
        }

        Command::RestartContainer { id, next_start_at } => {
            let mut container = required(txn.container(&id), "container", id.as_str())?;
            if container.actual_state != ActualState::Failed
                || container.desired_state != DesiredState::Running
            {
                return Err(KernelError::NotRestartable(id));
            }
            container.actual_state = ActualState::Pending;
            container.health = Health::Unknown;
            container.error = None;
            container.restart_count += 1;
            container.next_start_at = Some(next_start_at);
            container.finished_at = None;
            container.updated_at = now;
            txn.update_container(container)?;
            Ok(())
        }

        Command::DeleteContainer { id } => {
            txn.delete_container(&id)?;
            Ok(())
        }

        Command::MarkContainerShutdown { id } => {
            let mut container = required(txn.container(&id), "container", id.as_str())?;
            if !container.actual_state.is_terminal() {
                container.actual_state = ActualState::Shutdown;
                container.finished_at = Some(now);
                container.updated_at = now;
                txn.update_container(container)?;
            }
            Ok(())
        }

        // ====================================================================
        // Secrets
        // ====================================================================
        Command::CreateSecret { mut secret } => {
            if txn.secret_by_name(&secret.name).is_some() {
                return Err(KernelError::SecretNameTaken(secret.name));
            }
            secret.created_at = now;
            secret.updated_at = now;
            txn.create_secret(secret)?;
            Ok(())
        }

        Command::DeleteSecret { id } => {
            txn.delete_secret(&id)?;
            Ok(())
        }

        // ====================================================================
        // Volumes
        // ====================================================================
        Command::CreateVolume { mut volume } => {
            if txn.volume_by_name(&volume.name).is_some() {
                return Err(KernelError::VolumeNameTaken(volume.name));
            }
            volume.created_at = now;
            volume.updated_at = now;
            txn.create_volume(volume)?;
            Ok(())
        }

        Command::BindVolume { id, node_id } => {
            let mut volume = required(txn.volume(&id), "volume", id.as_str())?;
            match &volume.bound_node_id {
                Some(bound) if bound == &node_id => Ok(()), // idempotent
                Some(bound) => Err(KernelError::VolumeBoundElsewhere {
                    id: id.to_string(),
                    bound: bound.clone(),
                }),
                None => {
                    volume.bound_node_id = Some(node_id);
                    volume.updated_at = now;
                    txn.update_volume(volume)?;
                    Ok(())
                }
            }
        }

        Command::DeleteVolume { id } => {
            txn.delete_volume(&id)?;
            Ok(())
        }

        // ====================================================================
        // Ingress & certificates (storage only; the proxy consumes these)
        // ====================================================================
        Command::SetIngressRule { mut rule } => {
            if let Some(existing) = txn.ingress_rule(&rule.id) {
                rule.created_at = existing.created_at;
                rule.updated_at = now;
                txn.update_ingress_rule(rule)?;
            } else {
                rule.created_at = now;
                rule.updated_at = now;
                txn.create_ingress_rule(rule)?;
            }
            Ok(())
        }

        Command::RemoveIngressRule { id } => {
            txn.delete_ingress_rule(&id)?;
            Ok(())
        }

        Command::SetCertificate { mut certificate } => {
            if let Some(existing) = txn.certificate(&certificate.id) {
                certificate.created_at = existing.created_at;
                certificate.updated_at = now;
                txn.update_certificate(certificate)?;
            } else {
                certificate.created_at = now;
                certificate.updated_at = now;
                txn.create_certificate(certificate)?;
            }
            Ok(())
        }

        Command::RemoveCertificate { id } => {
            txn.delete_certificate(&id)?;
            Ok(())
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn required<T: Clone>(value: Option<&T>, kind: &'static str, id: &str) -> Result<T> {
    value
        .cloned()
        .ok_or_else(|| KernelError::Store(StoreError::not_found(kind, id)))
}

fn ensure_shadow_of(primary: &Service, shadow: &Service) -> Result<()> {
    let points_back = shadow
        .labels
        .get(labels::DEPLOYMENT_ORIGINAL_SERVICE)
        .is_some_and(|orig| orig == primary.id.as_str());
    if points_back {
        Ok(())
    } else {
        Err(KernelError::ShadowMismatch {
            primary: primary.id.clone(),
            shadow: shadow.id.clone(),
        })
    }
}

fn collect_containers_of_service(txn: &Txn, id: &ServiceId) -> Vec<Container> {
    txn.containers_of_service(id)
        .into_iter()
        .cloned()
        .collect()
}

fn collect_containers_on_node(txn: &Txn, id: &NodeId) -> Vec<Container> {
    txn.containers_on_node(id).into_iter().cloned().collect()
}

fn mark_desired_shutdown(txn: &mut Txn, mut container: Container, now: Timestamp) -> Result<()> {
    if container.desired_state != DesiredState::Shutdown {
        container.desired_state = DesiredState::Shutdown;
        container.updated_at = now;
        txn.update_container(container)?;
    }
    Ok(())
}

fn relabel_containers(
    txn: &mut Txn,
    service_id: &ServiceId,
    state: &str,
    now: Timestamp,
) -> Result<()> {
    for mut container in collect_containers_of_service(txn, service_id) {
        container
            .labels
            .insert(labels::DEPLOYMENT_STATE.to_string(), state.to_string());
        container.updated_at = now;
        txn.update_container(container)?;
    }
    Ok(())
}

/// True if the container template (everything except `replicas`) changed.
///
/// Replica count is cardinality, not template: scaling must not trigger the
/// deployment machinery or capture a rollback target.
fn template_changed(old: &ServiceSpec, new: &ServiceSpec) -> bool {
    let mut normalized = old.clone();
    normalized.replicas = new.replicas;
    normalized != *new
}

/// Folds one worker-reported task status into the store.
///
/// Reports for unknown containers (already GC'd) are dropped. Transitions
/// that violate the state DAG are dropped too - they are stale reports from
/// before a control-plane reset, and dropping them is deterministic.
fn fold_task_status(txn: &mut Txn, status: &TaskStatus, now: Timestamp) {
    let Some(existing) = txn.container(&status.container_id) else {
        debug!(container = %status.container_id, "dropping status for unknown container");
        return;
    };
    let mut container = existing.clone();

    if container.actual_state != status.actual_state {
        if !container.actual_state.can_transition_to(status.actual_state) {
            debug!(
                container = %status.container_id,
                from = %container.actual_state,
                to = %status.actual_state,
                "dropping out-of-DAG status report"
            );
            return;
        }
        container.actual_state = status.actual_state;
        if status.actual_state.is_terminal() {
            container.finished_at = Some(status.finished_at.unwrap_or(now));
        }
    }

    container.health = status.health;
    if status.error.is_some() {
        container.error = status.error.clone();
    }
    container.updated_at = now;

    // The container existed moments ago in this same transaction.
    let _ = txn.update_container(container);
}
