//! Apply-path tests: preconditions, cascades, determinism.

use std::collections::BTreeMap;

use warren_store::Store;
use warren_types::{
    ActualState, Container, ContainerId, ContainerSpec, DesiredState, Health, NodeId, NodeRole,
    NodeStatus, Resources, Secret, SecretId, Service, ServiceId, ServiceMode, ServiceSpec,
    TaskStatus, Timestamp, Volume, VolumeId, labels,
};

use crate::{Command, KernelError};

fn ts(millis: u64) -> Timestamp {
    Timestamp::from_millis(millis)
}

fn apply(store: &Store, cmd: Command, now: Timestamp) -> Result<(), KernelError> {
    crate::apply_to_store(store, cmd, now)
}

/// Applies and asserts success.
fn must_apply(store: &Store, cmd: Command, now: Timestamp) {
    apply(store, cmd, now).expect("command must apply");
}

fn register_node_cmd(id: &str, role: NodeRole) -> Command {
    Command::RegisterNode {
        id: NodeId::new(id),
        role,
        address: "10.0.0.1:7411".to_string(),
        capacity: Resources::new(4_000, 8 << 30, 100 << 30),
        labels: BTreeMap::new(),
    }
}

fn service_spec(image: &str, replicas: u32) -> ServiceSpec {
    ServiceSpec {
        image: image.into(),
        replicas,
        mode: ServiceMode::Replicated,
        update_config: Default::default(),
        health_check: None,
        restart_policy: Default::default(),
        resources: Resources::new(100, 64 << 20, 0),
        volume_mounts: Vec::new(),
        secret_refs: Vec::new(),
        env: BTreeMap::new(),
        command: Vec::new(),
        stop_timeout_seconds: 10,
        placement: Default::default(),
    }
}

fn service(id: &str, name: &str, image: &str, replicas: u32) -> Service {
    Service {
        id: ServiceId::new(id),
        name: name.into(),
        spec: service_spec(image, replicas),
        previous_spec: None,
        version: 1,
        labels: BTreeMap::new(),
        created_at: Timestamp::ZERO,
        updated_at: Timestamp::ZERO,
    }
}

fn container(id: &str, service_id: &str, node_id: &str, version: u64) -> Container {
    let spec = service_spec("nginx:latest", 1);
    Container {
        id: ContainerId::new(id),
        service_id: ServiceId::new(service_id),
        service_version: version,
        node_id: NodeId::new(node_id),
        desired_state: DesiredState::Running,
        actual_state: ActualState::Pending,
        health: Health::Unknown,
        spec: ContainerSpec::from(&spec),
        labels: BTreeMap::new(),
        error: None,
        restart_count: 0,
        next_start_at: None,
        finished_at: None,
        created_at: Timestamp::ZERO,
        updated_at: Timestamp::ZERO,
    }
}

/// Seeds a store with one node and one service with one container.
fn seeded() -> Store {
    let store = Store::new();
    must_apply(&store, register_node_cmd("n1", NodeRole::Hybrid), ts(1));
    must_apply(
        &store,
        Command::CreateService {
            service: service("svc-1", "web", "nginx:1", 2),
        },
        ts(2),
    );
    must_apply(
        &store,
        Command::CreateContainer {
            container: container("c1", "svc-1", "n1", 1),
        },
        ts(3),
    );
    store
}

// ============================================================================
// Nodes
// ============================================================================

#[test]
fn register_creates_then_refreshes() {
    let store = Store::new();
    must_apply(&store, register_node_cmd("n1", NodeRole::Worker), ts(10));

    let view = store.view();
    let node = view.node(&NodeId::new("n1")).unwrap();
    assert_eq!(node.status, NodeStatus::Ready);
    assert_eq!(node.created_at, ts(10));
    assert_eq!(node.available, node.capacity);

    // Re-registration keeps identity, refreshes attributes.
    must_apply(&store, register_node_cmd("n1", NodeRole::Hybrid), ts(20));
    let view = store.view();
    let node = view.node(&NodeId::new("n1")).unwrap();
    assert_eq!(node.role, NodeRole::Hybrid);
    assert_eq!(node.created_at, ts(10));
    assert_eq!(node.updated_at, ts(20));
    assert_eq!(view.nodes().len(), 1);
}

#[test]
fn heartbeat_refreshes_node_and_folds_statuses() {
    let store = seeded();

    must_apply(
        &store,
        Command::Heartbeat {
            node_id: NodeId::new("n1"),
            available: Resources::new(3_000, 4 << 30, 0),
            task_statuses: vec![TaskStatus {
                container_id: ContainerId::new("c1"),
                actual_state: ActualState::Running,
                health: Health::Healthy,
                runtime_id: Some("rt-1".into()),
                error: None,
                finished_at: None,
            }],
        },
        ts(50),
    );

    let view = store.view();
    let node = view.node(&NodeId::new("n1")).unwrap();
    assert_eq!(node.last_heartbeat, ts(50));
    assert_eq!(node.available.cpu_millis, 3_000);

    let c = view.container(&ContainerId::new("c1")).unwrap();
    assert_eq!(c.actual_state, ActualState::Running);
    assert_eq!(c.health, Health::Healthy);
}

#[test]
fn heartbeat_marks_down_node_ready_again() {
    let store = seeded();
    must_apply(
        &store,
        Command::UpdateNodeStatus {
            id: NodeId::new("n1"),
            status: NodeStatus::Down,
        },
        ts(40),
    );
    must_apply(
        &store,
        Command::Heartbeat {
            node_id: NodeId::new("n1"),
            available: Resources::ZERO,
            task_statuses: Vec::new(),
        },
        ts(41),
    );
    assert_eq!(
        store.view().node(&NodeId::new("n1")).unwrap().status,
        NodeStatus::Ready
    );
}

#[test]
fn out_of_dag_status_reports_are_dropped() {
    let store = seeded();

    // Run then complete.
    for (state, at) in [(ActualState::Running, 10), (ActualState::Complete, 11)] {
        must_apply(
            &store,
            Command::Heartbeat {
                node_id: NodeId::new("n1"),
                available: Resources::ZERO,
                task_statuses: vec![TaskStatus {
                    container_id: ContainerId::new("c1"),
                    actual_state: state,
                    health: Health::Unknown,
                    runtime_id: None,
                    error: None,
                    finished_at: None,
                }],
            },
            ts(at),
        );
    }

    // A stale "running" report after the terminal state must not resurrect.
    must_apply(
        &store,
        Command::Heartbeat {
            node_id: NodeId::new("n1"),
            available: Resources::ZERO,
            task_statuses: vec![TaskStatus {
                container_id: ContainerId::new("c1"),
                actual_state: ActualState::Running,
                health: Health::Healthy,
                runtime_id: None,
                error: None,
                finished_at: None,
            }],
        },
        ts(12),
    );

    let view = store.view();
    let c = view.container(&ContainerId::new("c1")).unwrap();
    assert_eq!(c.actual_state, ActualState::Complete);
    assert_eq!(c.finished_at, Some(ts(11)));
}

#[test]
fn remove_node_tears_down_its_containers() {
    let store = seeded();
    must_apply(&store, Command::RemoveNode { id: NodeId::new("n1") }, ts(60));

    let view = store.view();
    assert!(view.node(&NodeId::new("n1")).is_none());
    assert_eq!(
        view.container(&ContainerId::new("c1")).unwrap().desired_state,
        DesiredState::Shutdown
    );
}

// ============================================================================
// Services
// ============================================================================

#[test]
fn service_names_are_unique_among_primaries() {
    let store = seeded();
    let err = apply(
        &store,
        Command::CreateService {
            service: service("svc-2", "web", "httpd:2", 1),
        },
        ts(5),
    )
    .unwrap_err();
    assert!(err.to_string().contains("already taken"), "{err}");

    // A blue-green shadow may share the primary's name.
    let mut shadow = service("svc-2", "web", "nginx:2", 2);
    shadow.labels.insert(
        labels::DEPLOYMENT_ORIGINAL_SERVICE.into(),
        "svc-1".into(),
    );
    shadow
        .labels
        .insert(labels::DEPLOYMENT_STATE.into(), labels::STATE_STANDBY.into());
    must_apply(&store, Command::CreateService { service: shadow }, ts(6));

    // But only one shadow per primary.
    let mut second = service("svc-3", "web", "nginx:2", 2);
    second.labels.insert(
        labels::DEPLOYMENT_ORIGINAL_SERVICE.into(),
        "svc-1".into(),
    );
    let err = apply(&store, Command::CreateService { service: second }, ts(7)).unwrap_err();
    assert!(err.to_string().contains("shadow"), "{err}");
}

#[test]
fn template_update_bumps_version_and_captures_previous() {
    let store = seeded();
    must_apply(
        &store,
        Command::UpdateService {
            id: ServiceId::new("svc-1"),
            spec: service_spec("nginx:2", 2),
        },
        ts(10),
    );

    let view = store.view();
    let svc = view.service(&ServiceId::new("svc-1")).unwrap();
    assert_eq!(svc.version, 2);
    assert_eq!(svc.spec.image, "nginx:2");
    assert_eq!(svc.previous_spec.as_ref().unwrap().image, "nginx:1");
}

#[test]
fn replicas_only_update_does_not_bump_version() {
    let store = seeded();
    must_apply(
        &store,
        Command::UpdateService {
            id: ServiceId::new("svc-1"),
            spec: service_spec("nginx:1", 7),
        },
        ts(10),
    );

    let view = store.view();
    let svc = view.service(&ServiceId::new("svc-1")).unwrap();
    assert_eq!(svc.version, 1);
    assert_eq!(svc.spec.replicas, 7);
    assert!(svc.previous_spec.is_none());
}

#[test]
fn scale_is_cardinality_only() {
    let store = seeded();
    must_apply(
        &store,
        Command::ScaleService {
            id: ServiceId::new("svc-1"),
            replicas: 4,
        },
        ts(10),
    );
    let view = store.view();
    let svc = view.service(&ServiceId::new("svc-1")).unwrap();
    assert_eq!(svc.spec.replicas, 4);
    assert_eq!(svc.version, 1);

    let err = apply(
        &store,
        Command::ScaleService {
            id: ServiceId::new("svc-1"),
            replicas: u32::MAX,
        },
        ts(11),
    )
    .unwrap_err();
    assert!(err.to_string().contains("maximum"), "{err}");
}

#[test]
fn rollback_restores_previous_spec_monotonic_version() {
    let store = seeded();
    must_apply(
        &store,
        Command::UpdateService {
            id: ServiceId::new("svc-1"),
            spec: service_spec("nginx:2", 2),
        },
        ts(10),
    );
    must_apply(
        &store,
        Command::RollbackService {
            id: ServiceId::new("svc-1"),
        },
        ts(11),
    );

    let view = store.view();
    let svc = view.service(&ServiceId::new("svc-1")).unwrap();
    assert_eq!(svc.spec.image, "nginx:1");
    assert_eq!(svc.version, 3, "version keeps increasing through rollback");
    // Rollback is itself reversible.
    assert_eq!(svc.previous_spec.as_ref().unwrap().image, "nginx:2");
}

#[test]
fn rollback_without_target_fails() {
    let store = seeded();
    let err = apply(
        &store,
        Command::RollbackService {
            id: ServiceId::new("svc-1"),
        },
        ts(10),
    )
    .unwrap_err();
    assert!(err.to_string().contains("no previous spec"), "{err}");
}

#[test]
fn delete_service_cascades_teardown() {
    let store = seeded();
    must_apply(
        &store,
        Command::DeleteService {
            id: ServiceId::new("svc-1"),
        },
        ts(20),
    );

    let view = store.view();
    assert!(view.service(&ServiceId::new("svc-1")).is_none());
    let c = view.container(&ContainerId::new("c1")).unwrap();
    assert_eq!(c.desired_state, DesiredState::Shutdown);
}

// ============================================================================
// Blue-green swap lifecycle
// ============================================================================

fn with_shadow(store: &Store) {
    let mut shadow = service("svc-shadow", "web", "nginx:2", 2);
    shadow.labels.insert(
        labels::DEPLOYMENT_ORIGINAL_SERVICE.into(),
        "svc-1".into(),
    );
    shadow
        .labels
        .insert(labels::DEPLOYMENT_STATE.into(), labels::STATE_STANDBY.into());
    must_apply(store, Command::CreateService { service: shadow }, ts(30));
}

#[test]
fn swap_marks_both_sides_atomically() {
    let store = seeded();
    with_shadow(&store);

    must_apply(
        &store,
        Command::SwapBlueGreen {
            primary_id: ServiceId::new("svc-1"),
            shadow_id: ServiceId::new("svc-shadow"),
        },
        ts(40),
    );

    let view = store.view();
    let primary = view.service(&ServiceId::new("svc-1")).unwrap();
    let shadow = view.service(&ServiceId::new("svc-shadow")).unwrap();
    assert_eq!(
        primary.labels.get(labels::DEPLOYMENT_STATE).unwrap(),
        labels::STATE_ROLLED_BACK
    );
    assert_eq!(
        primary.labels.get(labels::DEPLOYMENT_SWAPPED_AT).unwrap(),
        "40"
    );
    assert_eq!(
        shadow.labels.get(labels::DEPLOYMENT_STATE).unwrap(),
        labels::STATE_ACTIVE
    );
    // The deployment record flips on the containers in the same commit.
    let c = view.container(&ContainerId::new("c1")).unwrap();
    assert_eq!(
        c.labels.get(labels::DEPLOYMENT_STATE).unwrap(),
        labels::STATE_ROLLED_BACK
    );
}

#[test]
fn swap_rejects_unrelated_services() {
    let store = seeded();
    must_apply(
        &store,
        Command::CreateService {
            service: service("svc-other", "api", "api:1", 1),
        },
        ts(30),
    );
    let err = apply(
        &store,
        Command::SwapBlueGreen {
            primary_id: ServiceId::new("svc-1"),
            shadow_id: ServiceId::new("svc-other"),
        },
        ts(31),
    )
    .unwrap_err();
    assert!(err.to_string().contains("not the blue-green shadow"), "{err}");
}

#[test]
fn revert_restores_primary_and_removes_shadow() {
    let store = seeded();
    with_shadow(&store);
    must_apply(
        &store,
        Command::SwapBlueGreen {
            primary_id: ServiceId::new("svc-1"),
            shadow_id: ServiceId::new("svc-shadow"),
        },
        ts(40),
    );
    must_apply(
        &store,
        Command::RevertBlueGreen {
            primary_id: ServiceId::new("svc-1"),
            shadow_id: ServiceId::new("svc-shadow"),
        },
        ts(41),
    );

    let view = store.view();
    let primary = view.service(&ServiceId::new("svc-1")).unwrap();
    assert!(!primary.labels.contains_key(labels::DEPLOYMENT_STATE));
    assert!(view.service(&ServiceId::new("svc-shadow")).is_none());
}

#[test]
fn finalize_promotes_shadow_and_deletes_old_primary() {
    let store = seeded();
    with_shadow(&store);
    must_apply(
        &store,
        Command::SwapBlueGreen {
            primary_id: ServiceId::new("svc-1"),
            shadow_id: ServiceId::new("svc-shadow"),
        },
        ts(40),
    );
    must_apply(
        &store,
        Command::FinalizeBlueGreen {
            primary_id: ServiceId::new("svc-1"),
            shadow_id: ServiceId::new("svc-shadow"),
        },
        ts(50),
    );

    let view = store.view();
    assert!(view.service(&ServiceId::new("svc-1")).is_none());
    let promoted = view.service(&ServiceId::new("svc-shadow")).unwrap();
    assert!(!promoted.is_shadow());
    // The promoted service now owns the name.
    assert_eq!(view.service_by_name("web").unwrap().id.as_str(), "svc-shadow");
    // Old primary's container is being torn down.
    assert_eq!(
        view.container(&ContainerId::new("c1")).unwrap().desired_state,
        DesiredState::Shutdown
    );
}

// ============================================================================
// Containers
// ============================================================================

#[test]
fn create_container_requires_service_and_node() {
    let store = seeded();
    let err = apply(
        &store,
        Command::CreateContainer {
            container: container("c2", "missing-svc", "n1", 1),
        },
        ts(5),
    )
    .unwrap_err();
    assert!(err.to_string().contains("not found"), "{err}");

    let err = apply(
        &store,
        Command::CreateContainer {
            container: container("c2", "svc-1", "missing-node", 1),
        },
        ts(5),
    )
    .unwrap_err();
    assert!(err.to_string().contains("not found"), "{err}");
}

#[test]
fn restart_resets_failed_container_with_backoff() {
    let store = seeded();
    // Fail the container via a worker report.
    must_apply(
        &store,
        Command::Heartbeat {
            node_id: NodeId::new("n1"),
            available: Resources::ZERO,
            task_statuses: vec![TaskStatus {
                container_id: ContainerId::new("c1"),
                actual_state: ActualState::Failed,
                health: Health::Unknown,
                runtime_id: None,
                error: Some("exit 137".into()),
                finished_at: Some(ts(99)),
            }],
        },
        ts(100),
    );

    must_apply(
        &store,
        Command::RestartContainer {
            id: ContainerId::new("c1"),
            next_start_at: ts(2_100),
        },
        ts(101),
    );

    let view = store.view();
    let c = view.container(&ContainerId::new("c1")).unwrap();
    assert_eq!(c.actual_state, ActualState::Pending);
    assert_eq!(c.restart_count, 1);
    assert_eq!(c.next_start_at, Some(ts(2_100)));
    assert!(c.error.is_none());
    assert!(c.finished_at.is_none());

    // Restarting a non-failed container is rejected.
    let err = apply(
        &store,
        Command::RestartContainer {
            id: ContainerId::new("c1"),
            next_start_at: ts(3_000),
        },
        ts(102),
    )
    .unwrap_err();
    assert!(err.to_string().contains("not in a restartable state"), "{err}");
}

#[test]
fn mark_shutdown_forces_terminal_state_once() {
    let store = seeded();
    must_apply(
        &store,
        Command::MarkContainerShutdown {
            id: ContainerId::new("c1"),
        },
        ts(200),
    );

    let view = store.view();
    let c = view.container(&ContainerId::new("c1")).unwrap();
    assert_eq!(c.actual_state, ActualState::Shutdown);
    assert_eq!(c.finished_at, Some(ts(200)));

    // Idempotent on an already-terminal container.
    must_apply(
        &store,
        Command::MarkContainerShutdown {
            id: ContainerId::new("c1"),
        },
        ts(300),
    );
    let view = store.view();
    assert_eq!(
        view.container(&ContainerId::new("c1")).unwrap().finished_at,
        Some(ts(200))
    );
}

// ============================================================================
// Secrets & volumes
// ============================================================================

#[test]
fn secret_names_are_unique_and_deletable() {
    let store = Store::new();
    let secret = Secret {
        id: SecretId::new("sec-1"),
        name: "db-password".into(),
        ciphertext: vec![9, 9, 9],
        created_at: Timestamp::ZERO,
        updated_at: Timestamp::ZERO,
    };
    must_apply(&store, Command::CreateSecret { secret: secret.clone() }, ts(1));

    let mut dup = secret.clone();
    dup.id = SecretId::new("sec-2");
    let err = apply(&store, Command::CreateSecret { secret: dup }, ts(2)).unwrap_err();
    assert!(err.to_string().contains("already taken"), "{err}");

    must_apply(
        &store,
        Command::DeleteSecret {
            id: SecretId::new("sec-1"),
        },
        ts(3),
    );
    assert!(store.view().secrets().is_empty());
}

#[test]
fn bind_volume_is_first_writer_wins() {
    let store = Store::new();
    must_apply(&store, register_node_cmd("n1", NodeRole::Worker), ts(1));
    must_apply(
        &store,
        Command::CreateVolume {
            volume: Volume {
                id: VolumeId::new("vol-1"),
                name: "data".into(),
                driver: "local".into(),
                driver_opts: BTreeMap::new(),
                labels: BTreeMap::new(),
                bound_node_id: None,
                created_at: Timestamp::ZERO,
                updated_at: Timestamp::ZERO,
            },
        },
        ts(2),
    );

    must_apply(
        &store,
        Command::BindVolume {
            id: VolumeId::new("vol-1"),
            node_id: NodeId::new("n1"),
        },
        ts(3),
    );
    // Same node again: idempotent.
    must_apply(
        &store,
        Command::BindVolume {
            id: VolumeId::new("vol-1"),
            node_id: NodeId::new("n1"),
        },
        ts(4),
    );
    // Different node: rejected.
    let err = apply(
        &store,
        Command::BindVolume {
            id: VolumeId::new("vol-1"),
            node_id: NodeId::new("n2"),
        },
        ts(5),
    )
    .unwrap_err();
    assert!(err.to_string().contains("already bound"), "{err}");
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn identical_command_sequences_produce_identical_stores() {
    let commands = |store: &Store| {
        let results = vec![
            apply(store, register_node_cmd("n1", NodeRole::Hybrid), ts(1)),
            apply(
                store,
                Command::CreateService {
                    service: service("svc-1", "web", "nginx:1", 2),
                },
                ts(2),
            ),
            // This one fails deterministically (duplicate name).
            apply(
                store,
                Command::CreateService {
                    service: service("svc-2", "web", "nginx:1", 2),
                },
                ts(3),
            ),
            apply(
                store,
                Command::CreateContainer {
                    container: container("c1", "svc-1", "n1", 1),
                },
                ts(4),
            ),
        ];
        results
            .into_iter()
            .map(|r| r.is_ok())
            .collect::<Vec<bool>>()
    };

    let a = Store::new();
    let b = Store::new();
    let verdicts_a = commands(&a);
    let verdicts_b = commands(&b);

    assert_eq!(verdicts_a, verdicts_b);
    assert_eq!(verdicts_a, vec![true, true, false, true]);
    assert_eq!(
        a.view().digest().unwrap().as_bytes(),
        b.view().digest().unwrap().as_bytes()
    );
}

#[test]
fn failed_command_leaves_store_untouched() {
    let store = seeded();
    let before = store.view().digest().unwrap();

    // DeleteService on a missing id fails before any cascade runs.
    let _ = apply(
        &store,
        Command::DeleteService {
            id: ServiceId::new("does-not-exist"),
        },
        ts(9),
    )
    .unwrap_err();

    assert_eq!(store.view().digest().unwrap(), before);
}
