//! End-to-end convergence at the control-plane level: scheduler and
//! reconciler plans applied through the kernel, with a scripted worker
//! reporting container states. No networking, no clocks - the harness owns
//! time - so whole-cluster convergence scenarios run deterministically.

use std::collections::BTreeMap;

use warren_controller::{ReconcileConfig, plan_reconcile, plan_schedule};
use warren_kernel::{Command, apply_to_store};
use warren_store::Store;
use warren_types::{
    ActualState, ContainerId, DesiredState, Health, NodeId, NodeRole, PlacementConstraints,
    Resources, RestartPolicy, Service, ServiceId, ServiceMode, ServiceSpec, TaskStatus, Timestamp,
    UpdateConfig,
};

struct Harness {
    store: Store,
    now_ms: u64,
    config: ReconcileConfig,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Store::new(),
            now_ms: 1_000_000,
            config: ReconcileConfig::default(),
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now_ms)
    }

    fn advance(&mut self, ms: u64) {
        self.now_ms += ms;
    }

    fn apply(&self, cmd: Command) {
        // Deterministic precondition failures are the driver's "log and
        // move on" path; everything else is a bug in the test.
        if let Err(err) = apply_to_store(&self.store, cmd, self.now()) {
            let msg = err.to_string();
            assert!(
                msg.contains("not found")
                    || msg.contains("not in a restartable state")
                    || msg.contains("already"),
                "unexpected apply failure: {msg}"
            );
        }
    }

    fn register_node(&mut self, id: &str, role: NodeRole) {
        self.apply(Command::RegisterNode {
            id: NodeId::new(id),
            role,
            address: format!("10.0.0.1:74{id}"),
            capacity: Resources::new(8_000, 16 << 30, 0),
            labels: BTreeMap::new(),
        });
    }

    fn create_service(&mut self, id: &str, name: &str, image: &str, replicas: u32) {
        self.apply(Command::CreateService {
            service: Service {
                id: ServiceId::new(id),
                name: name.into(),
                spec: ServiceSpec {
                    image: image.into(),
                    replicas,
                    mode: ServiceMode::Replicated,
                    update_config: UpdateConfig::default(),
                    health_check: None,
                    restart_policy: RestartPolicy::default(),
                    resources: Resources::new(100, 64 << 20, 0),
                    volume_mounts: Vec::new(),
                    secret_refs: Vec::new(),
                    env: BTreeMap::new(),
                    command: Vec::new(),
                    stop_timeout_seconds: 10,
                    placement: PlacementConstraints::default(),
                },
                previous_spec: None,
                version: 1,
                labels: BTreeMap::new(),
                created_at: Timestamp::ZERO,
                updated_at: Timestamp::ZERO,
            },
        });
    }

    /// One leader cycle: schedule, then reconcile.
    fn control_cycle(&self) {
        let plan = plan_schedule(&self.store.view(), self.now());
        for cmd in plan.commands {
            self.apply(cmd);
        }
        for cmd in plan_reconcile(&self.store.view(), self.now(), self.config) {
            self.apply(cmd);
        }
    }

    /// The scripted worker on `node`: everything pending comes up running,
    /// everything condemned stops.
    fn worker_report(&self, node: &str) {
        let node_id = NodeId::new(node);
        let view = self.store.view();
        let statuses: Vec<TaskStatus> = view
            .containers_on_node(&node_id)
            .into_iter()
            .filter_map(|c| match (c.desired_state, c.actual_state) {
                (DesiredState::Running, ActualState::Pending) => Some(TaskStatus {
                    container_id: c.id.clone(),
                    actual_state: ActualState::Running,
                    health: Health::Unknown,
                    runtime_id: Some(format!("rt-{}", c.id)),
                    error: None,
                    finished_at: None,
                }),
                (DesiredState::Shutdown, state) if !state.is_terminal() => Some(TaskStatus {
                    container_id: c.id.clone(),
                    actual_state: ActualState::Shutdown,
                    health: Health::Unknown,
                    runtime_id: None,
                    error: None,
                    finished_at: Some(self.now()),
                }),
                _ => None,
            })
            .collect();
        self.apply(Command::Heartbeat {
            node_id,
            available: Resources::new(8_000, 16 << 30, 0),
            task_statuses: statuses,
        });
    }

    /// Runs control cycles with live workers until quiescent.
    fn converge(&mut self, workers: &[&str], rounds: u32) {
        for _ in 0..rounds {
            self.control_cycle();
            for w in workers {
                self.worker_report(w);
            }
            self.advance(5_000);
        }
    }

    fn running_on(&self, node: &str) -> usize {
        let node_id = NodeId::new(node);
        self.store.with_read(|s| {
            s.containers_on_node(&node_id)
                .iter()
                .filter(|c| c.actual_state == ActualState::Running
                    && c.desired_state == DesiredState::Running)
                .count()
        })
    }

    fn total_containers(&self) -> usize {
        self.store.with_read(|s| s.containers().len())
    }

    /// The §3 invariants a committed state must satisfy.
    fn assert_invariants(&self) {
        self.store.with_read(|view| {
            for c in view.containers_iter() {
                if c.desired_state == DesiredState::Running {
                    assert!(
                        view.node(&c.node_id).is_some(),
                        "running-intent container {} references missing node",
                        c.id
                    );
                }
            }
        });
    }
}

#[test]
fn single_node_service_reaches_declared_replicas() {
    let mut h = Harness::new();
    h.register_node("n1", NodeRole::Hybrid);
    h.create_service("svc", "nginx", "nginx:latest", 2);

    h.converge(&["n1"], 2);

    assert_eq!(h.running_on("n1"), 2);
    assert_eq!(h.total_containers(), 2);
    h.assert_invariants();
}

#[test]
fn scale_up_then_down_converges_and_collects() {
    let mut h = Harness::new();
    h.register_node("n1", NodeRole::Hybrid);
    h.create_service("svc", "nginx", "nginx:latest", 2);
    h.converge(&["n1"], 2);

    // Scale 2 -> 4.
    h.apply(Command::ScaleService {
        id: ServiceId::new("svc"),
        replicas: 4,
    });
    h.converge(&["n1"], 2);
    assert_eq!(h.running_on("n1"), 4);

    // Scale 4 -> 1: three stop, then age out of the store.
    h.apply(Command::ScaleService {
        id: ServiceId::new("svc"),
        replicas: 1,
    });
    h.converge(&["n1"], 2);
    assert_eq!(h.running_on("n1"), 1);

    h.advance(300_001); // past gc_grace
    h.converge(&["n1"], 1);
    assert_eq!(h.total_containers(), 1);
    h.assert_invariants();
}

#[test]
fn worker_death_moves_replicas_to_the_survivor() {
    let mut h = Harness::new();
    h.register_node("m1", NodeRole::Manager);
    h.register_node("a", NodeRole::Worker);
    h.register_node("b", NodeRole::Worker);
    h.create_service("svc", "web", "web:1", 4);

    h.converge(&["a", "b"], 2);
    assert_eq!(h.running_on("a"), 2, "placement spreads evenly");
    assert_eq!(h.running_on("b"), 2);

    // Worker a falls silent past the down timeout; only b reports.
    h.advance(31_000);
    h.converge(&["b"], 3);

    assert_eq!(h.running_on("b"), 4, "all four replicas relocated");
    assert_eq!(h.running_on("a"), 0);
    h.store.with_read(|view| {
        let node = view.node(&NodeId::new("a")).unwrap();
        assert_eq!(node.status, warren_types::NodeStatus::Down);
        for c in view.containers_on_node(&NodeId::new("a")) {
            assert_eq!(c.desired_state, DesiredState::Shutdown);
            assert!(c.actual_state.is_terminal(), "closed by the reconciler");
        }
    });
    h.assert_invariants();
}

#[test]
fn returning_node_does_not_reclaim_condemned_work() {
    let mut h = Harness::new();
    h.register_node("a", NodeRole::Hybrid);
    h.register_node("b", NodeRole::Hybrid);
    h.create_service("svc", "web", "web:1", 2);
    h.converge(&["a", "b"], 2);

    // a dies long enough to be replaced...
    h.advance(31_000);
    h.converge(&["b"], 3);
    assert_eq!(h.running_on("b"), 2);

    // ...then comes back. It is Ready again, but the replacements stay
    // where they are and the old containers stay condemned.
    h.converge(&["a", "b"], 2);
    h.store.with_read(|view| {
        assert_eq!(
            view.node(&NodeId::new("a")).unwrap().status,
            warren_types::NodeStatus::Ready
        );
    });
    assert_eq!(h.running_on("b"), 2);
    assert_eq!(h.running_on("a"), 0);
    h.assert_invariants();
}

#[test]
fn scale_to_zero_is_stable() {
    let mut h = Harness::new();
    h.register_node("n1", NodeRole::Hybrid);
    h.create_service("svc", "web", "web:1", 3);
    h.converge(&["n1"], 2);
    assert_eq!(h.running_on("n1"), 3);

    h.apply(Command::ScaleService {
        id: ServiceId::new("svc"),
        replicas: 0,
    });
    h.converge(&["n1"], 2);
    assert_eq!(h.running_on("n1"), 0);

    h.advance(300_001);
    h.converge(&["n1"], 2);
    assert_eq!(h.total_containers(), 0, "replicas=0 is a stable state");
    h.assert_invariants();
}

#[test]
fn failed_container_is_restarted_under_policy() {
    let mut h = Harness::new();
    h.register_node("n1", NodeRole::Hybrid);
    h.create_service("svc", "web", "web:1", 1);
    h.converge(&["n1"], 2);

    let container_id: ContainerId = h.store.with_read(|v| {
        v.containers_iter()
            .find(|c| c.actual_state == ActualState::Running)
            .map(|c| c.id.clone())
            .unwrap()
    });

    // The container fails; the restart policy (3 attempts) kicks in.
    h.apply(Command::Heartbeat {
        node_id: NodeId::new("n1"),
        available: Resources::new(8_000, 16 << 30, 0),
        task_statuses: vec![TaskStatus {
            container_id: container_id.clone(),
            actual_state: ActualState::Failed,
            health: Health::Unknown,
            runtime_id: None,
            error: Some("exit 1".into()),
            finished_at: Some(h.now()),
        }],
    });
    h.control_cycle();
    h.store.with_read(|v| {
        let c = v.container(&container_id).unwrap();
        assert_eq!(c.actual_state, ActualState::Pending, "reset for restart");
        assert_eq!(c.restart_count, 1);
        assert!(c.next_start_at.is_some());
    });
}
