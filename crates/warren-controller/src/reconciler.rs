//! The reconciler cycle: liveness, recovery, garbage collection, and
//! deployment stepping.
//!
//! Order inside a cycle matters: the deployment drivers run first and
//! *claim* the failed containers whose fate they decide (rollback), so the
//! restart sweep does not resurrect a container the driver is about to
//! tear down.

use std::collections::BTreeSet;

use tracing::debug;
use warren_kernel::Command;
use warren_store::StoreState;
use warren_types::{ActualState, DesiredState, NodeId, NodeStatus, RestartCondition, Timestamp};

use crate::deploy;

/// Knobs of the reconciler sweeps.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// A Ready node missing heartbeats this long is marked Down.
    pub node_down_timeout_ms: u64,
    /// Terminal containers linger this long before deletion.
    pub gc_grace_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            node_down_timeout_ms: 30_000,
            gc_grace_ms: 300_000,
        }
    }
}

/// Plans one reconciler cycle over a point-in-time view.
pub fn plan_reconcile(view: &StoreState, now: Timestamp, config: ReconcileConfig) -> Vec<Command> {
    let mut commands = Vec::new();

    // Deployment strategies first; they claim containers they will handle.
    let claimed = deploy::plan_deployments(view, now, &mut commands);

    let down = node_sweep(view, now, config, &mut commands);
    container_sweep(view, now, config, &claimed, &down, &mut commands);
    commands
}

/// Node health: missing heartbeats mark a node Down, and a Down node's
/// containers are marked for shutdown so the scheduler replaces them
/// elsewhere. One-shot: a node that heartbeats again becomes Ready, but
/// its old containers stay condemned - a flapping node does not reclaim
/// work.
fn node_sweep(
    view: &StoreState,
    now: Timestamp,
    config: ReconcileConfig,
    commands: &mut Vec<Command>,
) -> BTreeSet<NodeId> {
    let mut down: BTreeSet<NodeId> = BTreeSet::new();

    for node in view.nodes_iter() {
        match node.status {
            NodeStatus::Ready | NodeStatus::Unknown => {
                if now.millis_since(node.last_heartbeat) > config.node_down_timeout_ms {
                    debug!(node = %node.id, "node missed heartbeats, marking down");
                    commands.push(Command::UpdateNodeStatus {
                        id: node.id.clone(),
                        status: NodeStatus::Down,
                    });
                    down.insert(node.id.clone());
                }
            }
            NodeStatus::Down => {
                down.insert(node.id.clone());
            }
        }
    }

    for container in view.containers_iter() {
        let node_gone = view.node(&container.node_id).is_none();
        if !node_gone && !down.contains(&container.node_id) {
            continue;
        }
        if container.desired_state == DesiredState::Running {
            commands.push(Command::UpdateContainerDesired {
                id: container.id.clone(),
                desired_state: DesiredState::Shutdown,
            });
        }
        // No worker will ever report for this container; close its record
        // so garbage collection can reach it.
        if !container.actual_state.is_terminal() {
            commands.push(Command::MarkContainerShutdown {
                id: container.id.clone(),
            });
        }
    }
    down
}

/// Container health: restart failed containers under their policy, replace
/// the ones past help, and delete terminal records past the grace period.
fn container_sweep(
    view: &StoreState,
    now: Timestamp,
    config: ReconcileConfig,
    claimed: &BTreeSet<warren_types::ContainerId>,
    down: &BTreeSet<NodeId>,
    commands: &mut Vec<Command>,
) {
    for container in view.containers_iter() {
        if container.is_gc_eligible(now, config.gc_grace_ms) {
            commands.push(Command::DeleteContainer {
                id: container.id.clone(),
            });
            continue;
        }

        if container.desired_state != DesiredState::Running {
            continue;
        }
        if claimed.contains(&container.id) {
            continue; // a deployment driver owns this one
        }
        if down.contains(&container.node_id) || view.node(&container.node_id).is_none() {
            continue; // the node sweep already condemned it
        }

        match container.actual_state {
            ActualState::Failed => {
                let policy = &container.spec.restart_policy;
                let applies = matches!(
                    policy.condition,
                    RestartCondition::OnFailure | RestartCondition::Always
                );
                if applies && container.restart_count < policy.max_attempts {
                    // Exponential backoff: delay doubles per attempt.
                    let shift = container.restart_count.min(16);
                    let delay = policy.delay_ms.saturating_mul(1 << shift);
                    commands.push(Command::RestartContainer {
                        id: container.id.clone(),
                        next_start_at: now.saturating_add_millis(delay),
                    });
                } else {
                    // Out of attempts (or never restartable): replace. The
                    // scheduler creates the successor once this one stops
                    // counting as active intent.
                    commands.push(Command::UpdateContainerDesired {
                        id: container.id.clone(),
                        desired_state: DesiredState::Shutdown,
                    });
                }
            }
            ActualState::Complete => {
                // One-shot completion: retire the record; replicated
                // services get a successor from the scheduler.
                commands.push(Command::UpdateContainerDesired {
                    id: container.id.clone(),
                    desired_state: DesiredState::Shutdown,
                });
            }
            _ => {}
        }
    }
}
