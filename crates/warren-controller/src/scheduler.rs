//! The scheduler cycle: count, place, trim.
//!
//! Each cycle recounts active-intent containers per service from a store
//! view and emits the commands that close the gap. Nothing is remembered
//! between cycles, so re-running a cycle against an unchanged view emits
//! nothing - idempotence by recounting, not by deduplication.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};
use warren_kernel::Command;
use warren_store::StoreState;
use warren_types::{
    Container, ContainerId, ContainerSpec, DesiredState, Health, NodeId, Service, ServiceMode,
    Timestamp, labels,
};

use crate::placement::{CycleLoad, active_intent_of, pick_node};

/// The outcome of one scheduler cycle.
#[derive(Debug, Default)]
pub struct SchedulePlan {
    pub commands: Vec<Command>,
    /// Containers that could not be placed this cycle. Visible through
    /// inspection and logs; never a command failure. Retried next cycle.
    pub placement_failures: u32,
}

/// Plans one scheduler cycle over a point-in-time view.
pub fn plan_schedule(view: &StoreState, now: Timestamp) -> SchedulePlan {
    let mut plan = SchedulePlan::default();
    let mut load = CycleLoad::default();

    for service in view.services_iter() {
        match service.spec.mode {
            ServiceMode::Replicated => plan_replicated(view, service, &mut load, now, &mut plan),
            ServiceMode::Global => plan_global(view, service, &mut load, now, &mut plan),
        }
    }
    plan
}

fn plan_replicated(
    view: &StoreState,
    service: &Service,
    load: &mut CycleLoad,
    now: Timestamp,
    plan: &mut SchedulePlan,
) {
    let active = active_intent_of(view, service);
    let desired = i64::from(service.spec.replicas);
    let delta = desired - active.len() as i64;

    if delta > 0 {
        for _ in 0..delta {
            match pick_node(view, service, load) {
                Ok(node_id) => {
                    load.record(&node_id, service, &service.spec.resources);
                    plan.commands.push(Command::CreateContainer {
                        container: new_container(service, node_id, now),
                    });
                }
                Err(err) => {
                    plan.placement_failures += 1;
                    warn!(service = %service.name, %err, "placement failed");
                }
            }
        }
    } else if delta < 0 {
        for container in scale_down_victims(&active, (-delta) as usize) {
            plan.commands.push(Command::UpdateContainerDesired {
                id: container.id.clone(),
                desired_state: DesiredState::Shutdown,
            });
        }
    }
}

/// Scale-down victims: repeatedly take from the node hosting the most of
/// this service, newest container first. Deterministic throughout.
fn scale_down_victims<'a>(active: &[&'a Container], count: usize) -> Vec<&'a Container> {
    let mut remaining: Vec<&Container> = active.to_vec();
    let mut victims = Vec::with_capacity(count);

    for _ in 0..count {
        let mut per_node: BTreeMap<&NodeId, u32> = BTreeMap::new();
        for c in &remaining {
            *per_node.entry(&c.node_id).or_default() += 1;
        }
        // Most loaded node; ties resolve to the smallest node ID.
        let Some(target_node) = per_node
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(node, _)| (*node).clone())
        else {
            break;
        };
        // Newest container on that node; ties resolve by ID.
        let Some(idx) = remaining
            .iter()
            .enumerate()
            .filter(|(_, c)| c.node_id == target_node)
            .max_by_key(|(_, c)| (c.created_at, c.id.clone()))
            .map(|(idx, _)| idx)
        else {
            break;
        };
        victims.push(remaining.swap_remove(idx));
    }
    victims
}

fn plan_global(
    view: &StoreState,
    service: &Service,
    load: &mut CycleLoad,
    now: Timestamp,
    plan: &mut SchedulePlan,
) {
    let active = active_intent_of(view, service);

    // One container per suitable node: shut down the ones on nodes that no
    // longer qualify (label drift, node gone, role change) and duplicates.
    let mut kept: BTreeSet<NodeId> = BTreeSet::new();
    for container in &active {
        let suitable = view.node(&container.node_id).is_some_and(|node| {
            node.role.hosts_workloads()
                && node.matches_selector(&service.spec.placement.node_selector)
        });
        if !suitable || kept.contains(&container.node_id) {
            debug!(service = %service.name, container = %container.id, "global container off-policy");
            plan.commands.push(Command::UpdateContainerDesired {
                id: container.id.clone(),
                desired_state: DesiredState::Shutdown,
            });
        } else {
            kept.insert(container.node_id.clone());
        }
    }

    // And one on every eligible node that lacks one.
    for node in view.nodes_iter() {
        if !node.is_eligible() || !node.matches_selector(&service.spec.placement.node_selector) {
            continue;
        }
        if kept.contains(&node.id) {
            continue;
        }
        load.record(&node.id, service, &service.spec.resources);
        plan.commands.push(Command::CreateContainer {
            container: new_container(service, node.id.clone(), now),
        });
    }
}

/// Builds the full container record: a frozen snapshot of the service spec
/// plus the deployment bookkeeping labels. The container's life is
/// controlled by these fields from here on, never re-read from the service.
fn new_container(service: &Service, node_id: NodeId, now: Timestamp) -> Container {
    let mut container_labels = BTreeMap::new();
    container_labels.insert(
        labels::DEPLOYMENT_VERSION.to_string(),
        service.version.to_string(),
    );
    container_labels.insert(
        labels::DEPLOYMENT_STRATEGY.to_string(),
        service.spec.update_config.strategy.label_value().to_string(),
    );
    let state = service
        .labels
        .get(labels::DEPLOYMENT_STATE)
        .cloned()
        .unwrap_or_else(|| labels::STATE_ACTIVE.to_string());
    container_labels.insert(labels::DEPLOYMENT_STATE.to_string(), state);

    Container {
        id: ContainerId::random(),
        service_id: service.id.clone(),
        service_version: service.version,
        node_id,
        desired_state: DesiredState::Running,
        actual_state: warren_types::ActualState::Pending,
        health: Health::Unknown,
        spec: ContainerSpec::from(&service.spec),
        labels: container_labels,
        error: None,
        restart_count: 0,
        next_start_at: None,
        finished_at: None,
        created_at: now,
        updated_at: now,
    }
}
