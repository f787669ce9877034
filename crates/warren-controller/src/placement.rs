//! Placement: choosing the node a new container lands on.
//!
//! The algorithm is deterministic - same store view, same answer, on any
//! replica and at any time:
//!
//! 1. Eligible = Ready nodes with a workload role, enough available
//!    resources, matching the service's node selector, and not excluded by
//!    anti-affinity (in either direction).
//! 2. A volume bound to a node pins the candidate set to that node.
//! 3. Pick the node with the fewest active-intent containers of this
//!    service; tie-break on fewest total active containers; final
//!    tie-break on lexicographic node ID.
//!
//! Each call walks the container bucket once up front ([`NodeFacts`]) and
//! the node bucket once to choose; the cycle re-runs this cheaply every
//! scheduling period, which is what keeps rescheduling idempotent.

use std::collections::{BTreeMap, BTreeSet};

use warren_store::StoreState;
use warren_types::{Container, NodeId, Resources, Service};

/// Why no node could be chosen. Recorded, counted, retried next cycle,
/// never a command failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("no eligible node for service {service}")]
    NoEligibleNode { service: String },

    #[error("volume {volume} is bound to node {node}, which is not eligible")]
    BoundNodeUnavailable { volume: String, node: NodeId },
}

/// Cycle-local adjustments: containers placed earlier in this same cycle
/// occupy capacity before any of it is committed.
#[derive(Debug, Default)]
pub struct CycleLoad {
    /// Resources claimed on each node this cycle.
    claimed: BTreeMap<NodeId, Resources>,
    /// Containers of (node, service) placed this cycle.
    per_service: BTreeMap<(NodeId, String), u32>,
    /// Total containers placed on each node this cycle.
    per_node: BTreeMap<NodeId, u32>,
}

impl CycleLoad {
    pub fn record(&mut self, node: &NodeId, service: &Service, resources: &Resources) {
        let claimed = self.claimed.entry(node.clone()).or_default();
        *claimed = claimed.saturating_add(resources);
        *self
            .per_service
            .entry((node.clone(), service.id.to_string()))
            .or_default() += 1;
        *self.per_node.entry(node.clone()).or_default() += 1;
    }

    fn claimed_on(&self, node: &NodeId) -> Resources {
        self.claimed.get(node).copied().unwrap_or(Resources::ZERO)
    }

    fn service_count(&self, node: &NodeId, service: &Service) -> u32 {
        self.per_service
            .get(&(node.clone(), service.id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn node_count(&self, node: &NodeId) -> u32 {
        self.per_node.get(node).copied().unwrap_or(0)
    }
}

/// Per-node facts for one service, gathered in a single pass over the
/// container bucket: how many active-intent containers each node hosts
/// (of this service and in total), and which nodes anti-affinity rules
/// exclude.
#[derive(Debug, Default)]
struct NodeFacts {
    mine: BTreeMap<NodeId, u32>,
    total: BTreeMap<NodeId, u32>,
    excluded: BTreeSet<NodeId>,
}

impl NodeFacts {
    /// Anti-affinity cuts both ways: the service refuses nodes hosting the
    /// services it names, and any hosted service naming ours refuses us.
    fn gather(view: &StoreState, service: &Service) -> Self {
        let mut facts = Self::default();
        for container in view.containers_iter() {
            if !container.is_active_intent() {
                continue;
            }
            *facts.total.entry(container.node_id.clone()).or_default() += 1;
            if container.service_id == service.id {
                *facts.mine.entry(container.node_id.clone()).or_default() += 1;
            }
            if facts.excluded.contains(&container.node_id) {
                continue;
            }
            let Some(hosted) = view.service(&container.service_id) else {
                continue;
            };
            let conflict = service
                .spec
                .placement
                .anti_affinity
                .iter()
                .any(|name| *name == hosted.name)
                || hosted
                    .spec
                    .placement
                    .anti_affinity
                    .iter()
                    .any(|name| *name == service.name);
            if conflict {
                facts.excluded.insert(container.node_id.clone());
            }
        }
        facts
    }
}

/// Chooses a node for one new container of `service`, or explains why none
/// fits.
pub fn pick_node(
    view: &StoreState,
    service: &Service,
    load: &CycleLoad,
) -> Result<NodeId, PlacementError> {
    let facts = NodeFacts::gather(view, service);

    // A volume with node affinity pins the candidate set before anything
    // else is considered.
    let pinned = pinned_node(view, service);

    let mut best: Option<(&NodeId, (u32, u32))> = None;
    for node in view.nodes_iter() {
        let eligible = node.is_eligible()
            && node.matches_selector(&service.spec.placement.node_selector)
            && !facts.excluded.contains(&node.id)
            && node
                .available
                .saturating_sub(&load.claimed_on(&node.id))
                .can_fit(&service.spec.resources);

        if let Some((volume, pin)) = &pinned {
            if &node.id != pin {
                continue;
            }
            if !eligible {
                return Err(PlacementError::BoundNodeUnavailable {
                    volume: volume.clone(),
                    node: (*pin).clone(),
                });
            }
        } else if !eligible {
            continue;
        }

        let mine = facts.mine.get(&node.id).copied().unwrap_or(0)
            + load.service_count(&node.id, service);
        let total = facts.total.get(&node.id).copied().unwrap_or(0)
            + load.node_count(&node.id);
        let key = (mine, total);
        // Nodes iterate in ascending ID order, so `<` keeps the
        // lexicographically smallest ID among ties.
        if best.as_ref().is_none_or(|(_, best_key)| key < *best_key) {
            best = Some((&node.id, key));
        }
    }

    best.map(|(node, _)| node.clone()).ok_or_else(|| {
        PlacementError::NoEligibleNode {
            service: service.name.clone(),
        }
    })
}

/// The single node a bound volume pins this service to, if any.
fn pinned_node(view: &StoreState, service: &Service) -> Option<(String, NodeId)> {
    for mount in &service.spec.volume_mounts {
        if let Some(volume) = view.volume_by_name(&mount.volume_name) {
            if let Some(node) = &volume.bound_node_id {
                return Some((volume.name.clone(), node.clone()));
            }
        }
    }
    None
}

/// Active-intent containers of a service, in key order.
pub(crate) fn active_intent_of<'a>(view: &'a StoreState, service: &Service) -> Vec<&'a Container> {
    view.containers_of_service(&service.id)
        .into_iter()
        .filter(|c| c.is_active_intent())
        .collect()
}
