//! Deployment strategy drivers.
//!
//! All three strategies share one primitive: flip `desired_state` on
//! existing containers and let the scheduler spawn replacements from the
//! service's current spec. Their progress state lives entirely in the
//! store (container spec snapshots, service labels), so a new leader
//! resumes a half-finished deployment from the store alone.
//!
//! Staleness is spec-content based, not version-number based: a container
//! is stale when its frozen spec no longer matches the service's current
//! container template. This makes rollback convergent - once the service
//! spec reverts, the surviving old containers match again and only the
//! bad cohort is driven out.

mod blue_green;
mod canary;
mod rolling;

use std::collections::BTreeSet;

use warren_kernel::Command;
use warren_store::StoreState;
use warren_types::{Container, ContainerId, ContainerSpec, DeployStrategy, Service, Timestamp};

/// Steps every service's deployment, appending commands. Returns the set
/// of containers whose failures are owned by a driver this cycle; the
/// restart sweep must leave those alone.
pub(crate) fn plan_deployments(
    view: &StoreState,
    now: Timestamp,
    commands: &mut Vec<Command>,
) -> BTreeSet<ContainerId> {
    let mut claimed = BTreeSet::new();
    for service in view.services_iter() {
        if service.is_shadow() {
            continue; // stepped through its primary
        }
        match &service.spec.update_config.strategy {
            DeployStrategy::Rolling {
                parallelism,
                delay_ms,
                failure_action,
                failure_threshold,
            } => rolling::step(
                view,
                service,
                *parallelism,
                *delay_ms,
                *failure_action,
                *failure_threshold,
                now,
                commands,
                &mut claimed,
            ),
            DeployStrategy::BlueGreen { grace_period_ms } => {
                blue_green::step(view, service, *grace_period_ms, now, commands);
            }
            DeployStrategy::Canary {
                steps,
                stability_window_ms,
            } => canary::step(
                view,
                service,
                steps,
                *stability_window_ms,
                now,
                commands,
                &mut claimed,
            ),
        }
    }
    claimed
}

/// The container template a fresh container of this service would carry.
pub(crate) fn template(service: &Service) -> ContainerSpec {
    ContainerSpec::from(&service.spec)
}

/// Active-intent containers running an outdated template.
pub(crate) fn stale_active<'a>(
    view: &'a StoreState,
    service: &Service,
    template: &ContainerSpec,
) -> Vec<&'a Container> {
    view.containers_of_service(&service.id)
        .into_iter()
        .filter(|c| c.is_active_intent() && c.spec != *template)
        .collect()
}

/// Containers of the current template still meant to run (any actual
/// state: the failed ones matter for rollback decisions).
pub(crate) fn fresh_cohort<'a>(
    view: &'a StoreState,
    service: &Service,
    template: &ContainerSpec,
) -> Vec<&'a Container> {
    view.containers_of_service(&service.id)
        .into_iter()
        .filter(|c| {
            c.desired_state == warren_types::DesiredState::Running && c.spec == *template
        })
        .collect()
}

/// Oldest-first, ID-tie-broken ordering for picking the next batch.
pub(crate) fn oldest_first<'a>(mut containers: Vec<&'a Container>) -> Vec<&'a Container> {
    containers.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    containers
}
