//! Rolling updates: replace stale containers in bounded batches.
//!
//! Each batch marks `parallelism` stale containers for shutdown; the
//! scheduler spawns replacements from the current spec. The next batch
//! waits until every replacement is running and healthy, plus the
//! configured delay. Crossing the failure threshold triggers the
//! configured action - rollback reverts the service spec and the same
//! machinery then drives the bad cohort back out.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};
use warren_kernel::Command;
use warren_store::StoreState;
use warren_types::{Container, ContainerId, DesiredState, FailureAction, Service, Timestamp};

use crate::deploy::{fresh_cohort, oldest_first, stale_active, template};
use crate::{is_deploy_failure, is_ready};

#[allow(clippy::too_many_arguments)]
pub(crate) fn step(
    view: &StoreState,
    service: &Service,
    parallelism: u32,
    delay_ms: u64,
    failure_action: FailureAction,
    failure_threshold: u32,
    now: Timestamp,
    commands: &mut Vec<Command>,
    claimed: &mut BTreeSet<ContainerId>,
) {
    let template = template(service);
    let stale = stale_active(view, service, &template);
    if stale.is_empty() {
        return; // nothing to roll
    }

    let fresh = fresh_cohort(view, service, &template);
    let failed: Vec<&&Container> = fresh.iter().filter(|c| is_deploy_failure(c)).collect();

    match failure_action {
        FailureAction::Rollback => {
            // These failures are ours to resolve; the restart sweep must
            // not reset them while we decide.
            for c in &failed {
                claimed.insert(c.id.clone());
            }
            if failed.len() as u32 >= failure_threshold {
                warn!(
                    service = %service.name,
                    failed = failed.len(),
                    "rolling update exceeded failure threshold, rolling back"
                );
                commands.push(Command::RollbackService {
                    id: service.id.clone(),
                });
                for c in failed {
                    if c.desired_state == DesiredState::Running {
                        commands.push(Command::UpdateContainerDesired {
                            id: c.id.clone(),
                            desired_state: DesiredState::Shutdown,
                        });
                    }
                }
                return;
            }
        }
        FailureAction::Pause => {
            if failed.len() as u32 >= failure_threshold {
                debug!(service = %service.name, "rolling update paused on failures");
                return;
            }
        }
        FailureAction::Continue => {}
    }

    // Wait for the previous batch's replacements to come up.
    let in_flight = fresh
        .iter()
        .filter(|c| c.is_active_intent() && !is_ready(c))
        .count();
    if in_flight > 0 {
        return;
    }

    // Sleep between batches: measured from the most recent shutdown we
    // issued for this service.
    if delay_ms > 0 {
        let last_shutdown = view
            .containers_of_service(&service.id)
            .into_iter()
            .filter(|c| c.desired_state == DesiredState::Shutdown)
            .map(|c| c.updated_at)
            .max();
        if let Some(at) = last_shutdown {
            if now.millis_since(at) < delay_ms {
                return;
            }
        }
    }

    let batch = oldest_first(stale);
    let take = parallelism.max(1) as usize;
    info!(
        service = %service.name,
        batch = batch.len().min(take),
        remaining = batch.len(),
        "rolling next batch"
    );
    for container in batch.into_iter().take(take) {
        commands.push(Command::UpdateContainerDesired {
            id: container.id.clone(),
            desired_state: DesiredState::Shutdown,
        });
    }
}
