//! Canary deployments: grow the new cohort through percentage steps,
//! watching a stability window at each one.
//!
//! The canary cohort is simply the containers matching the current
//! template. Each advancement shuts down enough stale containers that the
//! scheduler's replacements bring the fresh share up to the next step's
//! percentage. Any deployment-level failure inside the cohort aborts the
//! whole thing: the service spec rolls back and the canaries are torn
//! down, restoring the old side to 100%.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};
use warren_kernel::Command;
use warren_store::StoreState;
use warren_types::{ContainerId, DesiredState, Service, Timestamp};

use crate::deploy::{fresh_cohort, oldest_first, stale_active, template};
use crate::{is_deploy_failure, is_ready};

pub(crate) fn step(
    view: &StoreState,
    service: &Service,
    steps: &[u8],
    stability_window_ms: u64,
    now: Timestamp,
    commands: &mut Vec<Command>,
    claimed: &mut BTreeSet<ContainerId>,
) {
    let template = template(service);
    let stale = stale_active(view, service, &template);
    if stale.is_empty() {
        return; // fully converged
    }

    let fresh = fresh_cohort(view, service, &template);
    let failed: Vec<_> = fresh.iter().filter(|c| is_deploy_failure(c)).collect();
    for c in &fresh {
        claimed.insert(c.id.clone());
    }

    // One bad canary aborts the deployment outright.
    if !failed.is_empty() {
        warn!(
            service = %service.name,
            failed = failed.len(),
            "canary failed, rolling back"
        );
        commands.push(Command::RollbackService {
            id: service.id.clone(),
        });
        for c in fresh {
            if c.desired_state == DesiredState::Running {
                commands.push(Command::UpdateContainerDesired {
                    id: c.id.clone(),
                    desired_state: DesiredState::Shutdown,
                });
            }
        }
        return;
    }

    let fresh_active: Vec<_> = fresh.iter().filter(|c| c.is_active_intent()).collect();

    // Everything placed so far must be up...
    if fresh_active.iter().any(|c| !is_ready(c)) {
        return;
    }
    // ...and must have soaked through the stability window.
    if let Some(newest) = fresh_active.iter().map(|c| c.created_at).max() {
        if now.millis_since(newest) < stability_window_ms {
            debug!(service = %service.name, "canary inside stability window");
            return;
        }
    }

    let replicas = service.spec.replicas;
    let fresh_count = fresh_active.len() as u32;
    let next_target = steps
        .iter()
        .map(|pct| percent_of(replicas, *pct))
        .filter(|target| *target > fresh_count)
        .min()
        .unwrap_or(replicas)
        .min(replicas);

    let convert = next_target.saturating_sub(fresh_count) as usize;
    if convert == 0 {
        return;
    }
    info!(
        service = %service.name,
        from = fresh_count,
        to = next_target,
        "advancing canary"
    );
    for container in oldest_first(stale).into_iter().take(convert) {
        commands.push(Command::UpdateContainerDesired {
            id: container.id.clone(),
            desired_state: DesiredState::Shutdown,
        });
    }
}

/// `ceil(total * pct / 100)`, saturating at the replica count.
fn percent_of(total: u32, pct: u8) -> u32 {
    let raw = (u64::from(total) * u64::from(pct)).div_ceil(100);
    (raw as u32).min(total)
}

#[cfg(test)]
mod tests {
    use super::percent_of;
    use test_case::test_case;

    #[test_case(10, 10, 1)]
    #[test_case(10, 50, 5)]
    #[test_case(10, 100, 10)]
    #[test_case(3, 10, 1; "rounds up")]
    #[test_case(3, 200, 3; "clamped to replicas")]
    #[test_case(0, 50, 0)]
    fn percent_math(total: u32, pct: u8, expected: u32) {
        assert_eq!(percent_of(total, pct), expected);
    }
}
