//! Blue-green deployments: build a full standby cohort, swap atomically,
//! keep the old side for a grace period.
//!
//! The shadow service carries the new spec under the primary's name with
//! `deployment.original-service` pointing back. The scheduler treats it
//! like any service, so the standby cohort materializes on its own. Once
//! every standby container is ready the swap is one atomic command; after
//! the grace period the old side is finalized away. A rollback within the
//! grace period is the reverse swap, driven by the manual-rollback API.

use tracing::{debug, info};
use warren_kernel::Command;
use warren_store::StoreState;
use warren_types::{Service, ServiceId, Timestamp, labels};

use crate::deploy::{stale_active, template};
use crate::is_ready;
use crate::placement::active_intent_of;

pub(crate) fn step(
    view: &StoreState,
    service: &Service,
    grace_period_ms: u64,
    now: Timestamp,
    commands: &mut Vec<Command>,
) {
    let shadow = view.shadow_of(&service.id);
    let swapped_at = service
        .labels
        .get(labels::DEPLOYMENT_SWAPPED_AT)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Timestamp::from_millis);

    match (shadow, swapped_at) {
        // Post-swap: retire the old side once the grace period lapses.
        (Some(shadow), Some(at)) => {
            if now.millis_since(at) > grace_period_ms {
                info!(service = %service.name, "blue-green grace elapsed, finalizing");
                commands.push(Command::FinalizeBlueGreen {
                    primary_id: service.id.clone(),
                    shadow_id: shadow.id.clone(),
                });
            }
        }

        // Standby phase: swap when the cohort is complete and ready.
        (Some(shadow), None) => {
            let cohort = active_intent_of(view, shadow);
            let complete = cohort.len() as u32 == shadow.spec.replicas;
            if complete && cohort.iter().all(|c| is_ready(c)) {
                info!(service = %service.name, "standby cohort healthy, swapping");
                commands.push(Command::SwapBlueGreen {
                    primary_id: service.id.clone(),
                    shadow_id: shadow.id.clone(),
                });
            }
        }

        // An update is pending and no shadow exists yet: create one.
        (None, None) => {
            let template = template(service);
            if service.previous_spec.is_some()
                && !stale_active(view, service, &template).is_empty()
            {
                info!(service = %service.name, "creating blue-green standby service");
                commands.push(Command::CreateService {
                    service: shadow_service(service),
                });
            }
        }

        // Swap labels without a shadow: finalize already removed it but the
        // label write lost a race. Harmless; the next primary update
        // overwrites the labels.
        (None, Some(_)) => {
            debug!(service = %service.name, "swap marker without shadow, ignoring");
        }
    }
}

/// The standby service: new spec, same name, sized to the primary's
/// replica count, marked as a shadow of the primary.
fn shadow_service(primary: &Service) -> Service {
    let mut labels_map = std::collections::BTreeMap::new();
    labels_map.insert(
        labels::DEPLOYMENT_ORIGINAL_SERVICE.to_string(),
        primary.id.to_string(),
    );
    labels_map.insert(
        labels::DEPLOYMENT_STATE.to_string(),
        labels::STATE_STANDBY.to_string(),
    );
    Service {
        id: ServiceId::random(),
        name: primary.name.clone(),
        spec: primary.spec.clone(),
        previous_spec: None,
        version: primary.version,
        labels: labels_map,
        created_at: Timestamp::ZERO,
        updated_at: Timestamp::ZERO,
    }
}
