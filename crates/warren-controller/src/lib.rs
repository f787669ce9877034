//! # warren-controller: the desired-state reconciliation engine
//!
//! Two leader-only control loops close the gap between what users declared
//! and what the cluster runs:
//!
//! - The **scheduler** ([`scheduler`]) counts active-intent containers per
//!   service, places the missing ones (deterministically), and marks the
//!   surplus for shutdown.
//! - The **reconciler** ([`reconciler`]) sweeps node liveness, drives
//!   restart policies and garbage collection, and steps the deployment
//!   strategies ([`deploy`]: rolling, blue-green, canary).
//!
//! Each cycle is a pure function of a point-in-time store view: it emits
//! commands and holds no state that matters across cycles, so leader
//! failover just means the next cycle runs on the new leader from the same
//! replicated store. Commands that fail (leader change, lost races against
//! concurrent deletes) are logged and dropped; the next cycle recounts and
//! corrects.

pub mod deploy;
mod driver;
mod placement;
pub mod reconciler;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use driver::{CommandSink, ControllerConfig, run_reconciler, run_scheduler};
pub use placement::{PlacementError, pick_node};
pub use reconciler::{ReconcileConfig, plan_reconcile};
pub use scheduler::{SchedulePlan, plan_schedule};

/// True once a container counts as a ready member of its cohort: running,
/// and healthy as far as its health check can tell. Containers without a
/// configured check never leave `Unknown`, which counts as ready.
pub(crate) fn is_ready(container: &warren_types::Container) -> bool {
    use warren_types::{ActualState, Health};
    container.actual_state == ActualState::Running
        && match container.health {
            Health::Healthy => true,
            Health::Unknown => container.spec.health_check.is_none(),
            Health::Unhealthy => false,
        }
}

/// A deployment-level failure: the container either died or its health
/// check gave up on it. The worker does not kill unhealthy containers;
/// counting them here is how the control plane reacts instead.
pub(crate) fn is_deploy_failure(container: &warren_types::Container) -> bool {
    use warren_types::{ActualState, Health};
    container.actual_state == ActualState::Failed || container.health == Health::Unhealthy
}
