//! Tokio loop drivers for the two control loops.
//!
//! Both loops tick on an interval, run only while this node holds
//! leadership, and get kicked immediately when leadership is gained so a
//! fresh leader converges without waiting out a full period.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use warren_kernel::Command;
use warren_store::Store;
use warren_types::{ApiResult, Timestamp};

use crate::reconciler::{ReconcileConfig, plan_reconcile};
use crate::scheduler::plan_schedule;

/// Where control loops send their commands: the replicator's submit path.
pub trait CommandSink: Send + Sync {
    fn submit(&self, cmd: Command) -> impl Future<Output = ApiResult<()>> + Send;
}

/// Periods and sweep knobs for both loops.
#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub scheduler_period_ms: u64,
    pub reconciler_period_ms: u64,
    pub node_down_timeout_ms: u64,
    pub gc_grace_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            scheduler_period_ms: 5_000,
            reconciler_period_ms: 10_000,
            node_down_timeout_ms: 30_000,
            gc_grace_ms: 300_000,
        }
    }
}

impl ControllerConfig {
    fn reconcile(&self) -> ReconcileConfig {
        ReconcileConfig {
            node_down_timeout_ms: self.node_down_timeout_ms,
            gc_grace_ms: self.gc_grace_ms,
        }
    }
}

/// Runs the scheduler loop until the leadership channel closes.
///
/// A cycle that hits a submit error ends early; the next cycle recounts
/// from the store and corrects.
pub async fn run_scheduler<S: CommandSink>(
    store: Arc<Store>,
    sink: S,
    mut is_leader: watch::Receiver<bool>,
    config: ControllerConfig,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(config.scheduler_period_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut placement_failures_total: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !*is_leader.borrow() {
                    continue;
                }
                let view = store.view();
                let plan = plan_schedule(&view, Timestamp::now());
                if plan.placement_failures > 0 {
                    placement_failures_total += u64::from(plan.placement_failures);
                    warn!(
                        cycle = plan.placement_failures,
                        total = placement_failures_total,
                        "placement failures this cycle"
                    );
                }
                for cmd in plan.commands {
                    if let Err(err) = sink.submit(cmd).await {
                        debug!(%err, "scheduler submit failed, ending cycle");
                        break;
                    }
                }
            }
            changed = is_leader.changed() => {
                if changed.is_err() {
                    info!("leadership channel closed, scheduler stopping");
                    return;
                }
                if *is_leader.borrow() {
                    ticker.reset_immediately();
                }
            }
        }
    }
}

/// Runs the reconciler loop until the leadership channel closes.
///
/// Unlike the scheduler, a failed command does not end the cycle: the
/// sweeps are independent and each retries next cycle on its own.
pub async fn run_reconciler<S: CommandSink>(
    store: Arc<Store>,
    sink: S,
    mut is_leader: watch::Receiver<bool>,
    config: ControllerConfig,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(config.reconciler_period_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !*is_leader.borrow() {
                    continue;
                }
                let view = store.view();
                let commands = plan_reconcile(&view, Timestamp::now(), config.reconcile());
                for cmd in commands {
                    if let Err(err) = sink.submit(cmd).await {
                        debug!(%err, "reconciler submit failed, moving on");
                    }
                }
            }
            changed = is_leader.changed() => {
                if changed.is_err() {
                    info!("leadership channel closed, reconciler stopping");
                    return;
                }
                if *is_leader.borrow() {
                    ticker.reset_immediately();
                }
            }
        }
    }
}
