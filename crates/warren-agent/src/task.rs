//! The per-container lifecycle task.
//!
//! One tokio task drives one container through its states, reporting every
//! transition to the coordinator over a channel:
//!
//! ```text
//! (spawned)
//!    │ restart backoff, if any
//!    ▼
//! PULLING ──pull error──► FAILED
//!    ▼
//! CREATING ─create error─► FAILED
//!    ▼
//! STARTING ─start error──► FAILED
//!    ▼
//! RUNNING ──exit 0──► COMPLETE        exit ≠ 0 ──► FAILED
//!    │
//!    │ stop signal
//!    ▼
//! STOPPING ──graceful, stop_timeout, then kill──► SHUTDOWN
//! ```
//!
//! Health checks run inside the task while the container is up. An
//! unhealthy container is reported, never killed locally: replacement is
//! the control plane's call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use warren_types::{ActualState, Container, Health, TaskStatus, Timestamp};

use crate::health::{HealthTracker, probe};
use crate::runtime::{RunConfig, Runtime, RuntimeError};

/// What a lifecycle task tells the coordinator.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// The container's observed state or health changed.
    StateChanged(TaskStatus),
}

/// What the coordinator tells a lifecycle task (via its watch channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskCommand {
    /// Keep driving toward running.
    #[default]
    Run,
    /// Stop gracefully and clean up.
    Stop,
}

struct Reporter {
    container: Container,
    events: mpsc::Sender<TaskEvent>,
    runtime_id: Option<String>,
    health: Health,
}

impl Reporter {
    async fn report(&self, state: ActualState, error: Option<String>) {
        let status = TaskStatus {
            container_id: self.container.id.clone(),
            actual_state: state,
            health: self.health,
            runtime_id: self.runtime_id.clone(),
            error,
            finished_at: state.is_terminal().then(Timestamp::now),
        };
        // A full channel means the coordinator is gone; nothing to do.
        let _ = self.events.send(TaskEvent::StateChanged(status)).await;
    }
}

/// Drives one container to completion. Consumes the task; respawning is
/// always a fresh record from the control plane.
///
/// `pull_timeout` bounds the image pull: pulls are allowed to be slow, but
/// a hung Runtime must still surface as a failed container, not a stuck
/// lifecycle task.
pub(crate) async fn run_container<R: Runtime>(
    container: Container,
    config: RunConfig,
    runtime: Arc<R>,
    pull_timeout: Duration,
    mut command: watch::Receiver<TaskCommand>,
    events: mpsc::Sender<TaskEvent>,
) {
    let mut reporter = Reporter {
        container,
        events,
        runtime_id: None,
        health: Health::Unknown,
    };

    // Restart backoff: the control plane encodes the earliest start time.
    if let Some(at) = reporter.container.next_start_at {
        let now = Timestamp::now();
        if at > now {
            let wait = Duration::from_millis(at.millis_since(now));
            debug!(container = %reporter.container.id, ?wait, "restart backoff");
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = wait_for_stop(&mut command) => {
                    reporter.report(ActualState::Shutdown, None).await;
                    return;
                }
            }
        }
    }

    // PULLING
    match tokio::time::timeout(pull_timeout, runtime.pull(&config.image)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            reporter.report(ActualState::Failed, Some(err.to_string())).await;
            return;
        }
        Err(_) => {
            reporter
                .report(
                    ActualState::Failed,
                    Some(format!(
                        "image pull timed out after {}s",
                        pull_timeout.as_secs()
                    )),
                )
                .await;
            return;
        }
    }

    // CREATING
    let runtime_id = match runtime.create(reporter.container.id.as_str(), &config).await {
        Ok(id) => id,
        Err(err) => {
            reporter.report(ActualState::Failed, Some(err.to_string())).await;
            return;
        }
    };
    reporter.runtime_id = Some(runtime_id.clone());

    // STARTING
    if let Err(err) = runtime.start(&runtime_id).await {
        reporter.report(ActualState::Failed, Some(err.to_string())).await;
        remove_quietly(&*runtime, &runtime_id).await;
        return;
    }
    info!(container = %reporter.container.id, runtime_id, "container running");
    reporter.report(ActualState::Running, None).await;

    // RUNNING: wait for exit, a stop order, or the next health probe.
    let health_check = reporter.container.spec.health_check.clone();
    let mut tracker = health_check
        .as_ref()
        .map(|hc| (HealthTracker::new(hc.retries), hc.clone()));
    let mut health_timer = health_check.as_ref().map(|hc| {
        let mut t = tokio::time::interval(Duration::from_millis(hc.interval_ms.max(100)));
        t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        t
    });

    let wait_fut = runtime.wait(&runtime_id);
    tokio::pin!(wait_fut);

    loop {
        tokio::select! {
            exit = &mut wait_fut => {
                match exit {
                    Ok(0) => reporter.report(ActualState::Complete, None).await,
                    Ok(code) => {
                        reporter
                            .report(ActualState::Failed, Some(format!("exit code {code}")))
                            .await;
                    }
                    Err(err) => {
                        reporter.report(ActualState::Failed, Some(err.to_string())).await;
                    }
                }
                break;
            }

            _ = wait_for_stop(&mut command) => {
                // STOPPING: graceful signal, stop_timeout, then kill (the
                // Runtime folds the escalation into `stop`).
                let timeout =
                    Duration::from_secs(reporter.container.spec.stop_timeout_seconds);
                if let Err(err) = runtime.stop(&runtime_id, timeout).await {
                    warn!(container = %reporter.container.id, %err, "stop failed");
                }
                reporter.report(ActualState::Shutdown, None).await;
                break;
            }

            _ = tick(&mut health_timer) => {
                if let Some((tracker, hc)) = tracker.as_mut() {
                    let healthy = probe(
                        &hc.probe,
                        &*runtime,
                        &runtime_id,
                        Duration::from_millis(hc.timeout_ms.max(1)),
                    )
                    .await;
                    if let Some(flipped) = tracker.observe(healthy) {
                        reporter.health = flipped;
                        debug!(container = %reporter.container.id, ?flipped, "health changed");
                        reporter.report(ActualState::Running, None).await;
                    }
                }
            }
        }
    }

    // Cleanup: engine record and the container's materialized secrets
    // (the coordinator removes those on the terminal event).
    remove_quietly(&*runtime, &runtime_id).await;
}

async fn wait_for_stop(command: &mut watch::Receiver<TaskCommand>) {
    loop {
        if *command.borrow() == TaskCommand::Stop {
            return;
        }
        if command.changed().await.is_err() {
            // Coordinator gone; treat as stop.
            return;
        }
    }
}

/// A tick when a health timer exists, forever-pending otherwise.
async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn remove_quietly<R: Runtime>(runtime: &R, runtime_id: &str) {
    if let Err(err @ RuntimeError::Unavailable(_)) = runtime.remove(runtime_id).await {
        warn!(runtime_id, %err, "container cleanup failed");
    }
}
