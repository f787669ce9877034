//! A process-backed Runtime.
//!
//! The smallest real engine: an "image" is an executable path, a
//! container is a child process with the configured environment and
//! arguments. It lets a node run real workloads without a container
//! engine bound, and exercises the agent against actual processes.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::runtime::{RunConfig, Runtime, RuntimeError};

enum ProcState {
    /// Created, not yet started: the captured launch configuration.
    Created(RunConfig),
    /// Started: the live child process.
    Running(Child),
}

/// Containers as plain child processes.
#[derive(Default)]
pub struct ProcessRuntime {
    next_id: Mutex<u64>,
    procs: Mutex<HashMap<String, ProcState>>,
}

impl ProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Runtime for ProcessRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        // The executable must exist; that is the whole pull.
        if tokio::fs::metadata(image).await.is_ok() {
            Ok(())
        } else {
            Err(RuntimeError::Pull(format!("executable {image} not found")))
        }
    }

    async fn create(&self, name: &str, config: &RunConfig) -> Result<String, RuntimeError> {
        let id = {
            let mut next = self.next_id.lock().expect("lock");
            *next += 1;
            format!("proc-{name}-{next}")
        };
        self.procs
            .lock()
            .expect("lock")
            .insert(id.clone(), ProcState::Created(config.clone()));
        debug!(id, image = %config.image, "process container created");
        Ok(id)
    }

    async fn start(&self, runtime_id: &str) -> Result<(), RuntimeError> {
        let config = {
            let procs = self.procs.lock().expect("lock");
            match procs.get(runtime_id) {
                Some(ProcState::Created(config)) => config.clone(),
                Some(ProcState::Running(_)) => return Ok(()),
                None => return Err(RuntimeError::NotFound(runtime_id.to_string())),
            }
        };

        let child = Command::new(&config.image)
            .args(&config.command)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Start(e.to_string()))?;

        self.procs
            .lock()
            .expect("lock")
            .insert(runtime_id.to_string(), ProcState::Running(child));
        Ok(())
    }

    async fn stop(&self, runtime_id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let state = self.procs.lock().expect("lock").remove(runtime_id);
        if let Some(ProcState::Running(mut child)) = state {
            // Graceful first, then the hard way after the timeout.
            let _ = child.start_kill();
            if tokio::time::timeout(timeout, child.wait()).await.is_err() {
                let _ = child.kill().await;
            }
        }
        Ok(())
    }

    async fn remove(&self, runtime_id: &str) -> Result<(), RuntimeError> {
        self.procs.lock().expect("lock").remove(runtime_id);
        Ok(())
    }

    async fn wait(&self, runtime_id: &str) -> Result<i32, RuntimeError> {
        let state = self.procs.lock().expect("lock").remove(runtime_id);
        match state {
            Some(ProcState::Running(mut child)) => {
                let status = child
                    .wait()
                    .await
                    .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
                Ok(status.code().unwrap_or(-1))
            }
            Some(ProcState::Created(_)) | None => {
                Err(RuntimeError::NotFound(runtime_id.to_string()))
            }
        }
    }

    async fn exec(&self, _runtime_id: &str, argv: &[String]) -> Result<i32, RuntimeError> {
        // Host-side exec: enough for command health checks against
        // process workloads.
        let Some((program, args)) = argv.split_first() else {
            return Err(RuntimeError::Unavailable("empty exec argv".into()));
        };
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(status.code().unwrap_or(-1))
    }
}
