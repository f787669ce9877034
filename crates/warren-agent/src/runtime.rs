//! The narrow container-runtime interface.
//!
//! Everything below the agent is behind this trait: pulling images,
//! creating/starting/stopping containers, waiting for exits, and exec for
//! command health checks. The real implementation wraps whatever engine
//! the node runs; [`FakeRuntime`] is the scripted double the test suites
//! drive.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

/// Errors from Runtime calls. `Transient` failures are retried by policy
/// at the control plane, not by the agent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("image pull failed: {0}")]
    Pull(String),

    #[error("container create failed: {0}")]
    Create(String),

    #[error("container start failed: {0}")]
    Start(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

/// What the agent asks the Runtime to run: the container spec flattened
/// into engine terms, secret and volume mounts already resolved to host
/// paths.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunConfig {
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub command: Vec<String>,
    /// `(host_path, container_path, read_only)`.
    pub mounts: Vec<(String, String, bool)>,
}

/// The container engine, seen through a keyhole.
pub trait Runtime: Send + Sync + 'static {
    /// Ensures the image is present locally.
    fn pull(&self, image: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Creates a container, returning the engine's own ID for it.
    fn create(
        &self,
        name: &str,
        config: &RunConfig,
    ) -> impl Future<Output = Result<String, RuntimeError>> + Send;

    fn start(&self, runtime_id: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Graceful stop: terminate signal, wait up to `timeout`, then kill.
    fn stop(
        &self,
        runtime_id: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    fn remove(&self, runtime_id: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Blocks until the container exits; returns its exit code.
    fn wait(&self, runtime_id: &str) -> impl Future<Output = Result<i32, RuntimeError>> + Send;

    /// Runs `argv` inside the container; returns its exit code.
    fn exec(
        &self,
        runtime_id: &str,
        argv: &[String],
    ) -> impl Future<Output = Result<i32, RuntimeError>> + Send;
}

// ============================================================================
// FakeRuntime
// ============================================================================

/// A scripted in-memory engine for tests.
///
/// Containers "run" until the test resolves their exit, and every call is
/// recorded. Failures can be injected per image or per operation.
#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<FakeInner>,
}

#[derive(Default)]
struct FakeInner {
    next_id: u64,
    /// Images that fail to pull.
    broken_images: Vec<String>,
    /// Images whose pull never returns (deadline testing).
    hung_images: Vec<String>,
    /// Scripted exec results (consumed in order); empty means exit 0.
    exec_results: Vec<i32>,
    containers: HashMap<String, FakeContainer>,
    /// Call log: ("pull", image), ("start", id), ...
    pub calls: Vec<(String, String)>,
}

struct FakeContainer {
    exit_tx: Option<oneshot::Sender<i32>>,
    exit_rx: Option<oneshot::Receiver<i32>>,
    running: bool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes pulls of `image` fail.
    pub fn break_image(&self, image: &str) {
        self.inner
            .lock()
            .unwrap()
            .broken_images
            .push(image.to_string());
    }

    /// Makes pulls of `image` hang forever.
    pub fn hang_image(&self, image: &str) {
        self.inner
            .lock()
            .unwrap()
            .hung_images
            .push(image.to_string());
    }

    /// Queues an exec exit code (health-check scripting).
    pub fn push_exec_result(&self, code: i32) {
        self.inner.lock().unwrap().exec_results.push(code);
    }

    /// Resolves a running container's exit, as if the process ended.
    pub fn finish(&self, runtime_id: &str, exit_code: i32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.containers.get_mut(runtime_id) {
            c.running = false;
            if let Some(tx) = c.exit_tx.take() {
                let _ = tx.send(exit_code);
            }
        }
    }

    /// Engine IDs of containers currently running.
    pub fn running(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The recorded call log, `(operation, argument)` in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn log(&self, op: &str, arg: &str) {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push((op.to_string(), arg.to_string()));
    }
}

impl Runtime for FakeRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        self.log("pull", image);
        let hung = {
            let inner = self.inner.lock().unwrap();
            if inner.broken_images.iter().any(|b| b == image) {
                return Err(RuntimeError::Pull(format!("manifest unknown: {image}")));
            }
            inner.hung_images.iter().any(|h| h == image)
        };
        if hung {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn create(&self, name: &str, config: &RunConfig) -> Result<String, RuntimeError> {
        self.log("create", name);
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("fake-{}-{}", config.image.replace([':', '/'], "-"), inner.next_id);
        let (tx, rx) = oneshot::channel();
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                exit_tx: Some(tx),
                exit_rx: Some(rx),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start(&self, runtime_id: &str) -> Result<(), RuntimeError> {
        self.log("start", runtime_id);
        let mut inner = self.inner.lock().unwrap();
        match inner.containers.get_mut(runtime_id) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(runtime_id.to_string())),
        }
    }

    async fn stop(&self, runtime_id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.log("stop", runtime_id);
        self.finish(runtime_id, 0);
        Ok(())
    }

    async fn remove(&self, runtime_id: &str) -> Result<(), RuntimeError> {
        self.log("remove", runtime_id);
        self.inner.lock().unwrap().containers.remove(runtime_id);
        Ok(())
    }

    async fn wait(&self, runtime_id: &str) -> Result<i32, RuntimeError> {
        let rx = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .containers
                .get_mut(runtime_id)
                .and_then(|c| c.exit_rx.take())
        };
        match rx {
            Some(rx) => rx.await.map_err(|_| {
                RuntimeError::Unavailable("fake runtime dropped the exit channel".into())
            }),
            None => Err(RuntimeError::NotFound(runtime_id.to_string())),
        }
    }

    async fn exec(&self, runtime_id: &str, _argv: &[String]) -> Result<i32, RuntimeError> {
        self.log("exec", runtime_id);
        let mut inner = self.inner.lock().unwrap();
        if !inner.containers.contains_key(runtime_id) {
            return Err(RuntimeError::NotFound(runtime_id.to_string()));
        }
        if inner.exec_results.is_empty() {
            Ok(0)
        } else {
            Ok(inner.exec_results.remove(0))
        }
    }
}
