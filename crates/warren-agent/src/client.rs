//! The agent's connection to the control plane.
//!
//! One short-lived framed request per call, with leader-hint redirects:
//! a follower answering `Unavailable{leader_hint}` moves the preferred
//! address, and the next attempt goes straight to the leader. Transient
//! connect failures rotate through the configured manager addresses.
//!
//! Deadlines differ by request class: the tight worker loops (heartbeat,
//! assignment sync) use 5 s, node operations (registration, volume
//! binding, secret fetches) get 10 s of headroom.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;
use warren_types::{
    ApiError, ApiResult, Container, ErrorKind, NodeId, NodeRole, Resources, TaskStatus,
};
use warren_wire::{Request, Response, read_frame, write_frame};

/// Deadline for the periodic heartbeat (covers connect + round trip).
const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for the assignment sync poll.
const SYNC_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for node operations: registration, volume binds, secret
/// fetches, and everything routed through the plain [`ManagerClient::request`].
const NODE_OP_DEADLINE: Duration = Duration::from_secs(10);

/// A framed-request client over the manager set.
pub struct ManagerClient {
    managers: Vec<String>,
    /// The address that last answered (ideally the leader).
    preferred: Mutex<Option<String>>,
}

impl ManagerClient {
    pub fn new(managers: Vec<String>) -> Self {
        Self {
            managers,
            preferred: Mutex::new(None),
        }
    }

    /// Sends one request under the node-op deadline, following at most one
    /// leader redirect per candidate address.
    pub async fn request(&self, request: &Request) -> ApiResult<Response> {
        self.request_with_deadline(request, NODE_OP_DEADLINE).await
    }

    /// Sends one request under an explicit per-class deadline.
    pub async fn request_with_deadline(
        &self,
        request: &Request,
        deadline: Duration,
    ) -> ApiResult<Response> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(p) = self.preferred.lock().expect("lock").clone() {
            candidates.push(p);
        }
        for m in &self.managers {
            if !candidates.contains(m) {
                candidates.push(m.clone());
            }
        }

        let mut last_err = ApiError::unavailable("no manager addresses configured", None);
        for addr in candidates {
            match self.round_trip(&addr, request, deadline).await {
                Ok(Response::Error(err)) if err.kind == ErrorKind::Unavailable => {
                    if let Some(hint) = err.leader_hint.clone() {
                        debug!(%addr, %hint, "redirected to leader");
                        *self.preferred.lock().expect("lock") = Some(hint.clone());
                        match self.round_trip(&hint, request, deadline).await {
                            Ok(Response::Error(err)) => last_err = err,
                            Ok(response) => return Ok(response),
                            Err(err) => last_err = err,
                        }
                    } else {
                        last_err = err;
                    }
                }
                Ok(Response::Error(err)) => return Err(err),
                Ok(response) => {
                    *self.preferred.lock().expect("lock") = Some(addr);
                    return Ok(response);
                }
                Err(err) => {
                    debug!(%addr, %err, "manager unreachable");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn round_trip(
        &self,
        addr: &str,
        request: &Request,
        deadline: Duration,
    ) -> ApiResult<Response> {
        let attempt = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(|e| ApiError::transient(format!("connect {addr}: {e}")))?;
            write_frame(&mut stream, request)
                .await
                .map_err(|e| ApiError::transient(format!("send: {e}")))?;
            match read_frame::<Response, _>(&mut stream).await {
                Ok(Some(response)) => Ok(response),
                Ok(None) => Err(ApiError::transient("connection closed before reply")),
                Err(e) => Err(ApiError::transient(format!("recv: {e}"))),
            }
        };
        tokio::time::timeout(deadline, attempt)
            .await
            .map_err(|_| ApiError::transient(format!("request to {addr} timed out")))?
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    pub async fn register_node(
        &self,
        id: Option<NodeId>,
        role: NodeRole,
        address: String,
        capacity: Resources,
        labels: BTreeMap<String, String>,
    ) -> ApiResult<NodeId> {
        match self
            .request(&Request::RegisterNode {
                id,
                role,
                address,
                capacity,
                labels,
            })
            .await?
        {
            Response::NodeRegistered { id } => Ok(id),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn heartbeat(
        &self,
        node_id: NodeId,
        available: Resources,
        task_statuses: Vec<TaskStatus>,
    ) -> ApiResult<()> {
        let request = Request::Heartbeat {
            node_id,
            available,
            task_statuses,
        };
        match self
            .request_with_deadline(&request, HEARTBEAT_DEADLINE)
            .await?
        {
            Response::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn list_assignments(&self, node_id: NodeId) -> ApiResult<Vec<Container>> {
        match self
            .request_with_deadline(&Request::ListAssignments { node_id }, SYNC_DEADLINE)
            .await?
        {
            Response::Containers(containers) => Ok(containers),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn get_secret_ciphertext(&self, name: &str) -> ApiResult<Vec<u8>> {
        match self
            .request(&Request::GetSecretCiphertext {
                name: name.to_string(),
            })
            .await?
        {
            Response::SecretCiphertext { ciphertext, .. } => Ok(ciphertext),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn bind_volume(&self, name: &str, node_id: NodeId) -> ApiResult<()> {
        match self
            .request(&Request::BindVolume {
                name: name.to_string(),
                node_id,
            })
            .await?
        {
            Response::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> ApiError {
    ApiError::transient(format!("unexpected response variant: {response:?}"))
}
