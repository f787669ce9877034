//! API request handling.
//!
//! Thin by design: validate, resolve names against the local store, build
//! a command, submit, read back. Mutations only succeed on the leader;
//! the replicator answers everyone else with `Unavailable` plus the
//! leader's API address. Reads come straight from the local store at
//! bounded staleness (one replication round trip).

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::{debug, warn};
use warren_crypto::ClusterKey;
use warren_kernel::Command;
use warren_store::Store;
use warren_types::{
    ApiError, Certificate, CertificateId, IngressRule, IngressRuleId, NodeId, Secret, SecretId,
    Service, ServiceId, ServiceSpec, Timestamp, Volume, VolumeId,
};
use warren_wire::{Request, Response, WatchEvent, read_frame, write_frame};

use crate::broker::Broker;
use crate::replicator::ReplicatorHandle;

/// Shared context of every API connection.
pub(crate) struct ApiContext {
    pub store: Arc<Store>,
    pub replicator: ReplicatorHandle,
    pub broker: Arc<Broker>,
    pub cluster_key: Option<ClusterKey>,
}

/// Serves one API connection until it closes. A `WatchTasks` request
/// upgrades the connection into a one-way event stream.
pub(crate) async fn serve_connection(ctx: Arc<ApiContext>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let (mut reader, mut writer) = stream.into_split();
    loop {
        match read_frame::<Request, _>(&mut reader).await {
            Ok(Some(Request::WatchTasks { node_id })) => {
                serve_watch(&ctx, node_id, &mut writer).await;
                return;
            }
            Ok(Some(request)) => {
                let response = dispatch(&ctx, request).await;
                if write_frame(&mut writer, &response).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                debug!(?peer, %err, "api connection error");
                return;
            }
        }
    }
}

/// The watch stream: snapshot first, then pushed changes until the client
/// goes away or the subscriber lapses (at which point disconnecting forces
/// a clean resnapshot).
async fn serve_watch(ctx: &ApiContext, node_id: NodeId, writer: &mut OwnedWriteHalf) {
    let subscription = ctx.broker.subscribe(node_id.clone());
    if write_frame(writer, &Response::Subscribed).await.is_err() {
        return;
    }

    let snapshot = ctx.store.with_read(|view| {
        view.containers_on_node(&node_id)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>()
    });
    if write_frame(writer, &WatchEvent::Snapshot(snapshot)).await.is_err() {
        return;
    }

    while let Some(event) = subscription.next().await {
        if write_frame(writer, &event).await.is_err() {
            return;
        }
    }
    warn!(node = %node_id, "watch subscriber lapsed, closing stream");
}

async fn submit(ctx: &ApiContext, command: Command) -> Result<(), ApiError> {
    ctx.replicator.submit(command).await
}

/// Validation at the front door: structural problems are refused before
/// they ever reach the log.
fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() || name.len() > 253 {
        return Err(ApiError::invalid_argument("name must be 1-253 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(ApiError::invalid_argument(
            "name may only contain lowercase letters, digits, '-' and '.'",
        ));
    }
    Ok(())
}

fn validate_spec(spec: &ServiceSpec) -> Result<(), ApiError> {
    if spec.image.is_empty() {
        return Err(ApiError::invalid_argument("image must not be empty"));
    }
    if spec.replicas > warren_kernel::MAX_REPLICAS {
        return Err(ApiError::invalid_argument(format!(
            "replicas exceeds the maximum of {}",
            warren_kernel::MAX_REPLICAS
        )));
    }
    if let warren_types::DeployStrategy::Canary { steps, .. } = &spec.update_config.strategy {
        if steps.iter().any(|pct| *pct == 0 || *pct > 100) {
            return Err(ApiError::invalid_argument(
                "canary steps must be percentages in 1-100",
            ));
        }
    }
    Ok(())
}

fn resolve_service(ctx: &ApiContext, name: &str) -> Result<Service, ApiError> {
    ctx.store
        .with_read(|view| view.service_by_name(name).cloned())
        .ok_or_else(|| ApiError::not_found(format!("service {name:?}")))
}

macro_rules! try_response {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => return Response::Error(err),
        }
    };
}

#[allow(clippy::too_many_lines)]
pub(crate) async fn dispatch(ctx: &ApiContext, request: Request) -> Response {
    match request {
        // ====================================================================
        // Worker plane
        // ====================================================================
        Request::RegisterNode {
            id,
            role,
            address,
            capacity,
            labels,
        } => {
            if address.is_empty() {
                return Response::error(ApiError::invalid_argument("address must not be empty"));
            }
            let id = id.unwrap_or_else(NodeId::random);
            try_response!(
                submit(
                    ctx,
                    Command::RegisterNode {
                        id: id.clone(),
                        role,
                        address,
                        capacity,
                        labels,
                    },
                )
                .await
            );
            Response::NodeRegistered { id }
        }

        Request::Heartbeat {
            node_id,
            available,
            task_statuses,
        } => {
            try_response!(
                submit(
                    ctx,
                    Command::Heartbeat {
                        node_id,
                        available,
                        task_statuses,
                    },
                )
                .await
            );
            Response::Ok
        }

        Request::ListAssignments { node_id } => {
            let containers = ctx.store.with_read(|view| {
                view.containers_on_node(&node_id)
                    .into_iter()
                    .cloned()
                    .collect()
            });
            Response::Containers(containers)
        }

        Request::GetSecretCiphertext { name } => {
            match ctx.store.with_read(|view| view.secret_by_name(&name).cloned()) {
                Some(secret) => Response::SecretCiphertext {
                    name,
                    ciphertext: secret.ciphertext,
                },
                None => Response::error(ApiError::not_found(format!("secret {name:?}"))),
            }
        }

        Request::BindVolume { name, node_id } => {
            let volume = match ctx.store.with_read(|view| view.volume_by_name(&name).cloned()) {
                Some(volume) => volume,
                None => return Response::error(ApiError::not_found(format!("volume {name:?}"))),
            };
            try_response!(
                submit(
                    ctx,
                    Command::BindVolume {
                        id: volume.id,
                        node_id,
                    },
                )
                .await
            );
            Response::Ok
        }

        // ====================================================================
        // Services
        // ====================================================================
        Request::CreateService { name, spec } => {
            try_response!(validate_name(&name));
            try_response!(validate_spec(&spec));
            let service = Service {
                id: ServiceId::random(),
                name,
                spec,
                previous_spec: None,
                version: 1,
                labels: Default::default(),
                created_at: Timestamp::ZERO,
                updated_at: Timestamp::ZERO,
            };
            let id = service.id.clone();
            try_response!(submit(ctx, Command::CreateService { service }).await);
            match ctx.store.with_read(|view| view.service(&id).cloned()) {
                Some(created) => Response::Service(created),
                None => Response::error(ApiError::not_found("service vanished after creation")),
            }
        }

        Request::UpdateService { name, spec } => {
            try_response!(validate_spec(&spec));
            let service = try_response!(resolve_service(ctx, &name));
            try_response!(
                submit(
                    ctx,
                    Command::UpdateService {
                        id: service.id.clone(),
                        spec,
                    },
                )
                .await
            );
            match ctx.store.with_read(|view| view.service(&service.id).cloned()) {
                Some(updated) => Response::Service(updated),
                None => Response::error(ApiError::not_found(format!("service {name:?}"))),
            }
        }

        Request::DeleteService { name } => {
            let service = try_response!(resolve_service(ctx, &name));
            try_response!(submit(ctx, Command::DeleteService { id: service.id }).await);
            Response::Ok
        }

        Request::GetService { name } => match ctx
            .store
            .with_read(|view| view.service_by_name(&name).cloned())
        {
            Some(service) => Response::Service(service),
            None => Response::error(ApiError::not_found(format!("service {name:?}"))),
        },

        Request::ListServices => {
            Response::Services(ctx.store.with_read(warren_store::StoreState::services))
        }

        Request::ScaleService { name, replicas } => {
            let service = try_response!(resolve_service(ctx, &name));
            try_response!(
                submit(
                    ctx,
                    Command::ScaleService {
                        id: service.id.clone(),
                        replicas,
                    },
                )
                .await
            );
            match ctx.store.with_read(|view| view.service(&service.id).cloned()) {
                Some(scaled) => Response::Service(scaled),
                None => Response::error(ApiError::not_found(format!("service {name:?}"))),
            }
        }

        Request::ManualRollback { name } => {
            let service = try_response!(resolve_service(ctx, &name));
            // A blue-green swap still inside its grace period reverses
            // first; the spec rollback then restores the prior template.
            let shadow = ctx
                .store
                .with_read(|view| view.shadow_of(&service.id).map(|s| s.id.clone()));
            if let Some(shadow_id) = shadow {
                try_response!(
                    submit(
                        ctx,
                        Command::RevertBlueGreen {
                            primary_id: service.id.clone(),
                            shadow_id,
                        },
                    )
                    .await
                );
            }
            try_response!(submit(ctx, Command::RollbackService { id: service.id }).await);
            Response::Ok
        }

        // ====================================================================
        // Reads & node ops
        // ====================================================================
        Request::ListNodes => Response::Nodes(ctx.store.with_read(warren_store::StoreState::nodes)),

        Request::GetNode { id } => match ctx.store.with_read(|view| view.node(&id).cloned()) {
            Some(node) => Response::Node(node),
            None => Response::error(ApiError::not_found(format!("node {id}"))),
        },

        Request::RemoveNode { id } => {
            try_response!(submit(ctx, Command::RemoveNode { id }).await);
            Response::Ok
        }

        Request::ListContainers => {
            Response::Containers(ctx.store.with_read(warren_store::StoreState::containers))
        }

        Request::GetContainer { id } => {
            match ctx.store.with_read(|view| view.container(&id).cloned()) {
                Some(container) => Response::Container(container),
                None => Response::error(ApiError::not_found(format!("container {id}"))),
            }
        }

        // ====================================================================
        // Secrets
        // ====================================================================
        Request::CreateSecret { name, data } => {
            try_response!(validate_name(&name));
            let Some(key) = &ctx.cluster_key else {
                return Response::error(ApiError::invalid_argument(
                    "this manager holds no cluster key; secrets are unavailable",
                ));
            };
            let secret = Secret {
                id: SecretId::random(),
                name,
                ciphertext: key.seal(&data),
                created_at: Timestamp::ZERO,
                updated_at: Timestamp::ZERO,
            };
            let info = secret.info();
            try_response!(submit(ctx, Command::CreateSecret { secret }).await);
            Response::SecretCreated { info }
        }

        Request::DeleteSecret { name } => {
            let id = match ctx
                .store
                .with_read(|view| view.secret_by_name(&name).map(|s| s.id.clone()))
            {
                Some(id) => id,
                None => return Response::error(ApiError::not_found(format!("secret {name:?}"))),
            };
            try_response!(submit(ctx, Command::DeleteSecret { id }).await);
            Response::Ok
        }

        Request::ListSecrets => {
            // Metadata only; ciphertext never appears in listings.
            let infos = ctx.store.with_read(|view| {
                view.secrets().iter().map(Secret::info).collect::<Vec<_>>()
            });
            Response::Secrets(infos)
        }

        // ====================================================================
        // Volumes
        // ====================================================================
        Request::CreateVolume {
            name,
            driver,
            driver_opts,
            labels,
        } => {
            try_response!(validate_name(&name));
            let volume = Volume {
                id: VolumeId::random(),
                name,
                driver,
                driver_opts,
                labels,
                bound_node_id: None,
                created_at: Timestamp::ZERO,
                updated_at: Timestamp::ZERO,
            };
            let id = volume.id.clone();
            try_response!(submit(ctx, Command::CreateVolume { volume }).await);
            match ctx.store.with_read(|view| view.volume(&id).cloned()) {
                Some(created) => Response::Volume(created),
                None => Response::error(ApiError::not_found("volume vanished after creation")),
            }
        }

        Request::DeleteVolume { name } => {
            let id = match ctx
                .store
                .with_read(|view| view.volume_by_name(&name).map(|v| v.id.clone()))
            {
                Some(id) => id,
                None => return Response::error(ApiError::not_found(format!("volume {name:?}"))),
            };
            try_response!(submit(ctx, Command::DeleteVolume { id }).await);
            Response::Ok
        }

        Request::ListVolumes => {
            Response::Volumes(ctx.store.with_read(warren_store::StoreState::volumes))
        }

        // ====================================================================
        // Ingress & certificates (replicated storage for the proxy)
        // ====================================================================
        Request::SetIngressRule {
            id,
            host,
            path_prefix,
            service_name,
            port,
        } => {
            if host.is_empty() {
                return Response::error(ApiError::invalid_argument("host must not be empty"));
            }
            let rule = IngressRule {
                id: id.unwrap_or_else(IngressRuleId::random),
                host,
                path_prefix,
                service_name,
                port,
                created_at: Timestamp::ZERO,
                updated_at: Timestamp::ZERO,
            };
            try_response!(submit(ctx, Command::SetIngressRule { rule }).await);
            Response::Ok
        }

        Request::RemoveIngressRule { id } => {
            try_response!(submit(ctx, Command::RemoveIngressRule { id }).await);
            Response::Ok
        }

        Request::ListIngressRules => Response::IngressRules(
            ctx.store.with_read(warren_store::StoreState::ingress_rules),
        ),

        Request::SetCertificate {
            domain,
            cert_pem,
            key_pem,
        } => {
            // One certificate per domain: re-setting replaces in place.
            let id = ctx
                .store
                .with_read(|view| {
                    view.certificates()
                        .iter()
                        .find(|c| c.domain == domain)
                        .map(|c| c.id.clone())
                })
                .unwrap_or_else(CertificateId::random);
            let certificate = Certificate {
                id,
                domain,
                cert_pem,
                key_pem,
                created_at: Timestamp::ZERO,
                updated_at: Timestamp::ZERO,
            };
            try_response!(submit(ctx, Command::SetCertificate { certificate }).await);
            Response::Ok
        }

        Request::ListCertificates => Response::Certificates(
            ctx.store.with_read(warren_store::StoreState::certificates),
        ),

        // Handled by `serve_connection` before dispatch.
        Request::WatchTasks { .. } => {
            Response::error(ApiError::invalid_argument("watch is connection-level"))
        }
    }
}
