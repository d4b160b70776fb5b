use crate::grpc::grpc_primary_api_server::GrpcPrimaryApiServer;
use crate::grpc::grpc_replica_control_server::GrpcReplicaControlServer;
use crate::net::{self, ConnectError};
use crate::registry::{RegistryClient, RegistryError, ReplicaName};
use crate::replica::peer_client::ReplicaHandle;
use crate::replica::replica::{Replica, ReplicaRole};
use crate::replica::rpc_server::{PrimaryApiServer, ReplicaControlServer};
use crate::shutdown::{self, ShutdownHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;

pub struct ReplicaServerConfig {
    pub logger: slog::Logger,
    /// Positive integer; the replica publishes itself as `replica<id>`.
    pub id: u64,
    /// Address to bind. Also published to the registry, so it must be
    /// reachable by the dispatcher and by peer replicas as-is.
    pub listen_addr: SocketAddr,
    /// Endpoint of the registry, `host:port`.
    pub registry_endpoint: String,
    pub initial_role: ReplicaRole,
    /// Ids of replicas to treat as backups until the first put rediscovers
    /// the set. Only meaningful for a starting primary.
    pub initial_backup_ids: Vec<u64>,
}

pub struct ReplicaServerHandle {
    pub replica: Arc<Replica>,
    /// Address the replica actually bound and published.
    pub local_addr: SocketAddr,
    /// Dropping this stops the replica's RPC server. The registry binding is
    /// left behind; peers discover the death by failing to reach it.
    pub shutdown: ShutdownHandle,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaStartError {
    #[error("replica id must be a positive integer")]
    InvalidId,
    #[error("failed to bind replica listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to reach the registry: {0}")]
    Registry(#[from] ConnectError),
    #[error("failed to publish '{name}' to the registry: {source}")]
    Publish {
        name: String,
        #[source]
        source: RegistryError,
    },
}

/// Starts a replica: binds both RPC surfaces on one port, publishes the bound
/// address under `replica<id>`, and for a starting primary resolves its
/// configured backups.
///
/// The listener is bound before the name is published, so a name visible in
/// the registry is always connectable. Publishing last also means a failed
/// start leaves no dangling binding.
pub async fn try_start_replica(
    config: ReplicaServerConfig,
) -> Result<ReplicaServerHandle, ReplicaStartError> {
    if config.id == 0 {
        return Err(ReplicaStartError::InvalidId);
    }
    let my_name = ReplicaName::new(config.id);
    let logger = config
        .logger
        .new(slog::o!("replica" => my_name.as_str().to_owned()));

    let registry = RegistryClient::connect(&config.registry_endpoint).await?;
    let replica = Arc::new(Replica::new(
        logger.clone(),
        my_name.clone(),
        config.initial_role,
        registry.clone(),
    ));

    let (local_addr, incoming) =
        net::bind_incoming(config.listen_addr)
            .await
            .map_err(|source| ReplicaStartError::Bind {
                addr: config.listen_addr,
                source,
            })?;

    let (shutdown_handle, shutdown_signal) = shutdown::shutdown_pair();
    let primary_api = PrimaryApiServer::new(logger.clone(), Arc::clone(&replica));
    let control = ReplicaControlServer::new(logger.clone(), Arc::clone(&replica));

    let serve_logger = logger.clone();
    tokio::spawn(async move {
        slog::info!(serve_logger, "Replica listening on '{:?}'", local_addr);

        let result = Server::builder()
            .add_service(GrpcPrimaryApiServer::new(primary_api))
            .add_service(GrpcReplicaControlServer::new(control))
            .serve_with_incoming_shutdown(incoming, shutdown_signal)
            .await;

        slog::info!(serve_logger, "Replica server has exited: {:?}", result);
    });

    registry
        .publish(my_name.as_str(), &local_addr.to_string())
        .await
        .map_err(|source| ReplicaStartError::Publish {
            name: my_name.as_str().to_owned(),
            source,
        })?;

    if config.initial_role == ReplicaRole::Primary && !config.initial_backup_ids.is_empty() {
        let mut initial_backups = Vec::with_capacity(config.initial_backup_ids.len());
        for backup_id in &config.initial_backup_ids {
            let backup_name = ReplicaName::new(*backup_id);
            match ReplicaHandle::resolve(&registry, backup_name.as_str()).await {
                Ok(handle) => initial_backups.push(handle),
                Err(err) => {
                    // Non-fatal, same as an unreachable peer found later.
                    slog::warn!(
                        logger,
                        "Skipping unresolvable initial backup '{}': {}",
                        backup_name,
                        err
                    );
                }
            }
        }
        replica.set_initial_backups(initial_backups).await;
    }

    Ok(ReplicaServerHandle {
        replica,
        local_addr,
        shutdown: shutdown_handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{try_start_registry, RegistryServerConfig};

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn start_publishes_bound_address() {
        let registry_addr: SocketAddr = "127.0.0.1:18320".parse().unwrap();
        let registry_handle = try_start_registry(RegistryServerConfig {
            logger: test_logger(),
            listen_addr: registry_addr,
        })
        .await
        .unwrap();
        let registry_endpoint = registry_handle.local_addr.to_string();

        let replica_handle = try_start_replica(ReplicaServerConfig {
            logger: test_logger(),
            id: 1,
            listen_addr: "127.0.0.1:18321".parse().unwrap(),
            registry_endpoint: registry_endpoint.clone(),
            initial_role: ReplicaRole::Backup,
            initial_backup_ids: Vec::new(),
        })
        .await
        .unwrap();

        let registry = RegistryClient::connect(&registry_endpoint).await.unwrap();
        let published = registry.lookup("replica1").await.unwrap();
        assert_eq!(replica_handle.local_addr.to_string(), published);
    }

    #[tokio::test]
    async fn id_zero_is_rejected() {
        let registry_addr: SocketAddr = "127.0.0.1:18322".parse().unwrap();
        let _registry_handle = try_start_registry(RegistryServerConfig {
            logger: test_logger(),
            listen_addr: registry_addr,
        })
        .await
        .unwrap();

        let result = try_start_replica(ReplicaServerConfig {
            logger: test_logger(),
            id: 0,
            listen_addr: "127.0.0.1:18323".parse().unwrap(),
            registry_endpoint: "127.0.0.1:18322".to_owned(),
            initial_role: ReplicaRole::Backup,
            initial_backup_ids: Vec::new(),
        })
        .await;

        assert!(matches!(result, Err(ReplicaStartError::InvalidId)));
    }
}
