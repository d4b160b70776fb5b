use crate::dispatcher::discovery::DiscoveryTask;
use crate::dispatcher::dispatcher::Dispatcher;
use crate::dispatcher::rpc_server::FrontendServer;
use crate::grpc::grpc_kv_frontend_server::GrpcKvFrontendServer;
use crate::net::{self, ConnectError};
use crate::registry::{RegistryClient, ReplicaName};
use crate::replica::{ReplicaHandle, ResolveError};
use crate::shutdown::{self, ShutdownHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Server;

pub struct DispatcherConfig {
    pub logger: slog::Logger,
    /// Address to serve the client-facing Put/Get surface on.
    pub listen_addr: SocketAddr,
    /// Endpoint of the registry, `host:port`.
    pub registry_endpoint: String,
    /// Id of the replica to route requests to until the first failover. It
    /// must be resolvable at startup.
    pub initial_primary_id: u64,
    /// Ids of replicas to queue behind it, in promotion order. Resolved
    /// best-effort; discovery repopulates the queue later anyway.
    pub initial_backup_ids: Vec<u64>,
    /// How often the discovery task rescans the registry.
    pub discovery_interval: Duration,
}

pub struct DispatcherServerHandle {
    pub dispatcher: Arc<Dispatcher>,
    /// Address the frontend actually bound, for `listen_addr` with port 0.
    pub local_addr: SocketAddr,
    /// Dropping this stops the frontend server. The discovery task exits on
    /// its own once the last `dispatcher` reference is gone.
    pub shutdown: ShutdownHandle,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatcherStartError {
    #[error("failed to bind frontend listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to reach the registry: {0}")]
    Registry(#[from] ConnectError),
    #[error("failed to resolve initial primary '{name}': {source}")]
    InitialPrimary {
        name: String,
        #[source]
        source: ResolveError,
    },
}

/// Starts a dispatcher: resolves the configured topology, spawns the
/// discovery task, and serves the client-facing surface.
///
/// The initial primary must resolve. Without one the dispatcher could neither
/// serve a single request nor seed discovered replicas, so refusing to start
/// beats starting dead. Unresolvable initial backups are merely skipped: the
/// replicas they name can still be adopted by a later discovery scan.
pub async fn try_start_dispatcher(
    config: DispatcherConfig,
) -> Result<DispatcherServerHandle, DispatcherStartError> {
    let logger = config.logger.new(slog::o!("component" => "dispatcher"));

    let registry = RegistryClient::connect(&config.registry_endpoint).await?;

    let primary_name = ReplicaName::new(config.initial_primary_id);
    let initial_primary = ReplicaHandle::resolve(&registry, primary_name.as_str())
        .await
        .map_err(|source| DispatcherStartError::InitialPrimary {
            name: primary_name.as_str().to_owned(),
            source,
        })?;
    slog::info!(logger, "Initial primary is '{}'", initial_primary.name());

    let mut initial_backups = Vec::with_capacity(config.initial_backup_ids.len());
    for backup_id in &config.initial_backup_ids {
        let backup_name = ReplicaName::new(*backup_id);
        match ReplicaHandle::resolve(&registry, backup_name.as_str()).await {
            Ok(handle) => initial_backups.push(handle),
            Err(err) => {
                slog::warn!(
                    logger,
                    "Skipping unresolvable initial backup '{}': {}",
                    backup_name,
                    err
                );
            }
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(
        logger.clone(),
        registry,
        initial_primary,
        initial_backups,
    ));
    DiscoveryTask::spawn(logger.clone(), &dispatcher, config.discovery_interval);

    let (local_addr, incoming) =
        net::bind_incoming(config.listen_addr)
            .await
            .map_err(|source| DispatcherStartError::Bind {
                addr: config.listen_addr,
                source,
            })?;

    let (shutdown_handle, shutdown_signal) = shutdown::shutdown_pair();
    let frontend = FrontendServer::new(logger.clone(), Arc::clone(&dispatcher));

    let serve_logger = logger.clone();
    tokio::spawn(async move {
        slog::info!(serve_logger, "Dispatcher listening on '{:?}'", local_addr);

        let result = Server::builder()
            .add_service(GrpcKvFrontendServer::new(frontend))
            .serve_with_incoming_shutdown(incoming, shutdown_signal)
            .await;

        slog::info!(serve_logger, "Dispatcher server has exited: {:?}", result);
    });

    Ok(DispatcherServerHandle {
        dispatcher,
        local_addr,
        shutdown: shutdown_handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{try_start_registry, RegistryServerConfig, RegistryServerHandle};
    use crate::replica::{try_start_replica, ReplicaRole, ReplicaServerConfig};

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    /// The caller keeps the handle so the registry outlives the test body.
    async fn start_test_registry(port: u16) -> (RegistryServerHandle, String) {
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let handle = try_start_registry(RegistryServerConfig {
            logger: test_logger(),
            listen_addr: addr,
        })
        .await
        .unwrap();
        let endpoint = handle.local_addr.to_string();

        (handle, endpoint)
    }

    #[tokio::test]
    async fn start_without_resolvable_primary_fails() {
        let (_registry, registry_endpoint) = start_test_registry(18330).await;

        let result = try_start_dispatcher(DispatcherConfig {
            logger: test_logger(),
            listen_addr: "127.0.0.1:18331".parse().unwrap(),
            registry_endpoint,
            initial_primary_id: 1,
            initial_backup_ids: Vec::new(),
            discovery_interval: Duration::from_secs(5),
        })
        .await;

        assert!(matches!(
            result,
            Err(DispatcherStartError::InitialPrimary { .. })
        ));
    }

    #[tokio::test]
    async fn unresolvable_initial_backups_are_skipped() {
        let (_registry, registry_endpoint) = start_test_registry(18332).await;
        let _replica = try_start_replica(ReplicaServerConfig {
            logger: test_logger(),
            id: 1,
            listen_addr: "127.0.0.1:18333".parse().unwrap(),
            registry_endpoint: registry_endpoint.clone(),
            initial_role: ReplicaRole::Primary,
            initial_backup_ids: Vec::new(),
        })
        .await
        .unwrap();

        let handle = try_start_dispatcher(DispatcherConfig {
            logger: test_logger(),
            listen_addr: "127.0.0.1:18334".parse().unwrap(),
            registry_endpoint,
            initial_primary_id: 1,
            // Id 7 was never started; the dispatcher must come up without it.
            initial_backup_ids: vec![7],
            discovery_interval: Duration::from_secs(5),
        })
        .await
        .unwrap();

        assert_eq!(
            Some("replica1".to_owned()),
            handle.dispatcher.primary_name()
        );
        assert!(handle.dispatcher.backup_names().await.is_empty());
    }
}
