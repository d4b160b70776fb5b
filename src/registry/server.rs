use crate::grpc::grpc_registry_server::{GrpcRegistry, GrpcRegistryServer};
use crate::grpc::{
    ProtoListNamesReply, ProtoListNamesRequest, ProtoLookupReply, ProtoLookupRequest,
    ProtoPublishReply, ProtoPublishRequest,
};
use crate::net;
use crate::shutdown::{self, ShutdownHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

pub struct RegistryServerConfig {
    pub logger: slog::Logger,
    pub listen_addr: SocketAddr,
}

pub struct RegistryServerHandle {
    /// Address the registry actually bound, for `listen_addr` with port 0.
    pub local_addr: SocketAddr,
    /// Dropping this stops the registry server.
    pub shutdown: ShutdownHandle,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryStartError {
    #[error("failed to bind registry listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Binds and starts the name directory. It holds no replication state and is
/// deliberately oblivious to what the names it stores mean.
pub async fn try_start_registry(
    config: RegistryServerConfig,
) -> Result<RegistryServerHandle, RegistryStartError> {
    let logger = config.logger.new(slog::o!("component" => "registry"));

    let (local_addr, incoming) =
        net::bind_incoming(config.listen_addr)
            .await
            .map_err(|source| RegistryStartError::Bind {
                addr: config.listen_addr,
                source,
            })?;

    let (shutdown_handle, shutdown_signal) = shutdown::shutdown_pair();
    let service = RegistryService::new(logger.clone());

    tokio::spawn(async move {
        slog::info!(logger, "Registry listening on '{:?}'", local_addr);

        let result = Server::builder()
            .add_service(GrpcRegistryServer::new(service))
            .serve_with_incoming_shutdown(incoming, shutdown_signal)
            .await;

        slog::info!(logger, "Registry server has exited: {:?}", result);
    });

    Ok(RegistryServerHandle {
        local_addr,
        shutdown: shutdown_handle,
    })
}

/// RegistryService implements the registry gRPC interface over one locked
/// name→endpoint map. The lock is never held across an await.
struct RegistryService {
    logger: slog::Logger,
    names: Mutex<HashMap<String, String>>,
}

impl RegistryService {
    fn new(logger: slog::Logger) -> Self {
        RegistryService {
            logger,
            names: Mutex::new(HashMap::new()),
        }
    }
}

#[tonic::async_trait]
impl GrpcRegistry for RegistryService {
    async fn publish(
        &self,
        rpc_request: Request<ProtoPublishRequest>,
    ) -> Result<Response<ProtoPublishReply>, Status> {
        let rpc_request = rpc_request.into_inner();
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);

        if rpc_request.name.is_empty() {
            return Err(Status::invalid_argument("name must not be empty"));
        }
        if rpc_request.endpoint.is_empty() {
            return Err(Status::invalid_argument("endpoint must not be empty"));
        }

        let previous = self
            .names
            .lock()
            .expect("RegistryService.publish() mutex guard poison")
            .insert(rpc_request.name.clone(), rpc_request.endpoint.clone());

        match previous {
            Some(old_endpoint) if old_endpoint != rpc_request.endpoint => {
                slog::info!(
                    self.logger,
                    "Rebound '{}': '{}' -> '{}'",
                    rpc_request.name,
                    old_endpoint,
                    rpc_request.endpoint
                );
            }
            Some(_) => {}
            None => {
                slog::info!(
                    self.logger,
                    "Bound '{}' -> '{}'",
                    rpc_request.name,
                    rpc_request.endpoint
                );
            }
        }

        Ok(Response::new(ProtoPublishReply {}))
    }

    async fn lookup(
        &self,
        rpc_request: Request<ProtoLookupRequest>,
    ) -> Result<Response<ProtoLookupReply>, Status> {
        let rpc_request = rpc_request.into_inner();
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);

        let endpoint = self
            .names
            .lock()
            .expect("RegistryService.lookup() mutex guard poison")
            .get(&rpc_request.name)
            .cloned();

        match endpoint {
            Some(endpoint) => Ok(Response::new(ProtoLookupReply { endpoint })),
            None => Err(Status::not_found(format!(
                "name '{}' is not bound",
                rpc_request.name
            ))),
        }
    }

    async fn list_names(
        &self,
        _rpc_request: Request<ProtoListNamesRequest>,
    ) -> Result<Response<ProtoListNamesReply>, Status> {
        let names = self
            .names
            .lock()
            .expect("RegistryService.list_names() mutex guard poison")
            .keys()
            .cloned()
            .collect();

        Ok(Response::new(ProtoListNamesReply { names }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryClient;
    use crate::registry::RegistryError;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    async fn start_test_registry(port: u16) -> (RegistryServerHandle, RegistryClient) {
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let handle = try_start_registry(RegistryServerConfig {
            logger: test_logger(),
            listen_addr: addr,
        })
        .await
        .unwrap();
        let client = RegistryClient::connect(&handle.local_addr.to_string())
            .await
            .unwrap();

        (handle, client)
    }

    #[tokio::test]
    async fn publish_then_lookup_round_trips() {
        let (_handle, client) = start_test_registry(18300).await;

        client.publish("replica1", "127.0.0.1:9001").await.unwrap();

        let endpoint = client.lookup("replica1").await.unwrap();
        assert_eq!("127.0.0.1:9001", endpoint);
    }

    #[tokio::test]
    async fn lookup_of_unbound_name_is_not_found() {
        let (_handle, client) = start_test_registry(18301).await;

        let result = client.lookup("replica99").await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn rebinding_replaces_endpoint() {
        let (_handle, client) = start_test_registry(18302).await;

        client.publish("replica1", "127.0.0.1:9001").await.unwrap();
        client.publish("replica1", "127.0.0.1:9002").await.unwrap();

        let endpoint = client.lookup("replica1").await.unwrap();
        assert_eq!("127.0.0.1:9002", endpoint);
    }

    #[tokio::test]
    async fn list_names_returns_every_binding() {
        let (_handle, client) = start_test_registry(18303).await;

        client.publish("replica1", "127.0.0.1:9001").await.unwrap();
        client.publish("replica2", "127.0.0.1:9002").await.unwrap();
        client.publish("dispatcher", "127.0.0.1:9100").await.unwrap();

        let mut names = client.list_names().await.unwrap();
        names.sort();
        assert_eq!(vec!["dispatcher", "replica1", "replica2"], names);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let (_handle, client) = start_test_registry(18304).await;

        let result = client.publish("", "127.0.0.1:9001").await;
        assert!(matches!(result, Err(RegistryError::Unavailable(_))));
    }
}
