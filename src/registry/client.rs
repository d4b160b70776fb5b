use crate::grpc::grpc_registry_client::GrpcRegistryClient;
use crate::grpc::{ProtoListNamesRequest, ProtoLookupRequest, ProtoPublishRequest};
use crate::net::{self, ConnectError};
use tonic::transport::Channel;
use tonic::Code;

/// Client for the name directory. Cheap to clone; all clones share one
/// channel.
#[derive(Clone)]
pub struct RegistryClient {
    inner: GrpcRegistryClient<Channel>,
}

impl RegistryClient {
    pub async fn connect(endpoint: &str) -> Result<Self, ConnectError> {
        let channel = net::dial(endpoint).await?;

        Ok(RegistryClient {
            inner: GrpcRegistryClient::new(channel),
        })
    }

    /// Bind `name` to `endpoint`. Rebinding an existing name replaces the
    /// previous endpoint without complaint, which is what lets a restarted
    /// replica reclaim its old name.
    pub async fn publish(&self, name: &str, endpoint: &str) -> Result<(), RegistryError> {
        self.inner
            .clone()
            .publish(ProtoPublishRequest {
                name: name.to_owned(),
                endpoint: endpoint.to_owned(),
            })
            .await
            .map_err(RegistryError::from_status)?;

        Ok(())
    }

    pub async fn lookup(&self, name: &str) -> Result<String, RegistryError> {
        let reply = self
            .inner
            .clone()
            .lookup(ProtoLookupRequest {
                name: name.to_owned(),
            })
            .await
            .map_err(RegistryError::from_status)?;

        Ok(reply.into_inner().endpoint)
    }

    /// All currently bound names, in no particular order.
    pub async fn list_names(&self) -> Result<Vec<String>, RegistryError> {
        let reply = self
            .inner
            .clone()
            .list_names(ProtoListNamesRequest {})
            .await
            .map_err(RegistryError::from_status)?;

        Ok(reply.into_inner().names)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Lookup of a name nothing has published under.
    #[error("name not bound in the registry: {0}")]
    NotFound(String),
    /// The registry itself is down or refused the call.
    #[error("registry unavailable: {0}")]
    Unavailable(tonic::Status),
}

impl RegistryError {
    fn from_status(status: tonic::Status) -> Self {
        match status.code() {
            Code::NotFound => RegistryError::NotFound(status.message().to_owned()),
            _ => RegistryError::Unavailable(status),
        }
    }
}
