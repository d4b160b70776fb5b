use crate::grpc::grpc_primary_api_client::GrpcPrimaryApiClient;
use crate::grpc::grpc_replica_control_client::GrpcReplicaControlClient;
use crate::grpc::{
    ProtoGetStateRequest, ProtoHandleGetRequest, ProtoHandlePutRequest, ProtoPingRequest,
    ProtoPromoteRequest, ProtoPushFullStateRequest, ProtoStateSnapshot,
};
use crate::net::{self, ConnectError};
use crate::registry::{RegistryClient, RegistryError};
use std::collections::HashMap;
use tonic::transport::Channel;

/// Remote reference to one replica. Both of the replica's RPC surfaces ride
/// one shared channel, so the handle that served control calls keeps working
/// as a client-op handle after its replica is promoted.
///
/// Clones share the channel. Handles compare equal when they carry the same
/// registry name, regardless of when each was resolved; that is what keeps a
/// re-resolved replica from being enqueued twice.
#[derive(Clone, Debug)]
pub struct ReplicaHandle {
    name: String,
    endpoint: String,
    primary_api: GrpcPrimaryApiClient<Channel>,
    control: GrpcReplicaControlClient<Channel>,
}

impl PartialEq for ReplicaHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ReplicaHandle {}

impl ReplicaHandle {
    /// Open a channel to a replica at a known endpoint.
    pub async fn connect(
        name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, ConnectError> {
        let name = name.into();
        let endpoint = endpoint.into();
        let channel = net::dial(&endpoint).await?;

        Ok(ReplicaHandle {
            name,
            endpoint,
            primary_api: GrpcPrimaryApiClient::new(channel.clone()),
            control: GrpcReplicaControlClient::new(channel),
        })
    }

    /// Resolve `name` through the registry, then connect to whatever endpoint
    /// it is currently bound to.
    pub async fn resolve(registry: &RegistryClient, name: &str) -> Result<Self, ResolveError> {
        let endpoint = registry.lookup(name).await?;
        let handle = Self::connect(name, endpoint).await?;

        Ok(handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Client put, honored only if this replica is the primary. `Ok(false)`
    /// means the replica refused the write as a non-primary; nothing was
    /// stored anywhere.
    pub async fn put(&self, key: &str, value: &str) -> Result<bool, PeerUnreachable> {
        let reply = self
            .primary_api
            .clone()
            .handle_put(ProtoHandlePutRequest {
                key: key.to_owned(),
                value: value.to_owned(),
            })
            .await
            .map_err(|status| self.unreachable(status))?;

        Ok(reply.into_inner().applied)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, PeerUnreachable> {
        let reply = self
            .primary_api
            .clone()
            .handle_get(ProtoHandleGetRequest {
                key: key.to_owned(),
            })
            .await
            .map_err(|status| self.unreachable(status))?;

        let reply = reply.into_inner();
        if reply.found {
            Ok(Some(reply.value))
        } else {
            Ok(None)
        }
    }

    /// Complete copy of the replica's store, for seeding a newcomer.
    pub async fn get_state(&self) -> Result<HashMap<String, String>, PeerUnreachable> {
        let reply = self
            .primary_api
            .clone()
            .get_state(ProtoGetStateRequest {})
            .await
            .map_err(|status| self.unreachable(status))?;

        Ok(reply.into_inner().entries)
    }

    /// Overwrite the replica's entire store with `snapshot`.
    pub async fn push_full_state(
        &self,
        snapshot: &HashMap<String, String>,
    ) -> Result<(), PeerUnreachable> {
        self.control
            .clone()
            .push_full_state(ProtoPushFullStateRequest {
                snapshot: Some(ProtoStateSnapshot {
                    entries: snapshot.clone(),
                }),
            })
            .await
            .map_err(|status| self.unreachable(status))?;

        Ok(())
    }

    /// Tell the replica to become primary. Idempotent on the replica side.
    pub async fn promote_to_primary(&self) -> Result<(), PeerUnreachable> {
        self.control
            .clone()
            .promote_to_primary(ProtoPromoteRequest {})
            .await
            .map_err(|status| self.unreachable(status))?;

        Ok(())
    }

    /// Liveness probe. A replica that answers at all answers `true`.
    pub async fn ping(&self) -> Result<bool, PeerUnreachable> {
        let reply = self
            .control
            .clone()
            .ping(ProtoPingRequest {})
            .await
            .map_err(|status| self.unreachable(status))?;

        Ok(reply.into_inner().alive)
    }

    fn unreachable(&self, status: tonic::Status) -> PeerUnreachable {
        PeerUnreachable {
            peer: self.name.clone(),
            status,
        }
    }
}

/// An RPC to a replica failed at the transport level: the process is gone,
/// the channel is broken, or the server refused the connection.
#[derive(Debug, thiserror::Error)]
#[error("replica '{peer}' unreachable: {status}")]
pub struct PeerUnreachable {
    pub peer: String,
    pub status: tonic::Status,
}

/// Failed to turn a registry name into a connected [`ReplicaHandle`].
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
}
