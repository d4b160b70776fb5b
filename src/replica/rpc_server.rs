use crate::grpc::grpc_primary_api_server::GrpcPrimaryApi;
use crate::grpc::grpc_replica_control_server::GrpcReplicaControl;
use crate::grpc::{
    ProtoGetStateRequest, ProtoHandleGetReply, ProtoHandleGetRequest, ProtoHandlePutReply,
    ProtoHandlePutRequest, ProtoPingReply, ProtoPingRequest, ProtoPromoteReply,
    ProtoPromoteRequest, ProtoPushFullStateReply, ProtoPushFullStateRequest, ProtoStateSnapshot,
};
use crate::replica::replica::{PutError, Replica};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// PrimaryApiServer implements the client-op gRPC surface. Thin proto↔app
/// conversion only; every decision lives in [`Replica`].
pub(crate) struct PrimaryApiServer {
    logger: slog::Logger,
    replica: Arc<Replica>,
}

impl PrimaryApiServer {
    pub(crate) fn new(logger: slog::Logger, replica: Arc<Replica>) -> Self {
        PrimaryApiServer { logger, replica }
    }
}

#[tonic::async_trait]
impl GrpcPrimaryApi for PrimaryApiServer {
    async fn handle_put(
        &self,
        rpc_request: Request<ProtoHandlePutRequest>,
    ) -> Result<Response<ProtoHandlePutReply>, Status> {
        let rpc_request = rpc_request.into_inner();
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);

        // A non-primary refusal is an application-level `false`, not an RPC
        // error. The dispatcher must be able to tell it apart from an
        // unreachable replica.
        let applied = match self
            .replica
            .handle_put(rpc_request.key, rpc_request.value)
            .await
        {
            Ok(()) => true,
            Err(PutError::NotPrimary { .. }) => false,
        };

        Ok(Response::new(ProtoHandlePutReply { applied }))
    }

    async fn handle_get(
        &self,
        rpc_request: Request<ProtoHandleGetRequest>,
    ) -> Result<Response<ProtoHandleGetReply>, Status> {
        let rpc_request = rpc_request.into_inner();
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);

        let rpc_reply = match self.replica.handle_get(&rpc_request.key).await {
            Some(value) => ProtoHandleGetReply { found: true, value },
            None => ProtoHandleGetReply {
                found: false,
                value: String::new(),
            },
        };

        Ok(Response::new(rpc_reply))
    }

    async fn get_state(
        &self,
        _rpc_request: Request<ProtoGetStateRequest>,
    ) -> Result<Response<ProtoStateSnapshot>, Status> {
        let entries = self.replica.handle_get_state().await;
        slog::debug!(self.logger, "ServerWire - GetState of {} entries", entries.len());

        Ok(Response::new(ProtoStateSnapshot { entries }))
    }
}

/// ReplicaControlServer implements the control gRPC surface: state pushes,
/// promotion and liveness.
pub(crate) struct ReplicaControlServer {
    logger: slog::Logger,
    replica: Arc<Replica>,
}

impl ReplicaControlServer {
    pub(crate) fn new(logger: slog::Logger, replica: Arc<Replica>) -> Self {
        ReplicaControlServer { logger, replica }
    }
}

#[tonic::async_trait]
impl GrpcReplicaControl for ReplicaControlServer {
    async fn push_full_state(
        &self,
        rpc_request: Request<ProtoPushFullStateRequest>,
    ) -> Result<Response<ProtoPushFullStateReply>, Status> {
        let rpc_request = rpc_request.into_inner();

        // An absent snapshot message is an empty snapshot; the overwrite
        // still happens.
        let entries = rpc_request
            .snapshot
            .map(|snapshot| snapshot.entries)
            .unwrap_or_default();
        slog::debug!(self.logger, "ServerWire - PushFullState of {} entries", entries.len());

        self.replica.handle_push_full_state(entries).await;

        Ok(Response::new(ProtoPushFullStateReply {}))
    }

    async fn promote_to_primary(
        &self,
        _rpc_request: Request<ProtoPromoteRequest>,
    ) -> Result<Response<ProtoPromoteReply>, Status> {
        slog::debug!(self.logger, "ServerWire - PromoteToPrimary");

        self.replica.handle_promote().await;

        Ok(Response::new(ProtoPromoteReply {}))
    }

    async fn ping(
        &self,
        _rpc_request: Request<ProtoPingRequest>,
    ) -> Result<Response<ProtoPingReply>, Status> {
        let alive = self.replica.handle_ping();

        Ok(Response::new(ProtoPingReply { alive }))
    }
}
