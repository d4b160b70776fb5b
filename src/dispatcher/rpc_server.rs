use crate::dispatcher::dispatcher::{DispatchError, Dispatcher};
use crate::grpc::grpc_kv_frontend_server::GrpcKvFrontend;
use crate::grpc::{ProtoGetReply, ProtoGetRequest, ProtoPutReply, ProtoPutRequest};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// FrontendServer implements the client-facing gRPC surface. Thin proto↔app
/// conversion only; routing and failover live in [`Dispatcher`].
pub(crate) struct FrontendServer {
    logger: slog::Logger,
    dispatcher: Arc<Dispatcher>,
}

impl FrontendServer {
    pub(crate) fn new(logger: slog::Logger, dispatcher: Arc<Dispatcher>) -> Self {
        FrontendServer { logger, dispatcher }
    }
}

#[tonic::async_trait]
impl GrpcKvFrontend for FrontendServer {
    async fn put(
        &self,
        rpc_request: Request<ProtoPutRequest>,
    ) -> Result<Response<ProtoPutReply>, Status> {
        let rpc_request = rpc_request.into_inner();
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);

        match self
            .dispatcher
            .put(&rpc_request.key, &rpc_request.value)
            .await
        {
            Ok(ok) => Ok(Response::new(ProtoPutReply { ok })),
            Err(err @ DispatchError::Exhausted) => Err(Status::unavailable(err.to_string())),
        }
    }

    async fn get(
        &self,
        rpc_request: Request<ProtoGetRequest>,
    ) -> Result<Response<ProtoGetReply>, Status> {
        let rpc_request = rpc_request.into_inner();
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);

        match self.dispatcher.get(&rpc_request.key).await {
            Ok(Some(value)) => Ok(Response::new(ProtoGetReply { found: true, value })),
            Ok(None) => Ok(Response::new(ProtoGetReply {
                found: false,
                value: String::new(),
            })),
            Err(err @ DispatchError::Exhausted) => Err(Status::unavailable(err.to_string())),
        }
    }
}
