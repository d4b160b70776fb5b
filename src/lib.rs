mod dispatcher;
mod net;
mod registry;
mod replica;
mod shutdown;

pub mod grpc {
    include!("../generated/pbkv.rs");
}

pub use dispatcher::try_start_dispatcher;
pub use dispatcher::DispatchError;
pub use dispatcher::Dispatcher;
pub use dispatcher::DispatcherConfig;
pub use dispatcher::DispatcherServerHandle;
pub use dispatcher::DispatcherStartError;
pub use dispatcher::DEFAULT_DISCOVERY_INTERVAL;
pub use net::ConnectError;
pub use registry::try_start_registry;
pub use registry::RegistryClient;
pub use registry::RegistryError;
pub use registry::RegistryServerConfig;
pub use registry::RegistryServerHandle;
pub use registry::RegistryStartError;
pub use registry::ReplicaName;
pub use replica::try_start_replica;
pub use replica::PeerUnreachable;
pub use replica::PutError;
pub use replica::Replica;
pub use replica::ReplicaHandle;
pub use replica::ReplicaRole;
pub use replica::ReplicaServerConfig;
pub use replica::ReplicaServerHandle;
pub use replica::ReplicaStartError;
pub use replica::ResolveError;
pub use shutdown::ShutdownHandle;
