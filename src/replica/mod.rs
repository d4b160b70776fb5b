mod peer_client;
mod replica;
mod rpc_server;
mod store;
mod wiring;

pub use peer_client::PeerUnreachable;
pub use peer_client::ReplicaHandle;
pub use peer_client::ResolveError;
pub use replica::PutError;
pub use replica::Replica;
pub use replica::ReplicaRole;
pub use wiring::try_start_replica;
pub use wiring::ReplicaServerConfig;
pub use wiring::ReplicaServerHandle;
pub use wiring::ReplicaStartError;
