mod client;
mod names;
mod server;

pub use client::RegistryClient;
pub use client::RegistryError;
pub use names::ReplicaName;
pub use server::try_start_registry;
pub use server::RegistryServerConfig;
pub use server::RegistryServerHandle;
pub use server::RegistryStartError;
