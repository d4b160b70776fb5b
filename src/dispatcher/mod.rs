mod discovery;
mod dispatcher;
mod rpc_server;
mod wiring;

pub use discovery::DEFAULT_DISCOVERY_INTERVAL;
pub use dispatcher::DispatchError;
pub use dispatcher::Dispatcher;
pub use wiring::try_start_dispatcher;
pub use wiring::DispatcherConfig;
pub use wiring::DispatcherServerHandle;
pub use wiring::DispatcherStartError;
