//! Client-side dialing and server-side binding shared by every component.
//! Endpoints travel as plain `host:port` strings, the same form the registry
//! stores them in.

use std::net::SocketAddr;
use tonic::transport::server::TcpIncoming;
use tonic::transport::{Channel, Endpoint};

/// Failed to turn an endpoint string into a live channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("failed to connect to '{endpoint}': {source}")]
    ConnectFailure {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
}

/// Dial `host:port`, eagerly establishing the connection so an unreachable
/// peer surfaces here instead of on first use.
pub(crate) async fn dial(endpoint: &str) -> Result<Channel, ConnectError> {
    let builder =
        Endpoint::from_shared(format!("http://{}", endpoint)).map_err(|source| {
            ConnectError::InvalidEndpoint {
                endpoint: endpoint.to_owned(),
                source,
            }
        })?;

    builder
        .connect()
        .await
        .map_err(|source| ConnectError::ConnectFailure {
            endpoint: endpoint.to_owned(),
            source,
        })
}

/// Bind `addr` and hand back the bound address plus the accept stream for
/// `serve_with_incoming_shutdown`. The listener is live when this returns,
/// so a caller may publish the address before the serve task is polled.
pub(crate) async fn bind_incoming(
    addr: SocketAddr,
) -> Result<(SocketAddr, TcpIncoming), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let incoming = TcpIncoming::from_listener(listener, true, None)?;

    Ok((local_addr, incoming))
}
