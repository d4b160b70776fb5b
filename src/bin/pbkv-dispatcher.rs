use clap::Parser;
use pbkv::{try_start_dispatcher, DispatcherConfig, DEFAULT_DISCOVERY_INTERVAL};
use slog::Drain;
use std::net::SocketAddr;

/// Stateless front door: clients send Put/Get here, the dispatcher routes
/// them to whichever replica is currently primary.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct App {
    /// Registry endpoint, host:port.
    #[clap(long, default_value = "127.0.0.1:7000")]
    registry: String,

    /// Address to serve the client-facing surface on.
    #[clap(long, default_value = "127.0.0.1:8000")]
    listen_on: SocketAddr,

    /// Id of the replica to route to until the first failover. The replica
    /// must be running.
    #[clap(long)]
    primary_id: u64,

    /// Comma-separated ids of replicas to queue as backups, in promotion
    /// order.
    #[clap(long, value_delimiter = ',')]
    backup_ids: Vec<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = App::parse();
    let logger = create_root_logger();

    slog::info!(
        logger,
        "pbkv-dispatcher version: {}",
        env!("CARGO_PKG_VERSION")
    );

    let handle = try_start_dispatcher(DispatcherConfig {
        logger: logger.clone(),
        listen_addr: app.listen_on,
        registry_endpoint: app.registry,
        initial_primary_id: app.primary_id,
        initial_backup_ids: app.backup_ids,
        discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
    })
    .await?;

    slog::info!(logger, "Dispatcher serving on {}", handle.local_addr);

    tokio::signal::ctrl_c().await?;
    slog::info!(logger, "Received shutdown signal");
    drop(handle);

    Ok(())
}

fn create_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
