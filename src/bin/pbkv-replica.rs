use clap::Parser;
use pbkv::{try_start_replica, ReplicaRole, ReplicaServerConfig};
use slog::Drain;
use std::net::SocketAddr;

/// One replica of the key-value store. Starts as a backup unless told
/// otherwise and waits to be discovered.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct App {
    /// Positive id; the replica publishes itself as `replica<id>`.
    #[clap(long)]
    id: u64,

    /// Registry endpoint, host:port.
    #[clap(long, default_value = "127.0.0.1:7000")]
    registry: String,

    /// Address to bind. It is published as-is, so it must be reachable by the
    /// dispatcher and by peer replicas.
    #[clap(long, default_value = "127.0.0.1:0")]
    listen_on: SocketAddr,

    /// Start as the primary.
    #[clap(long)]
    primary: bool,

    /// Comma-separated ids of already-running replicas to treat as the
    /// initial backups. Only a starting primary has backups.
    #[clap(long, value_delimiter = ',', requires = "primary")]
    backups: Vec<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = App::parse();
    let logger = create_root_logger();

    slog::info!(
        logger,
        "pbkv-replica version: {}",
        env!("CARGO_PKG_VERSION")
    );

    let initial_role = if app.primary {
        ReplicaRole::Primary
    } else {
        ReplicaRole::Backup
    };

    let handle = try_start_replica(ReplicaServerConfig {
        logger: logger.clone(),
        id: app.id,
        listen_addr: app.listen_on,
        registry_endpoint: app.registry,
        initial_role,
        initial_backup_ids: app.backups,
    })
    .await?;

    slog::info!(
        logger,
        "Replica '{}' serving on {} as {:?}",
        handle.replica.name(),
        handle.local_addr,
        initial_role
    );

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
