use clap::Parser;
use pbkv::{try_start_registry, RegistryServerConfig};
use slog::Drain;
use std::net::SocketAddr;

/// Name directory the other pbkv processes publish themselves into and
/// discover each other through.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct App {
    /// Address to serve the registry on.
    #[clap(long, default_value = "127.0.0.1:7000")]
    listen_on: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = App::parse();
    let logger = create_root_logger();

    slog::info!(
        logger,
        "pbkv-registry version: {}",
        env!("CARGO_PKG_VERSION")
    );

    let handle = try_start_registry(RegistryServerConfig {
        logger: logger.clone(),
        listen_addr: app.listen_on,
    })
    .await?;

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
