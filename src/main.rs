//! mlogd: a connection-oriented message logging server.
//!
//! Clients identify themselves (NAME), present a credential (AUTH), then
//! stream messages (LOG) that are appended to a durable log file, and leave
//! with TERM. One thread of control services every connection through a
//! single readiness-multiplexed event loop.

use mlogd::config::Config;
use mlogd::runtime::Server;
use mlogd::sink::FileSink;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        file = %config.file.display(),
        max_clients = config.max_clients,
        "starting mlogd"
    );

    let sink = FileSink::open(&config.file).map_err(|e| {
        format!(
            "could not open log file '{}': {}",
            config.file.display(),
            e
        )
    })?;

    let server = Server::bind(&config, Box::new(sink))?;
    server.run()?;
    Ok(())
}
