//! Hub executable: CLI parsing, logging setup, persisted state files, and
//! the accept-loop wiring around [`gossip_core::hub::Hub`].

mod files;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gossip_core::crypto;
use gossip_core::hub::{Hub, HubConfig};

/// Relay hub for the gossip mesh.
#[derive(Parser, Debug)]
#[command(name = "gossip-hub", version, about)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,

    /// Enable connection logging
    #[arg(short = 'l', long = "log-connections")]
    log_connections: bool,

    /// IP to listen on
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 1720)]
    port: u16,

    /// Password clients must present (hashed at startup)
    #[arg(short = 'k', long, default_value = "anonymous")]
    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_connections);

    info!(version = env!("CARGO_PKG_VERSION"), "starting gossip hub");

    let password_hash = crypto::hash_password(&cli.password)?;
    let server_name = files::load_server_name()?;
    let channels = files::load_channels()?;
    info!(%server_name, channels = channels.len(), "hub state loaded");

    let hub = Arc::new(Hub::new(HubConfig {
        password_hash,
        server_name,
        channels,
    })?);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    hub.run(listener).await
}

/// `-d` raises the gossip crates to debug; `-l` turns on the per-connection
/// lifecycle log lines (target `connection`).
fn init_logging(debug: bool, log_connections: bool) {
    let mut directives = vec!["info".to_owned()];
    if debug {
        directives.push("gossip_core=debug".to_owned());
        directives.push("gossip_hub=debug".to_owned());
    }
    directives.push(if log_connections {
        "connection=info".to_owned()
    } else {
        "connection=warn".to_owned()
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
