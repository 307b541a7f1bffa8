//! Client executable: a terminal front end over the core session engine.
//!
//! The desktop UI this replaces drove the same operations through an
//! event bridge; here events print to the terminal and commands come from
//! stdin.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use gossip_client::adapters::audio::{MicBuffer, PlaybackBuffer};
use gossip_client::adapters::events::TerminalEvents;
use gossip_client::adapters::loopback::{LoopbackConnector, LoopbackNetwork};
use gossip_client::settings;
use gossip_core::client::{ClientConfig, ClientSession};
use gossip_core::crypto;

/// Client for the gossip mesh.
#[derive(Parser, Debug)]
#[command(name = "gossip-client", version, about)]
struct Cli {
    /// Hub host (falls back to the settings file)
    #[arg(long)]
    host: Option<String>,

    /// Hub port (falls back to the settings file)
    #[arg(long)]
    port: Option<u16>,

    /// Display name (falls back to the settings file)
    #[arg(long)]
    username: Option<String>,

    /// Shared password
    #[arg(long, default_value = "anonymous")]
    password: String,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let stored = settings::load()?;

    let host = cli
        .host
        .or_else(|| (!stored.default_host.is_empty()).then(|| stored.default_host.clone()))
        .context("no hub host given (use --host or the settings file)")?;
    let port = match cli.port {
        Some(port) => port,
        None => stored.default_port.parse().unwrap_or(1720),
    };
    let username = cli
        .username
        .unwrap_or_else(|| stored.default_username.clone());

    let password_hash = crypto::hash_password(&cli.password)?;

    // TODO: back this with a WebRTC connector so calls work across
    // processes; the loopback network only pairs links in-process.
    let network = LoopbackNetwork::new();
    let connector = Arc::new(LoopbackConnector::new(network));
    let events = Arc::new(TerminalEvents);
    let mic = Arc::new(MicBuffer::new());
    let speakers: Arc<dyn gossip_core::client::ports::AudioSink> =
        Arc::new(PlaybackBuffer::new());

    let (session, reader) = ClientSession::connect(
        ClientConfig {
            host,
            port,
            password_hash,
        },
        connector,
        events,
        Arc::clone(&mic) as Arc<dyn gossip_core::client::ports::AudioSource>,
        speakers,
    )
    .await?;

    let reader_task = tokio::spawn(reader.run());

    if !username.is_empty() {
        println!("* hello, {username}");
    }
    println!("* commands: /call /join <id> /hangup /mute /deaf /quit, anything else is chat");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => {
                session.disconnect().await.ok();
                break;
            }
            ("/call", _) => {
                if let Err(error) = session.start_recording().await {
                    println!("! cannot start call: {error}");
                }
            }
            ("/join", id) if !id.is_empty() => {
                session.update_call_id(id).await;
                if let Err(error) = session.start_recording().await {
                    println!("! cannot join call: {error}");
                }
            }
            ("/hangup", _) => {
                if let Err(error) = session.stop_recording().await {
                    println!("! hang-up failed: {error}");
                }
            }
            ("/mute", _) => {
                session.toggle_mute();
                println!("* muted: {}", session.is_muted());
            }
            ("/deaf", _) => {
                session.toggle_deafen();
                println!("* deafened: {}", session.is_deafened());
            }
            _ => {
                let channel = session
                    .channels()
                    .await
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| "general".to_owned());
                if let Err(error) = session.send_message(line, 0, &channel).await {
                    println!("! message not sent: {error}");
                }
            }
        }
    }

    mic.close();
    reader_task.abort();
    Ok(())
}

fn init_logging(debug: bool) {
    let default = if debug {
        "info,gossip_core=debug,gossip_client=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
