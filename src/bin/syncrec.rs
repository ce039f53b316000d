//! syncrec - command-line client for the syncrec daemon
//!
//! Manages the device list, connects devices, and starts or stops recording
//! on all of them at once. Starts the daemon on demand unless `--no-start`.
//!
//! # Usage
//!
//! ```text
//! syncrec devices                         # list devices and their status
//! syncrec add 192.168.1.20 4455 -p secret # register a device
//! syncrec connect --all                   # connect every device
//! syncrec start                           # synchronized start
//! syncrec stop
//! syncrec transport set 192.168.1.50 8000 # REAPER OSC target
//! syncrec watch                           # follow status and log events
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use syncrec_cli::render;
use syncrec_cli::{daemon, ClientConfig, DaemonClient};
use syncrec_core::{DeviceDescriptor, DeviceKey, TransportTarget};

// ============================================================================
// CLI Arguments
// ============================================================================

/// syncrec - start and stop recording on many OBS instances at once
#[derive(Parser, Debug)]
#[command(name = "syncrec", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Daemon socket (default: $SYNCREC_SOCKET or /tmp/syncrec.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Do not start the daemon if it is not running
    #[arg(long, global = true)]
    no_start: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered devices
    Devices,
    /// Register a device
    Add {
        /// Host name or IP address
        ip: String,
        /// OBS WebSocket port
        #[arg(default_value_t = 4455)]
        port: u16,
        /// OBS WebSocket password
        #[arg(short, long, default_value = "")]
        password: String,
        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,
    },
    /// Remove a device (disconnecting it first)
    Remove {
        /// Device address as host:port
        #[arg(value_parser = parse_key)]
        device: DeviceKey,
    },
    /// Connect one device, or all with --all
    Connect {
        /// Device address as host:port
        #[arg(value_parser = parse_key, required_unless_present = "all")]
        device: Option<DeviceKey>,
        /// Connect every registered device
        #[arg(long, conflicts_with = "device")]
        all: bool,
    },
    /// Disconnect a device
    Disconnect {
        /// Device address as host:port
        #[arg(value_parser = parse_key)]
        device: DeviceKey,
    },
    /// Schedule a synchronized start on every connected device
    Start,
    /// Stop recording on every connected device
    Stop,
    /// Show or set the transport target (OSC over UDP)
    Transport {
        #[command(subcommand)]
        action: Option<TransportCommand>,
    },
    /// Follow device status and log events
    Watch,
    /// Check that the daemon responds
    Ping,
}

#[derive(Subcommand, Debug)]
enum TransportCommand {
    /// Show the current target
    Get,
    /// Set the target
    Set { ip: String, port: u16 },
}

fn parse_key(s: &str) -> Result<DeviceKey, String> {
    DeviceKey::parse(s).map_err(|e| e.to_string())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env();
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }

    if !args.no_start {
        if let Err(e) = daemon::ensure_daemon_running().await {
            warn!(error = %e, "Could not start daemon");
        }
    }

    if let Command::Watch = args.command {
        return watch(config).await;
    }

    let mut client = DaemonClient::connect(config)
        .await
        .context("Is syncrecd running? Try 'syncrecd start'")?;
    debug!(client_id = client.client_id(), "Connected to daemon");

    let result = run_command(&mut client, args.command).await;
    if let Err(e) = client.close().await {
        debug!(error = %e, "Error closing connection");
    }
    result
}

async fn run_command(client: &mut DaemonClient, command: Command) -> Result<()> {
    let reply = match command {
        Command::Devices => {
            let devices = client.list_devices().await?;
            println!("{}", render::device_table(&devices));
            return Ok(());
        }
        Command::Add {
            ip,
            port,
            password,
            name,
        } => {
            client
                .add_device(DeviceDescriptor::new(ip, port, password, name))
                .await?
        }
        Command::Remove { device } => client.remove_device(&device).await?,
        Command::Connect { all: true, .. } => client.connect_all().await?,
        Command::Connect {
            device: Some(device),
            ..
        } => client.connect_device(&device).await?,
        Command::Connect { device: None, .. } => bail!("Give a device address or --all"),
        Command::Disconnect { device } => client.disconnect_device(&device).await?,
        Command::Start => client.start_recording().await?,
        Command::Stop => client.stop_recording().await?,
        Command::Transport {
            action: Some(TransportCommand::Set { ip, port }),
        } => {
            let target = TransportTarget::new(ip, port)?;
            client.set_transport(&target).await?
        }
        Command::Transport { .. } => client.get_transport().await?,
        Command::Ping => {
            let seq = client.ping(1).await?;
            println!("pong {seq}");
            return Ok(());
        }
        Command::Watch => bail!("watch is handled separately"),
    };

    println!("{}", render::reply(&reply));
    Ok(())
}

/// Prints events until Ctrl+C, reconnecting whenever the daemon goes away.
async fn watch(config: ClientConfig) -> Result<()> {
    let cancel_token = CancellationToken::new();

    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    while !cancel_token.is_cancelled() {
        let mut client = match DaemonClient::connect_with_retry(config.clone(), &cancel_token).await
        {
            Ok(client) => client,
            Err(_) if cancel_token.is_cancelled() => break,
            Err(e) => return Err(e.into()),
        };
        client.subscribe().await?;

        loop {
            let event = tokio::select! {
                _ = cancel_token.cancelled() => return Ok(()),
                event = client.next_event() => event,
            };

            match event {
                Ok(Some(event)) => {
                    if let Some(line) = render::event_line(&event, Local::now()) {
                        println!("{line}");
                    }
                }
                Ok(None) => {
                    eprintln!("Daemon connection closed, reconnecting...");
                    break;
                }
                Err(e) => {
                    eprintln!("Event stream error: {e}, reconnecting...");
                    break;
                }
            }
        }
    }

    Ok(())
}
