//! syncrec daemon - device pool and synchronized recording server
//!
//! Holds sessions to every registered OBS instance, schedules synchronized
//! starts, and serves the `syncrec` CLI over a Unix socket. `SIGUSR1` starts
//! recording and `SIGUSR2` stops it.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! syncrecd start
//!
//! # Start the daemon (background) with an explicit config file
//! syncrecd start -d --config ~/syncrec.toml
//!
//! # Stop the daemon
//! syncrecd stop
//!
//! # Check daemon status
//! syncrecd status
//! ```

use std::fs::{self, File};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use syncrec_cli::daemon::{daemon_pid, is_process_running, log_file_path, pid_file_path};
use syncrec_cli::daemon::{remove_pid_file, stop_daemon, write_pid};
use syncrecd::config::DaemonConfig;
use syncrecd::controller::Controller;
use syncrecd::registry::{DeviceRegistry, DeviceStore};
use syncrecd::server::DaemonServer;
use syncrecd::session::ObsConnector;
use syncrecd::trigger::{spawn_trigger, SignalTrigger, TriggerHandler};

/// syncrec daemon - synchronized OBS recording
#[derive(Parser, Debug)]
#[command(name = "syncrecd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Config file (default: $CONFIG_DIR/syncrec/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let pid_file = pid_file_path();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = daemon_pid(&pid_file) {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'syncrecd stop' to stop it first.");
                process::exit(1);
            }

            // Load before forking so config errors reach the terminal.
            let config = DaemonConfig::load(config.as_deref())?;

            if daemon {
                daemonize()?;
            }

            write_pid(&pid_file).context("Failed to write PID file")?;
            let result = run_daemon(config);
            remove_pid_file(&pid_file);

            result
        }
        Command::Stop => match stop_daemon(&pid_file).context("Failed to signal daemon")? {
            Some(pid) => {
                println!("Stopping daemon (PID {pid})...");
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                bail!("Daemon did not stop within 5 seconds");
            }
            None => {
                println!("Daemon is not running.");
                Ok(())
            }
        },
        Command::Status => match daemon_pid(&pid_file) {
            Some(pid) => {
                println!("Daemon is running (PID {pid})");
                if let Ok(config) = DaemonConfig::load(None) {
                    if config.socket_path.exists() {
                        println!("Socket: {}", config.socket_path.display());
                    }
                    println!("Devices: {}", config.devices_file.display());
                }
                Ok(())
            }
            None => {
                remove_pid_file(&pid_file);
                println!("Daemon is not running.");
                process::exit(1);
            }
        },
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("syncrecd=info".parse()?)
                .add_directive("syncrec_core=info".parse()?)
                .add_directive("syncrec_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        devices_file = %config.devices_file.display(),
        "syncrec daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = DeviceRegistry::load(DeviceStore::new(&config.devices_file));
    let controller = Controller::spawn(
        registry,
        Arc::new(ObsConnector),
        config.controller_settings(),
        cancel_token.clone(),
    );

    let handler: Arc<dyn TriggerHandler> = controller.orchestrator().clone();
    spawn_trigger(Box::new(SignalTrigger), handler, cancel_token.clone());

    let server = DaemonServer::new(&config.socket_path, controller.clone(), cancel_token);
    info!(socket = %server.socket_path().display(), "Starting server");

    let result = server.run().await;

    controller.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("syncrec daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
