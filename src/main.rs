//! vxwhatsapp CLI entry point.
//!
//! `start` runs the transport with a JSON-lines bus on stdin/stdout;
//! `check-config` validates a config file and exits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{error, info, warn};

use vxwhatsapp::bus::{read_outbound_lines, JsonLinesBus};
use vxwhatsapp::config::{config_dir, load_config, resolve_password, Config};
use vxwhatsapp::lifecycle::RunOutcome;
use vxwhatsapp::transport::WhatsAppTransport;
use vxwhatsapp::whatsapp::{SidecarClient, SidecarCredentials};

/// WhatsApp transport for a JSON-lines message bus.
#[derive(Parser)]
#[command(name = "vxwhatsapp", version, about)]
struct Cli {
    /// Path to the config file (default: ~/.vxwhatsapp/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the transport until interrupted or stdin closes.
    Start,
    /// Parse and validate the config file, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config_dir()?.join("config.toml"),
    };

    match cli.command {
        Command::Start => handle_start(&config_path).await,
        Command::CheckConfig => handle_check_config(&config_path),
    }
}

fn load_validated(path: &Path) -> anyhow::Result<Config> {
    let config = load_config(path)?;
    config
        .validate()
        .with_context(|| format!("invalid config at {}", path.display()))?;
    Ok(config)
}

/// Validate the config and print a summary.
fn handle_check_config(path: &Path) -> anyhow::Result<()> {
    vxwhatsapp::logging::init_cli();
    let config = load_validated(path)?;
    info!(
        path = %path.display(),
        phone = %config.whatsapp.phone,
        backend = ?config.correlation.backend,
        echo = config.whatsapp.echo_to.is_some(),
        "config ok"
    );
    Ok(())
}

/// Run the transport.
async fn handle_start(path: &Path) -> anyhow::Result<()> {
    let base_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    // A missing .env is fine; the variable may come from the environment.
    let _ = dotenvy::from_path(base_dir.join(".env"));

    let config = load_validated(path)?;
    let _logging_guard =
        vxwhatsapp::logging::init_production(&base_dir.join("logs"), &config.logging)?;
    let password = resolve_password(&config.whatsapp, |key| std::env::var(key).ok())?;

    let client = SidecarClient::new(
        config.sidecar.base_url.clone(),
        SidecarCredentials {
            phone: config.whatsapp.phone.clone(),
            password,
        },
    );
    let bus = Arc::new(JsonLinesBus::new(tokio::io::stdout()));

    let transport = WhatsAppTransport::setup(&config, &base_dir, client, bus).await?;

    let outbound = transport.outbound();
    let mut reader = tokio::spawn(async move {
        read_outbound_lines(BufReader::new(tokio::io::stdin()), outbound).await
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("interrupt received, shutting down");
        }
        read = &mut reader => match read {
            Ok(Ok(count)) => info!(count, "stdin closed, shutting down"),
            Ok(Err(e)) => warn!(error = %e, "outbound reader stopped"),
            Err(e) => warn!(error = %e, "outbound reader task failed"),
        },
    }
    reader.abort();

    match transport.teardown().await {
        RunOutcome::Failed(e) => {
            error!(error = %e, "transport stopped after a client failure");
        }
        RunOutcome::Terminated | RunOutcome::Completed => info!("transport stopped"),
    }
    Ok(())
}
