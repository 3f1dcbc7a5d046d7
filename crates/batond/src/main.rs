//! batond: the Baton gateway daemon.
//!
//! Single binary that assembles the gateway:
//! - Source control (git) and process supervisor
//! - Rollout controller
//! - Heartbeat reaper
//! - Worker channel, deploy webhook, operator API
//!
//! # Usage
//!
//! ```text
//! batond serve --config baton.toml --port 8080
//! batond config --config baton.toml
//! ```

mod daemon;
mod reaper;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use baton_api::{DeployFilter, GatewayState, build_router};
use baton_supervisor::{CommandSupervisor, GitCli, ProcessSupervisor, SourceControl};

#[derive(Parser)]
#[command(name = "batond", about = "Baton canary rollout gateway")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway.
    Serve {
        /// Path to baton.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `gateway.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration and exit.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Serve { config, port } => serve(config, port).await,
        Command::Config { config } => {
            let config = daemon::load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,batond=debug,baton=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = daemon::load_config(config_path.as_deref())?;
    if let Some(port) = port {
        config.gateway.port = port;
    }
    info!(
        mode = ?config.gateway.mode,
        source = %config.source.path.display(),
        "baton gateway starting"
    );

    // ── Assemble ───────────────────────────────────────────────

    let source: Arc<dyn SourceControl> = Arc::new(GitCli::new(&config.source.path));
    let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(CommandSupervisor::new());
    let controller = daemon::build_controller(&config, source, supervisor).await;

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper_handle = tokio::spawn(reaper::run(
        Arc::clone(&controller),
        config.heartbeat_interval(),
        shutdown_rx,
    ));

    if config.worker.spawn_on_start && controller.spawn_worker().await.is_err() {
        warn!("initial worker spawn failed, waiting for a deploy or try_again");
    }

    // ── Serve ──────────────────────────────────────────────────

    let router = build_router(GatewayState::new(
        controller,
        DeployFilter::from_config(&config),
    ));
    let bind = (config.gateway.listen_addr.as_str(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {}:{}", bind.0, bind.1))?;
    info!(addr = %listener.local_addr()?, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = reaper_handle.await;
    info!("baton gateway stopped");
    Ok(())
}
