use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::config::ServerConfig;
use crate::router::join_methods;
use crate::server::ServerHandle;

/// Command-line interface for machwire
#[derive(Parser)]
#[command(name = "machwire", version)]
#[command(about = "Coroutine HTTP/1.1 routing and dispatch core", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve the demo application until SIGINT or SIGTERM
    Serve {
        /// Address and port to bind the server to
        #[arg(long, default_value = "0.0.0.0:8080", env = "MACHWIRE_ADDR")]
        addr: String,

        /// YAML configuration file
        #[arg(short, long, env = "MACHWIRE_CONFIG")]
        config: Option<PathBuf>,

        /// Scheduler threads (overrides the configuration file)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Print the demo application's routing table
    Routes {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Execute the CLI command provided by the user
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, a route fails to register or
/// the server fails to bind.
pub fn run_cli() -> anyhow::Result<()> {
    run(Cli::parse())
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve {
            addr,
            config,
            workers,
        } => {
            let mut config = ServerConfig::load(config.as_deref())?;
            if let Some(workers) = workers {
                config.runtime.workers = workers;
            }
            config.runtime.apply();

            let app = crate::demo::app(config).context("building demo application")?;
            let handle = app
                .serve(addr.as_str())
                .with_context(|| format!("binding {addr}"))?;
            info!(addr = %handle.addr(), "Serving; send SIGINT or SIGTERM to stop");
            wait_and_stop(handle)
        }
        Commands::Routes { config } => {
            let config = ServerConfig::load(config.as_deref())?;
            let app = crate::demo::app(config).context("building demo application")?;
            for route in app.router().routes() {
                println!(
                    "{:<16} {:<32} {}{}",
                    join_methods(route.methods()),
                    route.pattern().as_str(),
                    route.name().unwrap_or("-"),
                    if route.is_stream() { " (stream)" } else { "" },
                );
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
fn wait_and_stop(handle: ServerHandle) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    let mut signals = signal_hook::iterator::Signals::new([SIGINT, SIGTERM])
        .context("installing signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received");
    }
    handle.stop();
    Ok(())
}

#[cfg(not(unix))]
fn wait_and_stop(handle: ServerHandle) -> anyhow::Result<()> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("accept loop panicked"))
}
