mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use surfpilot_core::Backend;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "surfpilot")]
#[command(about = "A browser-driving computer-use agent", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration status
    Status,

    /// Drive a locally launched browser from the terminal
    Agent {
        /// Message to send (interactive mode if not provided)
        #[arg(short, long)]
        message: Option<String>,

        /// Page to open before the first turn (overrides agents.defaults.startUrl)
        #[arg(long)]
        url: Option<String>,

        /// Write every post-action screenshot into this directory
        #[arg(long)]
        screenshots: Option<PathBuf>,
    },

    /// Host sessions over WebSocket (long-running daemon)
    Gateway {
        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Executor for new sessions: local or remote (overrides agents.defaults.backend)
        #[arg(long)]
        backend: Option<Backend>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Agent {
            message,
            url,
            screenshots,
        } => {
            commands::agent::run(message, url, screenshots).await?;
        }
        Commands::Gateway {
            host,
            port,
            backend,
        } => {
            commands::gateway::run(host, port, backend).await?;
        }
    }

    Ok(())
}
