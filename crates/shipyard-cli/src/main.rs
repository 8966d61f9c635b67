//! Shipyard build scheduler CLI.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Dispatches queued builds to a pool of build containers", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, env = "SHIPYARD_LOG_JSON", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured queues and dispatch builds until interrupted
    Run {
        /// KDL configuration file (environment variables are used when omitted)
        #[arg(long, env = "SHIPYARD_CONFIG")]
        config: Option<String>,
    },
    /// Check that the build container fleet is fully up
    Fleet {
        /// KDL configuration file (environment variables are used when omitted)
        #[arg(long, env = "SHIPYARD_CONFIG")]
        config: Option<String>,
    },
    /// Notify a build's callbacks that it timed out
    ReportTimeout {
        /// URL of the build's log callback
        #[arg(long)]
        log_callback: String,
        /// URL of the build's status callback
        #[arg(long)]
        status_callback: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Run { config } => {
            commands::run::run(config.as_deref()).await?;
        }
        Commands::Fleet { config } => {
            let healthy = commands::fleet::check(config.as_deref()).await?;
            if !healthy {
                std::process::exit(1);
            }
        }
        Commands::ReportTimeout {
            log_callback,
            status_callback,
        } => {
            commands::report_timeout(&log_callback, &status_callback).await?;
        }
    }

    Ok(())
}
