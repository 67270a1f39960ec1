use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod probe;
mod run;

use probe::run_probe;
use run::run_node;

/// Errors surfaced by CLI commands
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Discovery error: {0}")]
    Discovery(#[from] zihin_discovery::DiscoveryError),

    #[error("Failed to read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "zihin", version)]
#[command(about = "Zihin CLI - Service discovery node and health probe")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a discovery node configured from ZIHIN_* environment variables
    Run {
        /// JSON array of services to register at startup
        #[arg(long)]
        services: Option<PathBuf>,
        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Print statistics every N seconds
        #[arg(long, default_value_t = 30)]
        stats_interval_secs: u64,
    },
    /// Probe one endpoint once; exits non-zero if it is unhealthy
    Probe {
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
        /// http, tcp, or anything else for ping
        #[arg(long, default_value = "http")]
        protocol: String,
        /// Explicit health check URL (implies HTTP)
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    // Initialize JSON logging once.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            services,
            duration_secs,
            stats_interval_secs,
        } => {
            if let Err(e) = run_node(services, duration_secs, stats_interval_secs).await {
                tracing::error!(error = %e, "Discovery node failed");
                std::process::exit(1);
            }
        }
        Commands::Probe {
            host,
            port,
            protocol,
            url,
            timeout_secs,
        } => match run_probe(host, port, protocol, url, timeout_secs).await {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                tracing::error!(error = %e, "Probe failed");
                std::process::exit(2);
            }
        },
    }
}
