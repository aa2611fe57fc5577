//! Podcast Relay - republishes a remote podcast index
//!
//! Serves the index with local mirrors of its audio and transcript files,
//! keeps the mirror's disk usage in check, and invalidates the cached index
//! on repository webhooks.

mod cache;
mod config;
mod error;
mod server;
mod service;
mod upstream;
mod webhook;

#[cfg(test)]
mod test_support;

use anyhow::{anyhow, Context, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use cache::janitor::DEFAULT_MAX_AGE_DAYS;
use cache::Janitor;
use config::Config;
use server::AppState;
use service::PodcastService;

/// CLI command
#[derive(Debug, PartialEq)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Remove mirrored files older than the given age
    Cleanup { max_age_days: u64 },
    /// Print disk usage of the mirror
    Storage,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"Podcast Relay - Republish a podcast index with locally mirrored media

USAGE:
    podcast-relay                        # Run HTTP server (default)
    podcast-relay serve
    podcast-relay cleanup [max_age_days]
    podcast-relay storage
    podcast-relay help

COMMANDS:
    serve    Serve the index, mirrored files and front-end
    cleanup  Delete mirrored files older than max_age_days (default 30)
    storage  Show disk usage of the mirror directory
    help     Show this help message

ENVIRONMENT:
    DATA_SOURCE             Primary podcast index URL
    BACKUP_DATA_SOURCE      Backup podcast index URL
    BASE_URL                Base URL for relative media paths
    GITHUB_WEBHOOK_SECRET   Shared secret for webhook signatures
    PORT                    Listen port (default 8080)
    STORAGE_PATH            Persistent mirror root (default /data)
    USE_PERSISTENT_STORAGE  Mirror into STORAGE_PATH (true/false)
    PUBLIC_DIR              Static front-end directory (default public)
    CACHE_DURATION_SECS     Index cache lifetime (default 3600)
    RUST_LOG                Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args<I>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();

    if args.len() < 2 {
        return Ok(Command::Serve);
    }

    match args[1].as_str() {
        "serve" => Ok(Command::Serve),
        "cleanup" => {
            let max_age_days = match args.get(2) {
                Some(days) => days
                    .parse()
                    .map_err(|_| anyhow!("Invalid max_age_days: {}", days))?,
                None => DEFAULT_MAX_AGE_DAYS,
            };
            Ok(Command::Cleanup { max_age_days })
        }
        "storage" => Ok(Command::Storage),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args(env::args()) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        command => run(command, Config::from_env()?).await,
    }
}

async fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Serve => {
            info!(
                data_source = %config.data_source,
                backup_data_source = %config.backup_data_source,
                base_url = %config.base_url,
                storage = %config.storage_root.display(),
                persistent = config.persistent_storage,
                webhook_secret = config.webhook_secret.is_some(),
                "Starting podcast relay"
            );

            let service = match PodcastService::new(&config) {
                Ok(service) => service,
                Err(e) => {
                    error!(error = %e, "Failed to initialize service");
                    return Err(e);
                }
            };

            let addr = config.listen_addr();
            let state = AppState {
                service: Arc::new(service),
                config: Arc::new(config),
            };
            server::serve(addr, state).await?;

            info!("Shutdown complete.");
        }
        Command::Cleanup { max_age_days } => {
            let janitor = Janitor::new(config.storage_root.clone());
            let removed = janitor.cleanup(max_age_days);
            println!(
                "Removed {} file(s) older than {} day(s) from {}",
                removed,
                max_age_days,
                janitor.root().display()
            );
        }
        Command::Storage => {
            let janitor = Janitor::new(config.storage_root.clone());
            let usage = janitor
                .disk_usage()
                .with_context(|| format!("Failed to stat filesystem of {:?}", janitor.root()))?;
            println!("Storage: {}", janitor.root().display());
            println!("  total: {} bytes", usage.total);
            println!("  used:  {} bytes ({:.1}%)", usage.used, usage.usage_percent);
            println!("  free:  {} bytes", usage.free);
        }
        Command::Help => print_help(),
    }

    Ok(())
}
