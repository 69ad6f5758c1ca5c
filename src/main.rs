use clap::{Parser, Subcommand};
use logship::config::{load_config, resolve_config_path};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logship")]
#[command(about = "Log file tailer and shipper", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail, label and ship logs until interrupted
    Run,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config
    Init {
        #[arg(long)]
        stdout: bool,
    },
    /// Validate a config and print a summary
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run) | None => {
            let config_path = require_config_path(cli.config.as_deref())?;
            // The configured level only applies when RUST_LOG is unset
            let log_level = load_config(&config_path)
                .map(|c| c.server.log_level)
                .unwrap_or_else(|_| "info".to_string());
            init_tracing(&log_level);

            logship::cli::run::run(&config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                logship::cli::config::init(stdout)?;
            }
            ConfigAction::Check => {
                let config_path = require_config_path(cli.config.as_deref())?;
                logship::cli::config::check(&config_path)?;
            }
        },
    }

    Ok(())
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("logship={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn require_config_path(explicit: Option<&Path>) -> Result<PathBuf, String> {
    resolve_config_path(explicit).ok_or_else(|| {
        "no config file found; pass --config or run `logship config init`".to_string()
    })
}
