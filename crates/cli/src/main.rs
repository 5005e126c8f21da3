//! RVM CLI — the main entry point.
//!
//! Commands:
//! - `run`       — Start the controller daemon (hardware + operator API)
//! - `config`    — Show, validate or locate the configuration
//! - `doctor`    — Check configuration and local hardware API reachability
//! - `classify`  — Run a detector label through the classifier offline

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "rvm",
    about = "RVM — reverse vending machine controller",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ~/.rvm/config.toml)
    #[arg(short, long, global = true, env = "RVM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the controller daemon
    Run {
        /// Override the operator API port
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not serve the operator API
        #[arg(long)]
        no_api: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose configuration and hardware connectivity
    Doctor,

    /// Classify a detector label offline
    Classify {
        /// Raw label as the detector reports it
        label: String,

        /// Detector confidence in [0, 1]
        confidence: f64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the default configuration
    Default,
    /// Validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run { port, no_api } => commands::run::run(config_path, port, no_api).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Default => commands::config_cmd::default(),
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
        },
        Commands::Doctor => commands::doctor::run(config_path).await?,
        Commands::Classify { label, confidence } => {
            commands::classify::run(config_path, &label, confidence)?
        }
    }

    Ok(())
}
