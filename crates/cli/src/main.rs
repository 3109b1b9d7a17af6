//! Helmsman CLI — the main entry point.
//!
//! Commands:
//! - `config`  — Show or validate the effective configuration
//! - `replay`  — Run the agent loop against a scripted model transcript

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "helmsman",
    about = "Helmsman — agent execution core",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config {
        /// Load and validate the configuration instead of printing it
        #[arg(long)]
        validate: bool,

        /// Print the config file path
        #[arg(long, conflicts_with = "validate")]
        path: bool,
    },

    /// Run the agent loop offline against a scripted model
    Replay {
        /// JSON file with the scripted model responses
        #[arg(short, long)]
        script: PathBuf,

        /// The user message that starts the run
        #[arg(short, long)]
        message: String,

        /// System prompt for the run
        #[arg(long, default_value = "You are a helpful assistant.")]
        system: String,

        /// Override run.max_turns
        #[arg(long)]
        max_turns: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config { validate: true, .. } => commands::config_cmd::validate().await?,
        Commands::Config { path: true, .. } => commands::config_cmd::path().await?,
        Commands::Config { .. } => commands::config_cmd::show().await?,
        Commands::Replay {
            script,
            message,
            system,
            max_turns,
        } => commands::replay::run(&script, &message, &system, max_turns).await?,
    }

    Ok(())
}
