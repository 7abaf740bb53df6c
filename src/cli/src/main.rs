//! License CLI - inspect and update seat authorizations on a license service replica.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, health, license};
use output::OutputFormat;

/// License - seat authorization CLI
#[derive(Parser)]
#[command(
    name = "license",
    version,
    about = "Inspect and update license seat authorizations",
    long_about = "CLI tool for reading and updating user seat authorizations on any license service replica.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "LICENSE_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a user's authorization
    Get(license::GetArgs),

    /// Update fields of a user's authorization
    Update(license::UpdateArgs),

    /// Check service health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(config::load_api_url)
        .unwrap_or_else(|| "http://localhost:8000".to_string());

    let client = client::ApiClient::new(&api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Get(args) => license::get(args, &client, format).await,
        Commands::Update(args) => license::update(args, &client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
