//! Medical gas telemetry CLI
//!
//! A command-line tool for checking feed connectivity, KPIs, alerts and
//! node readings on a running telemetry service.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, readings, readings::PushArgs, telemetry};
use medgas_lib::Severity;

/// Medical gas telemetry CLI
#[derive(Parser)]
#[command(name = "medgas")]
#[command(author, version, about = "CLI for the medical gas telemetry service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (falls back to ~/.config/medgas/config.json, then http://localhost:8080)
    #[arg(long, env = "MEDGAS_API_URL")]
    pub api_url: Option<String>,

    /// Output format (table or json)
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show feed connectivity and pipeline counters
    Status,

    /// Show the current KPI snapshot
    Kpis,

    /// List the latest alerts
    Alerts {
        /// Maximum number of alerts
        #[arg(long, short, default_value_t = 20)]
        limit: usize,

        /// Minimum severity (low, medium, high, critical)
        #[arg(long, short)]
        severity: Option<Severity>,
    },

    /// List the latest readings
    Readings {
        /// Only readings from this node
        #[arg(long, short)]
        node: Option<String>,

        /// Maximum number of readings
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// List tracked sensor nodes
    Nodes,

    /// Send one reading to a service running the HTTP feed
    Push(PushArgs),

    /// Save the API URL and default format to the config file
    Configure {
        /// API endpoint URL to store
        #[arg(long)]
        api_url: Option<String>,

        /// Default output format to store
        #[arg(long)]
        default_format: Option<output::OutputFormat>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = config::Config::load()?;

    let api_url = file_config.resolve_api_url(cli.api_url.as_deref());
    let format = file_config.resolve_format(cli.format)?;
    let connect = || -> Result<client::ApiClient> {
        let client = client::ApiClient::new(&api_url)?;
        if cli.verbose {
            output::print_info(&format!("Using API at {}", client.base_url()));
        }
        Ok(client)
    };

    // Execute command
    match cli.command {
        Commands::Status => telemetry::show_status(&connect()?, format).await?,
        Commands::Kpis => telemetry::show_kpis(&connect()?, format).await?,
        Commands::Nodes => telemetry::list_nodes(&connect()?, format).await?,
        Commands::Alerts { limit, severity } => {
            alerts::list_alerts(&connect()?, limit, severity, format).await?;
        }
        Commands::Readings { node, limit } => {
            readings::list_readings(&connect()?, limit, node, format).await?;
        }
        Commands::Push(args) => readings::push_reading(&connect()?, args, format).await?,
        Commands::Configure {
            api_url,
            default_format,
        } => configure(file_config, api_url, default_format)?,
    }

    Ok(())
}

fn configure(
    mut config: config::Config,
    api_url: Option<String>,
    default_format: Option<output::OutputFormat>,
) -> Result<()> {
    if let Some(url) = api_url {
        // Validate before persisting
        client::ApiClient::new(&url)?;
        config.api_url = Some(url);
    }
    if let Some(format) = default_format {
        config.default_format = Some(
            match format {
                output::OutputFormat::Table => "table",
                output::OutputFormat::Json => "json",
            }
            .to_string(),
        );
    }

    let path = config.save()?;
    output::print_success(&format!("Saved configuration to {}", path.display()));
    Ok(())
}
