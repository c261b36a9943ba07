//! ---
//! gs_section: "05-networking-external-interfaces"
//! gs_subsection: "binary"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Operator CLI for the gridstrike attack harness."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gridstrike_common::{init_tracing, AppConfig, ThreatModelConfig};
use gridstrike_metrics::{new_registry, spawn_http_server};
use tracing::{info, warn};

mod commands;
mod harness;

use harness::Harness;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Closed-loop attack orchestration against a federated grid co-simulation",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "YAML threat model replacing the configured one")]
    threat_model: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Execute a single attack intent and print its result")]
    Execute(commands::ExecuteArgs),
    #[command(about = "Run one campaign with a built-in strategy")]
    Campaign(commands::CampaignArgs),
    #[command(about = "Compare the heuristic strategy against the random baseline")]
    Compare(commands::CompareArgs),
    #[command(about = "Advance one step and print the grid snapshot")]
    Snapshot {
        #[arg(long, help = "Print the reconnaissance report instead of the raw snapshot")]
        recon: bool,
    },
    #[command(about = "Replay a recorded attack history")]
    History(commands::HistoryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/gridstrike.toml"));
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    init_tracing("gridstrikectl", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running on defaults"),
    }
    if let Some(path) = &cli.threat_model {
        config.threat_model = ThreatModelConfig::from_yaml_file(path)?;
        info!(threat_model = %path.display(), "threat model loaded");
    }

    let metrics_settings = config.metrics.clone();
    let harness = Harness::new(config, new_registry())?;
    let metrics_server = if metrics_settings.enabled {
        info!(address = %metrics_settings.listen, "metrics exporter enabled");
        Some(spawn_http_server(harness.registry(), metrics_settings.listen)?)
    } else {
        None
    };

    let outcome = match cli.command {
        Commands::Execute(args) => commands::execute(&harness, args),
        Commands::Campaign(args) => commands::campaign(&harness, args).await,
        Commands::Compare(args) => commands::compare(&harness, args).await,
        Commands::Snapshot { recon } => commands::snapshot(&harness, recon),
        Commands::History(args) => commands::history(args),
    };

    if let Some(server) = metrics_server {
        if let Err(err) = server.shutdown().await {
            warn!(error = %err, "metrics exporter did not shut down cleanly");
        }
    }
    outcome
}
