//! Hippocampus - long-term memory for operations agents
//!
//! Runs a single tool call against the configured store, or serves the
//! HTTP tool surface with the periodic scheduler.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hippocampus::{
    config::HippocampusConfig,
    gateway::Gateway,
    knowledge::{KnowledgeBase, RememberRequest},
    scheduler::TaskScheduler,
};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hippocampus")]
#[command(author = "Hippocampus Team")]
#[command(version)]
#[command(about = "Agent knowledge base with consolidation and blindspot reports")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HIPPOCAMPUS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP tool surface (and the scheduler when enabled)
    Serve {
        /// Override the configured host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Record one experience
    Remember {
        #[arg(long)]
        raw_text: String,
        #[arg(long)]
        entity: String,
        #[arg(long)]
        attribute: String,
        #[arg(long)]
        value: String,
        /// high, medium, low or a number in 0.0-1.0
        #[arg(long, default_value = "medium")]
        confidence: String,
        #[arg(long)]
        category: String,
        /// Comma-separated reference URLs
        #[arg(long, default_value = "")]
        external_refs: String,
    },

    /// Consolidate pending episodes into domain measurements
    Consolidate,

    /// Report VOID, SPARSE, DENSE and stale domains
    Blindspot,

    /// Rebuild the domain lookup from staging
    Sync,

    /// Export the knowledge base as NDJSON
    Export {
        /// Write the NDJSON payload here instead of printing the report
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import an NDJSON payload
    Import {
        /// Payload file; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON reports
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("hippocampus={},tower_http=info", log_level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(
            cli.log_json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let config = HippocampusConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Commands::Config { default } = cli.command {
        return show_config(if default { None } else { Some(&config) });
    }

    let kb = Arc::new(KnowledgeBase::from_config(&config.store));

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config, kb).await?;
        }
        Commands::Remember {
            raw_text,
            entity,
            attribute,
            value,
            confidence,
            category,
            external_refs,
        } => {
            let report = kb
                .remember(RememberRequest {
                    raw_text,
                    entity,
                    attribute,
                    value,
                    confidence,
                    category,
                    external_refs,
                })
                .await?;
            print_json(&report)?;
        }
        Commands::Consolidate => print_json(&kb.consolidate().await?)?,
        Commands::Blindspot => print_json(&kb.blindspot_report().await)?,
        Commands::Sync => print_json(&kb.sync_domains().await?)?,
        Commands::Export { output } => {
            let report = kb.export().await;
            match output {
                Some(path) => {
                    std::fs::write(&path, &report.ndjson)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("{} ({})", report.summary, path.display());
                }
                None => print_json(&report)?,
            }
        }
        Commands::Import { file } => {
            let payload = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            print_json(&kb.import(&payload).await?)?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

async fn run_server(config: HippocampusConfig, kb: Arc<KnowledgeBase>) -> Result<()> {
    tracing::info!("Starting Hippocampus");

    let scheduler = if config.scheduler.enabled {
        config.scheduler.validate()?;
        let scheduler = TaskScheduler::new(kb.clone(), config.scheduler.jobs());
        scheduler.start().await;
        Some(scheduler)
    } else {
        tracing::info!("Scheduler disabled");
        None
    };

    let gateway = Gateway::new(config.server.clone(), kb);
    gateway.start().await?;

    tracing::info!("Hippocampus is running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    gateway.stop().await?;
    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_config(config: Option<&HippocampusConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
