use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use polgraph::query::{DEFAULT_NEIGHBOR_LIMIT, DEFAULT_RELATED_LIMIT, DEFAULT_TOP_ENTITIES};

#[derive(Parser)]
#[command(
    name = "polgraph",
    version,
    about = "Entity resolution and knowledge-graph ingestion for political documents",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML); environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Print query results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest analyzed documents from a JSON file or directory
    Ingest {
        /// JSON file (one document or an array) or a directory of them
        #[arg(short, long)]
        input: PathBuf,

        /// Write the per-document report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Retry graph writes for documents still owed to the graph
    Reconcile {
        /// Keep reconciling on the configured interval
        #[arg(short, long)]
        watch: bool,
    },

    /// Show the graph neighborhood of an entity
    Neighbors {
        name: String,

        #[arg(short, long, default_value_t = DEFAULT_NEIGHBOR_LIMIT)]
        limit: usize,
    },

    /// Rank entities sharing documents with an entity
    Related {
        name: String,

        #[arg(short, long, default_value_t = DEFAULT_RELATED_LIMIT)]
        limit: usize,
    },

    /// Entity counts by type and most mentioned entities
    Stats {
        #[arg(short, long, default_value_t = DEFAULT_TOP_ENTITIES)]
        top: usize,
    },

    /// Show an entity and the documents mentioning it
    Entity { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    setup_tracing(&cli.log_format, cli.verbose)?;

    if let Err(e) = polgraph::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let config = commands::load_config(cli.config.as_deref())?;
    tracing::debug!(
        relational = ?config.database.backend,
        graph = ?config.graph.backend,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Ingest { input, output } => {
            tracing::info!(input = %input.display(), output = ?output, "Starting ingest command");
            commands::ingest(&config, input, output).await?;
        }

        Commands::Reconcile { watch } => {
            tracing::info!(watch = %watch, "Starting reconcile command");
            commands::reconcile(&config, watch).await?;
        }

        Commands::Neighbors { name, limit } => {
            commands::neighbors(&config, name, limit, cli.json).await?;
        }

        Commands::Related { name, limit } => {
            commands::related(&config, name, limit, cli.json).await?;
        }

        Commands::Stats { top } => {
            commands::stats(&config, top, cli.json).await?;
        }

        Commands::Entity { name } => {
            commands::entity(&config, name, cli.json).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("polgraph=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new("polgraph=info,warn")
        }
    });

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
