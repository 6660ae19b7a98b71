pub mod ingest;
pub mod query;
pub mod reconcile;

use anyhow::{Context, Result};
use std::path::Path;

use polgraph::config::Config;
use polgraph::service::KnowledgeGraphService;

// Re-export command functions for convenience
pub use ingest::ingest;
pub use query::{entity, neighbors, related, stats};
pub use reconcile::reconcile;

/// Load the config file when given, otherwise the environment
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

pub async fn connect(config: &Config) -> Result<KnowledgeGraphService> {
    KnowledgeGraphService::from_config(config)
        .await
        .context("Failed to initialize knowledge graph service")
}
