//! Configuration management for polgraph
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relational store configuration
    pub database: DatabaseConfig,

    /// Graph store configuration
    pub graph: GraphConfig,

    /// Ingestion pipeline configuration
    pub pipeline: PipelineConfig,

    /// Graph reconciliation configuration
    pub reconciliation: ReconciliationConfig,

    /// Alerting configuration
    pub notifications: NotificationsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationalBackend {
    Sqlite,
    Postgres,
}

impl FromStr for RelationalBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => anyhow::bail!("unknown relational backend '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    Sqlite,
    Neo4j,
}

impl FromStr for GraphBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "neo4j" => Ok(Self::Neo4j),
            other => anyhow::bail!("unknown graph backend '{other}'"),
        }
    }
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: RelationalBackend,

    /// SQLite database path
    pub sqlite_path: PathBuf,

    pub postgres: PostgresConfig,
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// PostgreSQL connection string
    pub url: String,

    /// Maximum pool size
    pub pool_size: usize,
}

/// Graph store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: GraphBackend,

    /// SQLite graph database path
    pub sqlite_path: PathBuf,

    pub neo4j: Neo4jConfig,
}

/// Neo4j connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: usize,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Documents ingested concurrently by a batch
    pub max_concurrent_documents: usize,

    /// Contexts kept per association and per `MENTIONS` edge
    pub context_cap: usize,

    /// Timeout applied to every store call, in seconds
    pub store_timeout_secs: u64,

    /// Whole-document retries after a store outage
    pub document_retries: u32,

    /// Base delay between document retries, in milliseconds
    pub retry_base_delay_ms: u64,

    /// Re-reads after a lost conditional entity write
    pub entity_conflict_retries: u32,

    /// Characters of text kept on each side of a pattern match
    pub context_window: usize,

    /// Shorter analyzer entity names are ignored
    pub min_entity_length: usize,
}

/// Graph reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Seconds between reconciliation passes
    pub interval_secs: u64,

    /// Graph write attempts before a document is marked failed
    pub max_graph_attempts: u32,

    /// Pending documents picked up per pass
    pub batch_size: usize,
}

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Webhook receiving degraded-document alerts (optional)
    pub webhook_url: Option<String>,

    /// Identical alerts inside this window are sent once
    pub dedup_window_secs: u64,

    pub webhook_timeout_secs: u64,

    /// Sent as a Bearer token with every webhook request
    pub webhook_auth_token: Option<String>,

    /// Extra headers for webhook requests
    pub webhook_headers: BTreeMap<String, String>,

    /// Resends after a failed delivery (5xx or transport error)
    pub webhook_max_retries: u32,

    pub webhook_retry_base_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let postgres_url = std::env::var("POLGRAPH_POSTGRES_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok();
        let relational_backend = match std::env::var("POLGRAPH_DB_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) if postgres_url.is_some() => RelationalBackend::Postgres,
            Err(_) => defaults.database.backend,
        };

        let neo4j_uri = std::env::var("NEO4J_URL")
            .or_else(|_| std::env::var("NEO4J_URI"))
            .ok();
        let graph_backend = match std::env::var("POLGRAPH_GRAPH_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) if neo4j_uri.is_some() => GraphBackend::Neo4j,
            Err(_) => defaults.graph.backend,
        };

        Ok(Self {
            database: DatabaseConfig {
                backend: relational_backend,
                sqlite_path: std::env::var("POLGRAPH_SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.database.sqlite_path),
                postgres: PostgresConfig {
                    url: postgres_url.unwrap_or(defaults.database.postgres.url),
                    pool_size: env_or("POLGRAPH_POOL_SIZE", defaults.database.postgres.pool_size),
                },
            },
            graph: GraphConfig {
                backend: graph_backend,
                sqlite_path: std::env::var("POLGRAPH_GRAPH_SQLITE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.graph.sqlite_path),
                neo4j: Neo4jConfig {
                    uri: neo4j_uri.unwrap_or(defaults.graph.neo4j.uri),
                    user: std::env::var("NEO4J_USER").unwrap_or(defaults.graph.neo4j.user),
                    password: std::env::var("NEO4J_PASSWORD")
                        .unwrap_or(defaults.graph.neo4j.password),
                    max_connections: env_or(
                        "POLGRAPH_NEO4J_MAX_CONNECTIONS",
                        defaults.graph.neo4j.max_connections,
                    ),
                },
            },
            pipeline: PipelineConfig {
                max_concurrent_documents: env_or(
                    "POLGRAPH_MAX_CONCURRENT_DOCUMENTS",
                    defaults.pipeline.max_concurrent_documents,
                ),
                context_cap: env_or("POLGRAPH_CONTEXT_CAP", defaults.pipeline.context_cap),
                store_timeout_secs: env_or(
                    "POLGRAPH_STORE_TIMEOUT",
                    defaults.pipeline.store_timeout_secs,
                ),
                document_retries: env_or(
                    "POLGRAPH_DOCUMENT_RETRIES",
                    defaults.pipeline.document_retries,
                ),
                retry_base_delay_ms: env_or(
                    "POLGRAPH_RETRY_BASE_DELAY_MS",
                    defaults.pipeline.retry_base_delay_ms,
                ),
                entity_conflict_retries: env_or(
                    "POLGRAPH_ENTITY_CONFLICT_RETRIES",
                    defaults.pipeline.entity_conflict_retries,
                ),
                context_window: env_or("POLGRAPH_CONTEXT_WINDOW", defaults.pipeline.context_window),
                min_entity_length: env_or(
                    "POLGRAPH_MIN_ENTITY_LENGTH",
                    defaults.pipeline.min_entity_length,
                ),
            },
            reconciliation: ReconciliationConfig {
                interval_secs: env_or(
                    "POLGRAPH_RECONCILE_INTERVAL",
                    defaults.reconciliation.interval_secs,
                ),
                max_graph_attempts: env_or(
                    "POLGRAPH_MAX_GRAPH_ATTEMPTS",
                    defaults.reconciliation.max_graph_attempts,
                ),
                batch_size: env_or(
                    "POLGRAPH_RECONCILE_BATCH_SIZE",
                    defaults.reconciliation.batch_size,
                ),
            },
            notifications: NotificationsConfig {
                webhook_url: std::env::var("POLGRAPH_ALERT_WEBHOOK_URL").ok(),
                dedup_window_secs: env_or(
                    "POLGRAPH_ALERT_DEDUP_WINDOW",
                    defaults.notifications.dedup_window_secs,
                ),
                webhook_timeout_secs: defaults.notifications.webhook_timeout_secs,
                webhook_auth_token: std::env::var("POLGRAPH_ALERT_WEBHOOK_TOKEN").ok(),
                webhook_headers: defaults.notifications.webhook_headers,
                webhook_max_retries: env_or(
                    "POLGRAPH_ALERT_WEBHOOK_RETRIES",
                    defaults.notifications.webhook_max_retries,
                ),
                webhook_retry_base_delay_ms: defaults.notifications.webhook_retry_base_delay_ms,
            },
            logging: LoggingConfig {
                level: std::env::var("POLGRAPH_LOG_LEVEL").unwrap_or(defaults.logging.level),
                format: std::env::var("POLGRAPH_LOG_FORMAT").unwrap_or(defaults.logging.format),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_concurrent_documents == 0 {
            anyhow::bail!("max_concurrent_documents must be greater than 0");
        }

        if self.pipeline.context_cap == 0 {
            anyhow::bail!("context_cap must be greater than 0");
        }

        if self.pipeline.store_timeout_secs == 0 {
            anyhow::bail!("store_timeout_secs must be greater than 0");
        }

        if self.reconciliation.max_graph_attempts == 0 {
            anyhow::bail!("max_graph_attempts must be greater than 0");
        }

        if self.reconciliation.batch_size == 0 {
            anyhow::bail!("reconciliation batch_size must be greater than 0");
        }

        if self.database.backend == RelationalBackend::Postgres && self.database.postgres.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        if let Some(url) = &self.notifications.webhook_url {
            url::Url::parse(url).with_context(|| format!("Invalid webhook URL: {url}"))?;
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Get store call timeout as Duration
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.store_timeout_secs)
    }

    /// Get reconciliation interval as Duration
    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation.interval_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: RelationalBackend::Sqlite,
            sqlite_path: PathBuf::from("data/polgraph.db"),
            postgres: PostgresConfig::default(),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: String::from("postgresql://localhost/polgraph"),
            pool_size: 10,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::Sqlite,
            sqlite_path: PathBuf::from("data/graph.db"),
            neo4j: Neo4jConfig::default(),
        }
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: String::from("bolt://localhost:7687"),
            user: String::from("neo4j"),
            password: String::from("password"),
            max_connections: 10,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 4,
            context_cap: 10,
            store_timeout_secs: 30,
            document_retries: 3,
            retry_base_delay_ms: 500,
            entity_conflict_retries: 5,
            context_window: 100,
            min_entity_length: 2,
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_graph_attempts: 5,
            batch_size: 100,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            dedup_window_secs: 300,
            webhook_timeout_secs: 10,
            webhook_auth_token: None,
            webhook_headers: BTreeMap::new(),
            webhook_max_retries: 3,
            webhook_retry_base_delay_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}
