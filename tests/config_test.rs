//! Tests for config module

use std::path::Path;

use polgraph::config::{Config, GraphBackend, RelationalBackend};

#[test]
fn test_config_file_exists() {
    let config_path = Path::new("config.toml");
    assert!(config_path.exists(), "config.toml should exist in project root");
}

#[test]
fn test_config_toml_loads_and_validates() {
    let config = Config::from_file(Path::new("config.toml")).expect("config.toml should parse");
    config.validate().expect("config.toml should be valid");

    assert_eq!(config.database.backend, RelationalBackend::Sqlite);
    assert_eq!(config.graph.backend, GraphBackend::Sqlite);
    assert_eq!(config.pipeline.context_cap, 10);
    assert_eq!(config.reconciliation.max_graph_attempts, 5);
    assert!(config.notifications.webhook_url.is_none());
}

#[test]
fn test_config_file_matches_defaults() {
    let from_file = Config::from_file(Path::new("config.toml")).unwrap();
    let defaults = Config::default();

    assert_eq!(from_file.pipeline.store_timeout_secs, defaults.pipeline.store_timeout_secs);
    assert_eq!(from_file.pipeline.max_concurrent_documents, defaults.pipeline.max_concurrent_documents);
    assert_eq!(from_file.reconciliation.batch_size, defaults.reconciliation.batch_size);
    assert_eq!(from_file.graph.neo4j.uri, defaults.graph.neo4j.uri);
}

#[test]
fn test_missing_file_is_an_error() {
    let err = Config::from_file(Path::new("does/not/exist.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_invalid_log_format_rejected() {
    let config: Config = toml::from_str(
        r#"
        [logging]
        format = "xml"
        "#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}
