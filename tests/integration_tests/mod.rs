//! Integration tests module
//!
//! End-to-end tests over in-memory SQLite relational and graph stores:
//! - Extract → deduplicate → resolve → commit → graph sync
//! - Neighbor, co-occurrence and statistics queries
//! - Graph outages, reconciliation and operator alerts

pub mod error_scenarios;
pub mod pipeline_test;
pub mod query_test;
