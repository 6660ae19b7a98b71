//! Prometheus metrics for the ingestion pipeline
//!
//! This module provides metrics tracking for:
//! - Ingestion: documents by outcome, ingest duration, extractor failures
//! - Resolution: entity decisions and conditional-update conflicts
//! - Graph sync: sync outcomes and documents still owing a graph write
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for ingestion and resolution metrics
struct PipelineMetrics {
    documents_ingested: CounterVec,
    ingest_duration: HistogramVec,
    extractor_failures: CounterVec,
    entity_resolutions: CounterVec,
    entity_conflicts: CounterVec,
}

/// Container for dual-store sync metrics
struct SyncMetrics {
    graph_sync: CounterVec,
    graph_pending: Gauge,
}

static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

static SYNC_METRICS: OnceLock<SyncMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; later calls are no-ops. When registration
/// fails, the error is returned and every recording function stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let pipeline = PipelineMetrics {
        documents_ingested: register_counter_vec!(
            "polgraph_documents_ingested_total",
            "Documents ingested by outcome",
            &["status"]
        )?,
        ingest_duration: register_histogram_vec!(
            "polgraph_ingest_duration_seconds",
            "Time spent ingesting one document in seconds",
            &["status"],
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        extractor_failures: register_counter_vec!(
            "polgraph_extractor_failures_total",
            "Mention source failures by source id",
            &["source"]
        )?,
        entity_resolutions: register_counter_vec!(
            "polgraph_entity_resolutions_total",
            "Entity resolutions by decision",
            &["decision"]
        )?,
        entity_conflicts: register_counter_vec!(
            "polgraph_entity_conflicts_total",
            "Conditional entity updates that lost a race",
            &["entity_type"]
        )?,
    };

    let sync = SyncMetrics {
        graph_sync: register_counter_vec!(
            "polgraph_graph_sync_total",
            "Graph sync attempts by resulting state",
            &["state"]
        )?,
        graph_pending: register_gauge!(
            "polgraph_graph_pending_documents",
            "Documents committed relationally but not yet mirrored in the graph"
        )?,
    };

    PIPELINE_METRICS
        .set(pipeline)
        .map_err(|_| "Pipeline metrics already initialized")?;
    SYNC_METRICS
        .set(sync)
        .map_err(|_| "Sync metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    PIPELINE_METRICS.get().is_some() && SYNC_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one finished document ingestion
pub fn record_document_ingested(status: &str, duration_secs: f64) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };

    m.documents_ingested.with_label_values(&[status]).inc();
    m.ingest_duration
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record a mention source failure
pub fn record_extractor_failure(source: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.extractor_failures.with_label_values(&[source]).inc();
    }
}

/// Record an entity resolution decision
pub fn record_entity_resolution(decision: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.entity_resolutions.with_label_values(&[decision]).inc();
    }
}

/// Record a lost conditional update
pub fn record_entity_conflict(entity_type: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.entity_conflicts.with_label_values(&[entity_type]).inc();
    }
}

/// Record the state a graph sync attempt ended in
pub fn record_graph_sync(state: &str) {
    if let Some(m) = SYNC_METRICS.get() {
        m.graph_sync.with_label_values(&[state]).inc();
    }
}

/// Update the number of documents awaiting a graph write
pub fn set_graph_pending(count: usize) {
    if let Some(m) = SYNC_METRICS.get() {
        m.graph_pending.set(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
