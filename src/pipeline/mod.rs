//! Document ingestion pipeline
//!
//! Per document: extract mentions, deduplicate, then hand the resolved
//! mentions to the [`WriteCoordinator`] which commits the relational state
//! and mirrors it into the graph.
//!
//! ```text
//! SourceDocument
//!     │
//!     ▼
//! MentionExtractor ──► MentionDeduplicator ──► WriteCoordinator
//!                                                  │        │
//!                                        relational tx    graph MERGE
//!                                                  │        │
//!                                                  ▼        ▼
//!                               RELATIONAL_COMMITTED ──► GRAPH_SYNCED
//!                                                  └──► GRAPH_PENDING ──► Reconciler
//! ```
//!
//! Documents are processed concurrently; a per-document lock keeps at most
//! one ingestion of the same document in flight.

pub mod coordinator;
pub mod lock;
pub mod reconcile;

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::metrics;
use crate::models::{AnalysisResult, DocumentRecord, SourceDocument, SyncState};
use crate::notifications::AlertCondition;
use crate::ontology::{
    AnalysisMentionSource, ExtractionConfig, ExtractionInput, MentionDeduplicator,
    MentionExtractor, OntologyError, OntologyResult, PatternMentionSource,
};
use crate::utils::retry::{with_retry_if, RetryConfig};

pub use coordinator::{CancellationFlag, CommitReceipt, WriteCoordinator};
pub use lock::{KeyedGuard, KeyedGuards, KeyedLock};
pub use reconcile::{ReconcileReport, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
    Error,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Structured result of one ingestion; errors are carried, not raised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub document_id: String,
    /// Sync state reached; `None` when nothing was committed
    pub state: Option<SyncState>,
    pub revision: Option<i64>,
    pub entities: usize,
    /// Mention sources that failed on this document
    #[serde(default)]
    pub failed_sources: Vec<String>,
    /// Completed job skipped without re-ingesting
    #[serde(default)]
    pub skipped: bool,
    pub error: Option<String>,
}

impl IngestOutcome {
    fn failed(document_id: String, error: &OntologyError, failed_sources: Vec<String>) -> Self {
        Self {
            status: IngestStatus::Error,
            document_id,
            state: None,
            revision: None,
            entities: 0,
            failed_sources,
            skipped: false,
            error: Some(error.to_string()),
        }
    }

    fn skipped(document_id: String) -> Self {
        Self {
            status: IngestStatus::Success,
            document_id,
            state: Some(SyncState::GraphSynced),
            revision: None,
            entities: 0,
            failed_sources: Vec::new(),
            skipped: true,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == IngestStatus::Success
    }
}

/// Outcomes of a batch, in completion order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<IngestOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Committed documents whose graph write is still owed
    pub fn graph_pending(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state.is_some_and(|s| s.needs_graph_sync()))
            .count()
    }

    pub fn outcome(&self, document_id: &str) -> Option<&IngestOutcome> {
        self.outcomes.iter().find(|o| o.document_id == document_id)
    }
}

pub struct IngestionPipeline {
    extractor: MentionExtractor,
    deduplicator: MentionDeduplicator,
    coordinator: Arc<WriteCoordinator>,
    retry: RetryConfig,
    max_concurrent_documents: usize,
}

impl IngestionPipeline {
    pub fn new(extractor: MentionExtractor, coordinator: Arc<WriteCoordinator>) -> Self {
        Self {
            extractor,
            deduplicator: MentionDeduplicator::new(),
            coordinator,
            retry: RetryConfig::new(3),
            max_concurrent_documents: 4,
        }
    }

    /// Pattern and analysis sources configured from `config`
    pub fn from_config(config: &PipelineConfig, coordinator: Arc<WriteCoordinator>) -> OntologyResult<Self> {
        let extraction = ExtractionConfig::builder()
            .context_window(config.context_window)
            .min_entity_length(config.min_entity_length)
            .build()?;
        let extractor = MentionExtractor::default()
            .with_source(Arc::new(PatternMentionSource::new(extraction.clone())?))
            .with_source(Arc::new(AnalysisMentionSource::new(extraction)));

        Ok(Self::new(extractor, coordinator)
            .with_retry(RetryConfig::with_delays(
                config.document_retries,
                config.retry_base_delay_ms,
                config.retry_base_delay_ms.saturating_mul(16),
            ))
            .with_max_concurrent_documents(config.max_concurrent_documents))
    }

    /// Whole-document retry policy for store outages
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_documents(mut self, max: usize) -> Self {
        self.max_concurrent_documents = max.max(1);
        self
    }

    pub fn coordinator(&self) -> &Arc<WriteCoordinator> {
        &self.coordinator
    }

    /// Ingest one document given its parts
    pub async fn ingest(
        &self,
        document_id: &str,
        source_url: &str,
        raw_text: &str,
        analysis: AnalysisResult,
    ) -> IngestOutcome {
        let document = SourceDocument {
            document_id: Some(document_id.to_string()),
            ..SourceDocument::new(source_url, raw_text, analysis)
        };
        self.ingest_document(&document).await
    }

    /// Ingest a document, honouring its job id when present
    pub async fn ingest_document(&self, document: &SourceDocument) -> IngestOutcome {
        match &document.job_id {
            Some(job_id) => self.ingest_job(job_id, document).await,
            None => self.ingest_with_cancel(document, &CancellationFlag::new()).await,
        }
    }

    /// Ingest unless `job_id` already completed
    ///
    /// The job is recorded complete only once the document reached
    /// `GRAPH_SYNCED`.
    pub async fn ingest_job(&self, job_id: &str, document: &SourceDocument) -> IngestOutcome {
        let document_id = document.id();
        match self.coordinator.relational().is_job_completed(job_id).await {
            Ok(true) => {
                info!(job_id, document_id = %document_id, "Job already completed, skipping");
                return IngestOutcome::skipped(document_id);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(job_id, document_id = %document_id, error = %e, "Job lookup failed");
                return IngestOutcome::failed(document_id, &e, Vec::new());
            }
        }

        let outcome = self.ingest_with_cancel(document, &CancellationFlag::new()).await;

        if outcome.state == Some(SyncState::GraphSynced) {
            if let Err(e) = self
                .coordinator
                .relational()
                .complete_job(job_id, &outcome.document_id)
                .await
            {
                warn!(job_id, document_id = %outcome.document_id, error = %e, "Failed to record job completion");
            }
        }
        outcome
    }

    /// Ingest with a cancellation flag checked before the relational commit
    pub async fn ingest_with_cancel(
        &self,
        document: &SourceDocument,
        cancel: &CancellationFlag,
    ) -> IngestOutcome {
        let started = Instant::now();
        let outcome = self.run(document, cancel).await;
        metrics::record_document_ingested(outcome.status.as_str(), started.elapsed().as_secs_f64());
        outcome
    }

    /// Ingest many documents concurrently; failures stay per document
    pub async fn ingest_batch(&self, documents: &[SourceDocument]) -> BatchReport {
        let outcomes = stream::iter(documents)
            .map(|document| self.ingest_document(document))
            .buffer_unordered(self.max_concurrent_documents)
            .collect::<Vec<_>>()
            .await;

        let report = BatchReport { outcomes };
        info!(
            total = report.outcomes.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            graph_pending = report.graph_pending(),
            "Batch ingested"
        );
        report
    }

    async fn run(&self, document: &SourceDocument, cancel: &CancellationFlag) -> IngestOutcome {
        let document_id = document.id();
        let _guard = self.coordinator.lock_document(&document_id).await;
        debug!(document_id = %document_id, state = SyncState::Pending.as_str(), "Ingestion started");

        let input = ExtractionInput {
            text: &document.raw_text,
            analysis: &document.analysis,
        };
        let report = self.extractor.extract(&input).await;
        let failed_sources = self.report_extractor_failures(&document_id, &report.failures).await;

        let mentions = self.deduplicator.deduplicate(report.mentions);
        debug!(
            document_id = %document_id,
            state = SyncState::Resolving.as_str(),
            mentions = mentions.len(),
            "Resolving mentions"
        );

        let record = DocumentRecord {
            id: document_id.clone(),
            source_url: document.source_url.clone(),
            summary: document.analysis.summary.clone(),
            topics: document.analysis.topics.clone(),
        };

        let committed = with_retry_if(
            &self.retry,
            || self.coordinator.commit_relational(&record, &mentions, cancel),
            |e| matches!(e, OntologyError::StoreUnavailable { .. }),
        )
        .await;

        let receipt = match committed {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(document_id = %document_id, error = %e, "Ingestion failed before relational commit");
                if let OntologyError::StoreUnavailable { store, .. } = &e {
                    self.coordinator
                        .notify(
                            AlertCondition::StoreUnavailable {
                                store: store.clone(),
                                document_id: document_id.clone(),
                            },
                            format!("Ingestion of document {document_id} gave up: {e}"),
                            Vec::new(),
                        )
                        .await;
                }
                return IngestOutcome::failed(document_id, &e, failed_sources);
            }
        };

        let state = match self.coordinator.sync_graph(&receipt.record).await {
            Ok(state) => state,
            Err(e) => {
                // The record stays RELATIONAL_COMMITTED and the reconciler picks it up
                warn!(document_id = %document_id, error = %e, "Could not record graph sync state");
                SyncState::RelationalCommitted
            }
        };

        info!(
            document_id = %document_id,
            revision = receipt.revision,
            entities = receipt.entities.len(),
            state = state.as_str(),
            "Document ingested"
        );

        IngestOutcome {
            status: IngestStatus::Success,
            document_id,
            state: Some(state),
            revision: Some(receipt.revision),
            entities: receipt.entities.len(),
            failed_sources,
            skipped: false,
            error: None,
        }
    }

    async fn report_extractor_failures(&self, document_id: &str, failures: &[OntologyError]) -> Vec<String> {
        let mut sources = Vec::with_capacity(failures.len());
        for failure in failures {
            let source_id = match failure {
                OntologyError::ExtractionPartialFailure { source_id, .. } => source_id.clone(),
                other => other.kind().to_string(),
            };
            self.coordinator
                .notify(
                    AlertCondition::ExtractorFailing {
                        source_id: source_id.clone(),
                        document_id: document_id.to_string(),
                    },
                    failure.to_string(),
                    Vec::new(),
                )
                .await;
            sources.push(source_id);
        }
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalyzedEntity;
    use crate::ontology::{MentionSource, RawMention, SourceKind};
    use crate::storage::graph::SqliteGraphStore;
    use crate::storage::{RelationalStore, SqliteRelationalStore};
    use async_trait::async_trait;

    struct BrokenSource;

    #[async_trait]
    impl MentionSource for BrokenSource {
        fn id(&self) -> &str {
            "ner"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Statistical
        }

        async fn extract(&self, _input: &ExtractionInput<'_>) -> OntologyResult<Vec<RawMention>> {
            Err(OntologyError::extraction_failed("ner", "model not loaded"))
        }
    }

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            summary: "Vote on the budget".to_string(),
            topics: vec!["Budget".to_string()],
            entities: vec![AnalyzedEntity {
                name: "Jane Smith".to_string(),
                entity_type: "PERSON".to_string(),
                context: "Jane Smith voted no".to_string(),
                sentiment: Some(0.5),
            }],
        }
    }

    fn pipeline(extractor: MentionExtractor) -> (Arc<SqliteRelationalStore>, IngestionPipeline) {
        let relational = Arc::new(SqliteRelationalStore::in_memory().unwrap());
        let graph = Arc::new(SqliteGraphStore::in_memory(10).unwrap());
        let coordinator = Arc::new(WriteCoordinator::new(relational.clone(), graph));
        (relational, IngestionPipeline::new(extractor, coordinator))
    }

    fn analysis_only() -> MentionExtractor {
        MentionExtractor::default().with_source(Arc::new(AnalysisMentionSource::new(ExtractionConfig::default())))
    }

    #[tokio::test]
    async fn test_ingest_reaches_graph_synced() {
        let (relational, pipeline) = pipeline(analysis_only());
        let outcome = pipeline
            .ingest("doc-1", "https://example.com/a", "Jane Smith voted no.", analysis())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.state, Some(SyncState::GraphSynced));
        assert_eq!(outcome.entities, 1);
        assert!(relational.document("doc-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failing_source_does_not_fail_document() {
        let extractor = analysis_only().with_source(Arc::new(BrokenSource));
        let (_, pipeline) = pipeline(extractor);

        let outcome = pipeline
            .ingest("doc-1", "https://example.com/a", "Jane Smith voted no.", analysis())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.failed_sources, vec!["ner"]);
        assert_eq!(outcome.entities, 1);
    }

    #[tokio::test]
    async fn test_cancelled_ingestion_reports_error() {
        let (relational, pipeline) = pipeline(analysis_only());
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let document = SourceDocument::new("https://example.com/a", "text", analysis());
        let outcome = pipeline.ingest_with_cancel(&document, &cancel).await;

        assert_eq!(outcome.status, IngestStatus::Error);
        assert!(outcome.state.is_none());
        assert!(relational.document(&document.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completed_job_is_skipped() {
        let (relational, pipeline) = pipeline(analysis_only());
        let mut document = SourceDocument::new("https://example.com/a", "Jane Smith voted no.", analysis());
        document.job_id = Some("job-1".to_string());

        let first = pipeline.ingest_document(&document).await;
        assert!(!first.skipped);
        assert!(relational.is_job_completed("job-1").await.unwrap());

        let second = pipeline.ingest_document(&document).await;
        assert!(second.skipped);

        let associations = relational.associations_for_document(&document.id()).await.unwrap();
        assert_eq!(associations[0].mention_count, 1);
    }

    #[tokio::test]
    async fn test_batch_report_counts() {
        let (_, pipeline) = pipeline(analysis_only());
        let docs = vec![
            SourceDocument::new("https://example.com/a", "Jane Smith voted no.", analysis()),
            SourceDocument::new("https://example.com/b", "Jane Smith voted no.", analysis()),
        ];

        let report = pipeline.ingest_batch(&docs).await;
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.graph_pending(), 0);
        assert!(report.outcome(&docs[0].id()).is_some());
    }
}
