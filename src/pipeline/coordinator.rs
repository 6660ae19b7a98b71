//! Dual-store write coordination
//!
//! The relational store is written first, in one transaction that also
//! persists the document's sync record and the graph mutation still owed.
//! The graph write follows; when it fails the document parks in
//! `GRAPH_PENDING` and the reconciler retries it from the persisted payload.
//! A relational commit is never rolled back to match the graph.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::lock::{KeyedGuard, KeyedLock};
use crate::metrics;
use crate::models::{
    DocumentRecord, EntityKey, EntityRef, GraphMutation, MentionEdge, RevisionedContext,
    SyncRecord, SyncState,
};
use crate::notifications::{AlertCondition, SharedNotifier};
use crate::ontology::{
    AssociationAggregator, AssociationDelta, EntityResolver, OntologyError, OntologyResult,
    ResolvedMention,
};
use crate::storage::graph::GRAPH;
use crate::storage::{GraphStore, RelationalStore, RelationalTx, RELATIONAL};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_GRAPH_ATTEMPTS: u32 = 5;

/// Cooperative cancellation for one ingestion
///
/// Only honoured before the relational commit; once committed the document
/// runs through to a sync state.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a committed relational write
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub document_id: String,
    pub revision: i64,
    pub entities: Vec<EntityRef>,
    pub deltas: Vec<AssociationDelta>,
    /// Sync record written in the same transaction
    pub record: SyncRecord,
}

/// Sole writer of entities, associations and graph nodes/edges
pub struct WriteCoordinator {
    relational: Arc<dyn RelationalStore>,
    graph: Arc<dyn GraphStore>,
    resolver: EntityResolver,
    aggregator: AssociationAggregator,
    document_locks: KeyedLock<String>,
    entity_locks: KeyedLock<EntityKey>,
    store_timeout: Duration,
    max_graph_attempts: u32,
    notifier: Option<SharedNotifier>,
}

impl WriteCoordinator {
    pub fn new(relational: Arc<dyn RelationalStore>, graph: Arc<dyn GraphStore>) -> Self {
        Self {
            relational,
            graph,
            resolver: EntityResolver::default(),
            aggregator: AssociationAggregator::default(),
            document_locks: KeyedLock::new(),
            entity_locks: KeyedLock::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            max_graph_attempts: DEFAULT_MAX_GRAPH_ATTEMPTS,
            notifier: None,
        }
    }

    pub fn with_resolver(mut self, resolver: EntityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_aggregator(mut self, aggregator: AssociationAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// At least one reconciliation retry always happens before `GRAPH_FAILED`
    pub fn with_max_graph_attempts(mut self, attempts: u32) -> Self {
        self.max_graph_attempts = attempts.max(1);
        self
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn relational(&self) -> &Arc<dyn RelationalStore> {
        &self.relational
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub fn max_graph_attempts(&self) -> u32 {
        self.max_graph_attempts
    }

    /// Single in-flight writer per document id
    pub async fn lock_document(&self, document_id: &str) -> KeyedGuard<'_, String> {
        self.document_locks.lock(document_id.to_string()).await
    }

    /// Resolve, aggregate and commit one document's relational state
    ///
    /// Entity keys touched by the document are locked for the whole
    /// transaction. Cancellation is checked right before commit; an
    /// uncommitted transaction rolls back when dropped.
    pub async fn commit_relational(
        &self,
        document: &DocumentRecord,
        mentions: &[ResolvedMention],
        cancel: &CancellationFlag,
    ) -> OntologyResult<CommitReceipt> {
        if cancel.is_cancelled() {
            return Err(OntologyError::Cancelled {
                document_id: document.id.clone(),
            });
        }

        let keys: BTreeSet<EntityKey> = mentions.iter().map(|m| self.resolver.key_for(m)).collect();
        let _entity_guards = self.entity_locks.lock_many(keys).await;

        let mut tx = self.bounded(RELATIONAL, self.relational.begin()).await?;
        let receipt = self
            .bounded(RELATIONAL, self.write_document(tx.as_mut(), document, mentions))
            .await?;

        if cancel.is_cancelled() {
            info!(document_id = %document.id, "Ingestion cancelled before commit, rolling back");
            return Err(OntologyError::Cancelled {
                document_id: document.id.clone(),
            });
        }

        self.bounded(RELATIONAL, tx.commit()).await?;
        metrics::record_graph_sync(SyncState::RelationalCommitted.as_str());
        info!(
            document_id = %document.id,
            revision = receipt.revision,
            entities = receipt.entities.len(),
            "Relational state committed"
        );
        Ok(receipt)
    }

    async fn write_document(
        &self,
        tx: &mut dyn RelationalTx,
        document: &DocumentRecord,
        mentions: &[ResolvedMention],
    ) -> OntologyResult<CommitReceipt> {
        let revision = tx.upsert_document(document).await?;
        let now = Utc::now();

        let mut entities = Vec::with_capacity(mentions.len());
        let mut deltas = Vec::with_capacity(mentions.len());
        let mut edges = Vec::with_capacity(mentions.len());

        for mention in mentions {
            let entity = self.resolver.resolve(&mut *tx, mention).await?;
            let (_, delta) = self
                .aggregator
                .upsert(&mut *tx, &document.id, &entity, mention)
                .await?;

            let context = mention.context.trim();
            let contexts = if context.is_empty() {
                Vec::new()
            } else {
                vec![RevisionedContext {
                    revision,
                    text: context.to_string(),
                }]
            };
            edges.push(MentionEdge {
                name: entity.name.clone(),
                normalized_name: entity.key.normalized_name.clone(),
                entity_type: entity.key.entity_type,
                contexts,
                seen_at: now,
            });
            entities.push(entity);
            deltas.push(delta);
        }

        let mut topics: Vec<String> = Vec::with_capacity(document.topics.len());
        for topic in &document.topics {
            let topic = topic.trim().to_lowercase();
            if !topic.is_empty() && !topics.contains(&topic) {
                topics.push(topic);
            }
        }

        let mut mutation = GraphMutation {
            document_id: document.id.clone(),
            revision,
            source_url: document.source_url.clone(),
            summary: document.summary.clone(),
            topics,
            entities: edges,
        };

        if let Some(previous) = tx.find_sync_record(&document.id).await? {
            if !previous.state.can_transition_to(SyncState::RelationalCommitted) {
                return Err(OntologyError::InvalidStateTransition {
                    document_id: document.id.clone(),
                    from: previous.state.to_string(),
                    to: SyncState::RelationalCommitted.to_string(),
                });
            }
            // An unapplied earlier revision rides along with this one
            if let Some(mut pending) = previous.payload {
                debug!(
                    document_id = %document.id,
                    pending_revision = pending.revision,
                    revision,
                    "Folding unsynced graph payload into new revision"
                );
                pending.absorb(mutation, self.aggregator.context_cap());
                mutation = pending;
            }
        }

        let record = SyncRecord {
            document_id: document.id.clone(),
            state: SyncState::RelationalCommitted,
            revision,
            attempts: 0,
            last_error: None,
            payload: Some(mutation),
            updated_at: now,
        };
        tx.save_sync_record(&record).await?;

        Ok(CommitReceipt {
            document_id: document.id.clone(),
            revision,
            entities,
            deltas,
            record,
        })
    }

    /// Apply the record's graph payload and persist the resulting state
    ///
    /// A graph failure is not an error of this call: it is recorded on the
    /// sync record and reflected in the returned state.
    pub async fn sync_graph(&self, record: &SyncRecord) -> OntologyResult<SyncState> {
        let Some(mutation) = record.payload.as_ref() else {
            return self
                .transition(record, SyncState::GraphSynced, record.attempts, None)
                .await;
        };

        match self.bounded(GRAPH, self.graph.apply(mutation)).await {
            Ok(()) => {
                let state = self
                    .transition(record, SyncState::GraphSynced, record.attempts, None)
                    .await?;
                info!(
                    document_id = %record.document_id,
                    revision = record.revision,
                    edges = mutation.entities.len(),
                    "Graph synced"
                );
                Ok(state)
            }
            Err(e) => {
                let failure = OntologyError::graph_sync(&record.document_id, &e);
                let attempts = record.attempts + 1;
                let next = if record.state == SyncState::GraphPending
                    && attempts >= self.max_graph_attempts
                {
                    SyncState::GraphFailed
                } else {
                    SyncState::GraphPending
                };
                let reason = e.to_string();
                let state = self.transition(record, next, attempts, Some(&reason)).await?;

                if state == SyncState::GraphFailed {
                    error!(
                        document_id = %record.document_id,
                        attempts,
                        error = %failure,
                        "Graph sync retries exhausted, document degraded to relational only"
                    );
                    self.notify(
                        AlertCondition::GraphSyncExhausted {
                            document_id: record.document_id.clone(),
                            attempts,
                        },
                        format!(
                            "Graph write for document {} abandoned after {attempts} attempts",
                            record.document_id
                        ),
                        vec![("last_error".to_string(), reason)],
                    )
                    .await;
                } else {
                    warn!(
                        document_id = %record.document_id,
                        attempts,
                        max_attempts = self.max_graph_attempts,
                        error = %failure,
                        "Graph write failed, left pending for reconciliation"
                    );
                }
                Ok(state)
            }
        }
    }

    /// Re-read a document's sync record under its lock and sync it if owed
    pub async fn reconcile_document(&self, document_id: &str) -> OntologyResult<Option<SyncState>> {
        let _guard = self.lock_document(document_id).await;
        let record = self
            .bounded(RELATIONAL, self.relational.sync_record(document_id))
            .await?;
        match record {
            Some(record) if record.state.needs_graph_sync() => {
                self.sync_graph(&record).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn transition(
        &self,
        record: &SyncRecord,
        next: SyncState,
        attempts: u32,
        last_error: Option<&str>,
    ) -> OntologyResult<SyncState> {
        if !record.state.can_transition_to(next) {
            return Err(OntologyError::InvalidStateTransition {
                document_id: record.document_id.clone(),
                from: record.state.to_string(),
                to: next.to_string(),
            });
        }

        let applied = self
            .bounded(
                RELATIONAL,
                self.relational.update_sync_state(
                    &record.document_id,
                    record.revision,
                    next,
                    attempts,
                    last_error,
                ),
            )
            .await?;

        if !applied {
            debug!(
                document_id = %record.document_id,
                revision = record.revision,
                "Sync record superseded by a newer revision"
            );
            let current = self
                .bounded(RELATIONAL, self.relational.sync_record(&record.document_id))
                .await?;
            return Ok(current.map(|r| r.state).unwrap_or(record.state));
        }

        metrics::record_graph_sync(next.as_str());
        Ok(next)
    }

    /// Route an operator alert; delivery problems are logged only
    pub async fn notify(
        &self,
        condition: AlertCondition,
        message: String,
        metadata: Vec<(String, String)>,
    ) {
        if let Some(notifier) = &self.notifier {
            notifier.alert(condition, message, metadata).await;
        }
    }

    /// Convert an overrunning store call into `StoreUnavailable`
    async fn bounded<T, F>(&self, store: &str, call: F) -> OntologyResult<T>
    where
        F: Future<Output = OntologyResult<T>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(OntologyError::unavailable(
                store,
                format!("call timed out after {}ms", self.store_timeout.as_millis()),
            )),
        }
    }
}
