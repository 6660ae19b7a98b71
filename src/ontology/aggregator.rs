//! Document-to-entity association aggregation
//!
//! Re-extraction of a document is additive: mention counts accumulate and
//! contexts append to a bounded log instead of replacing what is stored.

use chrono::Utc;

use super::error::OntologyResult;
use super::mention::ResolvedMention;
use crate::models::{DocumentEntity, EntityRef};
use crate::storage::RelationalTx;

/// Default length of the per-association context log
pub const DEFAULT_CONTEXT_CAP: usize = 10;

/// What one upsert changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociationDelta {
    pub entity_id: i64,
    pub created: bool,
    pub previous_count: i64,
    pub mention_count: i64,
    /// Contexts dropped from the head of the log by the cap
    pub contexts_dropped: usize,
}

impl AssociationDelta {
    pub fn added(&self) -> i64 {
        self.mention_count - self.previous_count
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssociationAggregator {
    context_cap: usize,
}

impl Default for AssociationAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_CAP)
    }
}

impl AssociationAggregator {
    pub fn new(context_cap: usize) -> Self {
        Self {
            context_cap: context_cap.max(1),
        }
    }

    pub fn context_cap(&self) -> usize {
        self.context_cap
    }

    /// Fold one resolved mention into the existing association, if any
    pub fn apply(
        &self,
        existing: Option<DocumentEntity>,
        document_id: &str,
        entity_id: i64,
        mention: &ResolvedMention,
    ) -> (DocumentEntity, AssociationDelta) {
        let created = existing.is_none();
        let mut association = existing.unwrap_or_else(|| DocumentEntity {
            document_id: document_id.to_string(),
            entity_id,
            mention_count: 0,
            contexts: Vec::new(),
            sentiment: None,
            sentiment_samples: 0,
            updated_at: Utc::now(),
        });
        let previous_count = association.mention_count;

        association.mention_count += mention.mention_count.max(1);

        let context = mention.context.trim();
        if !context.is_empty() {
            association.contexts.push(context.to_string());
        }
        let mut contexts_dropped = 0;
        if association.contexts.len() > self.context_cap {
            contexts_dropped = association.contexts.len() - self.context_cap;
            association.contexts.drain(..contexts_dropped);
        }

        if let Some(score) = mention.sentiment {
            let n = association.sentiment_samples as f64;
            association.sentiment = Some(match association.sentiment {
                Some(mean) if association.sentiment_samples > 0 => (mean * n + score) / (n + 1.0),
                _ => score,
            });
            association.sentiment_samples += 1;
        }

        association.updated_at = Utc::now();

        let delta = AssociationDelta {
            entity_id,
            created,
            previous_count,
            mention_count: association.mention_count,
            contexts_dropped,
        };
        (association, delta)
    }

    /// Read, fold and write back the association inside `tx`
    pub async fn upsert(
        &self,
        tx: &mut dyn RelationalTx,
        document_id: &str,
        entity: &EntityRef,
        mention: &ResolvedMention,
    ) -> OntologyResult<(DocumentEntity, AssociationDelta)> {
        let existing = tx.find_association(document_id, entity.id).await?;
        let (association, delta) = self.apply(existing, document_id, entity.id, mention);
        tx.save_association(&association).await?;

        tracing::debug!(
            document_id,
            entity_id = entity.id,
            mention_count = delta.mention_count,
            created = delta.created,
            "Association upserted"
        );
        Ok((association, delta))
    }
}
