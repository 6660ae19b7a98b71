//! Entity resolution
//!
//! Maps a deduplicated mention onto a canonical entity, creating it on first
//! sighting. The read-modify-write on an existing entity is a conditional
//! update on the entity `version`; a lost race re-reads and tries again.

use std::sync::Arc;

use tracing::debug;

use super::error::{OntologyError, OntologyResult};
use super::mention::ResolvedMention;
use super::metadata::merge_metadata;
use crate::metrics;
use crate::models::{EntityKey, EntityRef, NewEntity, ResolutionDecision};
use crate::storage::RelationalTx;

/// Default number of re-reads after a lost conditional write
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Decides which canonical key a mention resolves to
///
/// Only exact matching ships. A fuzzy matcher that folds "Sen. Jane Smith"
/// into "Jane Smith" would plug in here.
pub trait NameMatcher: Send + Sync {
    fn name(&self) -> &str;

    fn key_for(&self, mention: &ResolvedMention) -> EntityKey;
}

/// Case and whitespace folding only
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactNameMatcher;

impl NameMatcher for ExactNameMatcher {
    fn name(&self) -> &str {
        "exact"
    }

    fn key_for(&self, mention: &ResolvedMention) -> EntityKey {
        mention.key()
    }
}

#[derive(Clone)]
pub struct EntityResolver {
    matcher: Arc<dyn NameMatcher>,
    max_conflict_retries: u32,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CONFLICT_RETRIES)
    }
}

impl EntityResolver {
    pub fn new(max_conflict_retries: u32) -> Self {
        Self {
            matcher: Arc::new(ExactNameMatcher),
            max_conflict_retries,
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn NameMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn matcher_name(&self) -> &str {
        self.matcher.name()
    }

    /// Canonical key `mention` will resolve to
    pub fn key_for(&self, mention: &ResolvedMention) -> EntityKey {
        self.matcher.key_for(mention)
    }

    /// Find or create the canonical entity for `mention` inside `tx`
    ///
    /// Metadata is merged with incoming keys winning; confidence keeps the
    /// highest value seen. Returns [`OntologyError::EntityConflict`] only after
    /// `max_conflict_retries` consecutive lost races.
    pub async fn resolve(
        &self,
        tx: &mut dyn RelationalTx,
        mention: &ResolvedMention,
    ) -> OntologyResult<EntityRef> {
        let key = self.key_for(mention);

        for attempt in 0..=self.max_conflict_retries {
            if let Some(existing) = tx.find_entity(&key).await? {
                let merged = merge_metadata(&existing.metadata, &mention.metadata);
                let confidence = existing.confidence_score.max(mention.confidence);

                if merged == existing.metadata && confidence == existing.confidence_score {
                    return Ok(self.resolved(existing.id, existing.name, key, ResolutionDecision::Unchanged));
                }

                if tx
                    .update_entity_metadata(existing.id, existing.version, &merged, confidence)
                    .await?
                {
                    return Ok(self.resolved(existing.id, existing.name, key, ResolutionDecision::Merged));
                }

                debug!(entity = %key, attempt, version = existing.version, "Entity update lost a race, re-reading");
                metrics::record_entity_conflict(key.entity_type.as_str());
                continue;
            }

            let candidate = NewEntity {
                name: mention.name.trim().to_string(),
                key: key.clone(),
                confidence_score: mention.confidence,
                metadata: mention.metadata.clone(),
            };

            match tx.insert_entity(&candidate).await? {
                Some(created) => {
                    return Ok(self.resolved(created.id, created.name, key, ResolutionDecision::Created));
                }
                None => {
                    debug!(entity = %key, attempt, "Entity created concurrently, re-reading");
                    metrics::record_entity_conflict(key.entity_type.as_str());
                }
            }
        }

        Err(OntologyError::EntityConflict {
            name: key.normalized_name,
            entity_type: key.entity_type.to_string(),
            attempts: self.max_conflict_retries + 1,
        })
    }

    fn resolved(&self, id: i64, name: String, key: EntityKey, decision: ResolutionDecision) -> EntityRef {
        metrics::record_entity_resolution(decision.as_str());
        debug!(entity_id = id, entity = %key, decision = decision.as_str(), "Entity resolved");
        EntityRef {
            id,
            name,
            key,
            decision,
        }
    }
}
