//! Co-occurrence ranking and entity statistics
//!
//! Everything here is recomputed from the relational aggregates on every
//! call; nothing is cached.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::{normalize_name, DocumentEntity, Entity, EntityStatistics, RelatedEntity};
use crate::ontology::OntologyResult;
use crate::storage::RelationalStore;

pub const DEFAULT_RELATED_LIMIT: usize = 10;
pub const DEFAULT_TOP_ENTITIES: usize = 10;

/// An entity with every document it appears in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub entity: Entity,
    pub documents: Vec<DocumentEntity>,
}

impl EntityProfile {
    pub fn total_mentions(&self) -> i64 {
        self.documents.iter().map(|d| d.mention_count).sum()
    }
}

#[derive(Clone)]
pub struct StatisticsService {
    relational: Arc<dyn RelationalStore>,
}

impl StatisticsService {
    pub fn new(relational: Arc<dyn RelationalStore>) -> Self {
        Self { relational }
    }

    /// Entities sharing documents with `name`
    ///
    /// Ranked by shared document count descending, then entity id.
    pub async fn related_entities(&self, name: &str, limit: usize) -> OntologyResult<Vec<RelatedEntity>> {
        let normalized = normalize_name(name);
        if normalized.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        self.relational.related_entities(&normalized, limit).await
    }

    pub async fn entity_statistics(&self, top_n: usize) -> OntologyResult<EntityStatistics> {
        self.relational.entity_statistics(top_n).await
    }

    /// Associations of one entity, most mentioned first
    pub async fn entity_documents(&self, entity_id: i64) -> OntologyResult<Vec<DocumentEntity>> {
        let mut documents = self.relational.associations_for_entity(entity_id).await?;
        documents.sort_by(|a, b| {
            b.mention_count
                .cmp(&a.mention_count)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        Ok(documents)
    }

    /// Every entity named `name` (any type) with its documents
    pub async fn entity_profiles(&self, name: &str) -> OntologyResult<Vec<EntityProfile>> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let entities = self.relational.find_entities_by_name(&normalized).await?;
        let mut profiles = Vec::with_capacity(entities.len());
        for entity in entities {
            let documents = self.entity_documents(entity.id).await?;
            profiles.push(EntityProfile { entity, documents });
        }
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentRecord, EntityType, Metadata};
    use crate::ontology::{AssociationAggregator, EntityResolver, ResolvedMention, SourceKind};
    use crate::storage::{RelationalTx, SqliteRelationalStore};

    fn mention(name: &str, count: i64) -> ResolvedMention {
        ResolvedMention {
            name: name.to_string(),
            entity_type: EntityType::Person,
            span: None,
            confidence: 0.8,
            source: "analysis".to_string(),
            kind: SourceKind::Statistical,
            context: format!("{name} was there"),
            sentiment: None,
            metadata: Metadata::new(),
            mention_count: count,
        }
    }

    async fn seed(store: &SqliteRelationalStore, doc: &str, mentions: &[ResolvedMention]) {
        let resolver = EntityResolver::default();
        let aggregator = AssociationAggregator::default();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_document(&DocumentRecord {
            id: doc.to_string(),
            source_url: format!("https://example.com/{doc}"),
            summary: String::new(),
            topics: Vec::new(),
        })
        .await
        .unwrap();
        for m in mentions {
            let entity = resolver.resolve(tx.as_mut(), m).await.unwrap();
            aggregator.upsert(tx.as_mut(), doc, &entity, m).await.unwrap();
        }
        tx.commit().await.unwrap();
    }

    async fn service() -> StatisticsService {
        let store = SqliteRelationalStore::in_memory().unwrap();
        seed(&store, "a", &[mention("X", 1), mention("Y", 2)]).await;
        seed(&store, "b", &[mention("X", 3), mention("Z", 1)]).await;
        StatisticsService::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_related_entities_ranking() {
        let service = service().await;
        let related = service.related_entities("x", DEFAULT_RELATED_LIMIT).await.unwrap();

        let names: Vec<_> = related.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Y", "Z"]);
        assert!(related.iter().all(|r| r.co_occurrence_count == 1));
        assert!(service.related_entities("", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_statistics() {
        let service = service().await;
        let stats = service.entity_statistics(DEFAULT_TOP_ENTITIES).await.unwrap();

        assert_eq!(stats.total_entities, 3);
        assert_eq!(stats.total_mentions, 7);
        assert_eq!(stats.counts_by_type["PERSON"], 3);
        assert_eq!(stats.top_entities[0].name, "X");
        assert_eq!(stats.top_entities[0].mention_count, 4);
    }

    #[tokio::test]
    async fn test_entity_profiles() {
        let service = service().await;
        let profiles = service.entity_profiles("X").await.unwrap();

        assert_eq!(profiles.len(), 1);
        let profile = &profiles[0];
        assert_eq!(profile.documents.len(), 2);
        assert_eq!(profile.documents[0].document_id, "b");
        assert_eq!(profile.total_mentions(), 4);

        assert!(service.entity_profiles("nobody").await.unwrap().is_empty());
    }
}
