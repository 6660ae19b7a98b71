//! Mention types and the extractor adapter
//!
//! Every extractor, whether rule based or statistical, is a [`MentionSource`].
//! [`MentionExtractor`] runs the configured sources over one document and
//! concatenates their output; a failing source is logged and skipped.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{OntologyError, OntologyResult};
use crate::models::{normalize_name, AnalysisResult, EntityKey, EntityType, Metadata};

/// Family of extractor a mention came from
///
/// Ordered by authority: on equal confidence a `Pattern` mention wins over a
/// `Statistical` one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Statistical NER or analyzer output
    Statistical,
    /// Rule or pattern match
    Pattern,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Statistical => "statistical",
            Self::Pattern => "pattern",
        }
    }
}

/// Byte range of a mention in the document text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// One occurrence of an entity name reported by one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMention {
    pub name: String,
    pub entity_type: EntityType,
    /// `None` when the source could not locate the name in the text
    pub span: Option<Span>,
    pub confidence: f64,
    /// Id of the source that produced the mention
    pub source: String,
    pub kind: SourceKind,
    pub context: String,
    pub sentiment: Option<f64>,
    pub metadata: Metadata,
}

impl RawMention {
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// One mention per logical entity within a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMention {
    pub name: String,
    pub entity_type: EntityType,
    pub span: Option<Span>,
    pub confidence: f64,
    pub source: String,
    pub kind: SourceKind,
    /// Representative context snippet
    pub context: String,
    pub sentiment: Option<f64>,
    pub metadata: Metadata,
    /// Number of raw mentions collapsed into this one
    pub mention_count: i64,
}

impl ResolvedMention {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.name, self.entity_type)
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

impl From<RawMention> for ResolvedMention {
    fn from(m: RawMention) -> Self {
        Self {
            name: m.name,
            entity_type: m.entity_type,
            span: m.span,
            confidence: m.confidence,
            source: m.source,
            kind: m.kind,
            context: m.context,
            sentiment: m.sentiment,
            metadata: m.metadata,
            mention_count: 1,
        }
    }
}

/// What a source sees of a document
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub text: &'a str,
    pub analysis: &'a AnalysisResult,
}

/// An extractor producing raw mentions from a document
#[async_trait]
pub trait MentionSource: Send + Sync {
    /// Stable id used in logs, metrics and `RawMention::source`
    fn id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    async fn extract(&self, input: &ExtractionInput<'_>) -> OntologyResult<Vec<RawMention>>;
}

/// Output of one extraction pass
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub mentions: Vec<RawMention>,
    /// One entry per source that failed
    pub failures: Vec<OntologyError>,
}

impl ExtractionReport {
    pub fn failed_sources(&self) -> usize {
        self.failures.len()
    }
}

/// Runs a fixed list of mention sources over a document
#[derive(Clone, Default)]
pub struct MentionExtractor {
    sources: Vec<Arc<dyn MentionSource>>,
}

impl MentionExtractor {
    pub fn new(sources: Vec<Arc<dyn MentionSource>>) -> Self {
        Self { sources }
    }

    /// Add a source; chainable at construction time
    pub fn with_source(mut self, source: Arc<dyn MentionSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.id()).collect()
    }

    /// Run every source, dropping the output of those that fail
    pub async fn extract(&self, input: &ExtractionInput<'_>) -> ExtractionReport {
        let results = join_all(self.sources.iter().map(|s| s.extract(input))).await;

        let mut report = ExtractionReport::default();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(mentions) => {
                    debug!(source = source.id(), count = mentions.len(), "Source extracted mentions");
                    report.mentions.extend(mentions);
                }
                Err(e) => {
                    warn!(source = source.id(), error = %e, "Mention source failed, skipping");
                    crate::metrics::record_extractor_failure(source.id());
                    let failure = match e {
                        OntologyError::ExtractionPartialFailure { .. } => e,
                        other => OntologyError::extraction_failed(source.id(), other.to_string()),
                    };
                    report.failures.push(failure);
                }
            }
        }

        report
    }
}
