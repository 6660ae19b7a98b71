//! Entity extraction and resolution
//!
//! This module turns one document's analysis output into canonical entities
//! and document associations.
//!
//! # Stages
//!
//! - **Extraction**: every [`MentionSource`] reports [`RawMention`]s; a failing
//!   source is skipped and the rest continue
//! - **Deduplication**: mentions with the same normalized name collapse into
//!   one [`ResolvedMention`] carrying a mention count
//! - **Resolution**: each resolved mention maps to exactly one canonical entity
//!   per `(normalized name, type)`
//! - **Aggregation**: the document-entity association accumulates counts,
//!   a bounded context log and a running sentiment mean
//!
//! # Submodules
//!
//! - [`mention`] - Mention types, the [`MentionSource`] trait and the extractor adapter
//! - [`extractor`] - Pattern and analysis mention sources
//! - [`dedup`] - Within-document deduplication
//! - [`resolver`] - Canonical entity resolution
//! - [`aggregator`] - Association accumulation
//! - [`metadata`] - Last-writer-wins metadata merging
//! - [`error`] - Error taxonomy shared by the pipeline and stores
//!
//! # Quick Start
//!
//! ```ignore
//! use polgraph::ontology::{
//!     AnalysisMentionSource, ExtractionConfig, ExtractionInput, MentionDeduplicator,
//!     MentionExtractor, PatternMentionSource,
//! };
//! use std::sync::Arc;
//!
//! let config = ExtractionConfig::default();
//! let extractor = MentionExtractor::default()
//!     .with_source(Arc::new(PatternMentionSource::new(config.clone())?))
//!     .with_source(Arc::new(AnalysisMentionSource::new(config)));
//!
//! let report = extractor.extract(&ExtractionInput { text, analysis: &analysis }).await;
//! let mentions = MentionDeduplicator::new().deduplicate(report.mentions);
//! ```
//!
//! # Configuration
//!
//! ```ignore
//! use polgraph::ontology::ExtractionConfig;
//!
//! let config = ExtractionConfig::builder()
//!     .context_window(80)
//!     .min_entity_length(3)
//!     .build()?;
//! ```

pub mod aggregator;
pub mod dedup;
pub mod error;
pub mod extractor;
pub mod mention;
pub mod metadata;
pub mod resolver;

pub use aggregator::{AssociationAggregator, AssociationDelta, DEFAULT_CONTEXT_CAP};
pub use dedup::MentionDeduplicator;
pub use error::{OntologyError, OntologyResult};
pub use extractor::{
    AnalysisMentionSource, BillForm, ExtractionConfig, ExtractionConfigBuilder, KnownPolitician,
    PatternCatalog, PatternMentionSource, ANALYSIS_CONFIDENCE, LEGISLATION_CONFIDENCE,
    ORGANIZATION_CONFIDENCE, POLITICIAN_CONFIDENCE,
};
pub use mention::{
    ExtractionInput, ExtractionReport, MentionExtractor, MentionSource, RawMention,
    ResolvedMention, SourceKind, Span,
};
pub use metadata::{merge_all, merge_metadata};
pub use resolver::{EntityResolver, ExactNameMatcher, NameMatcher, DEFAULT_CONFLICT_RETRIES};
