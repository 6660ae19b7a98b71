//! Built-in mention sources
//!
//! ## Sources
//! - [`PatternMentionSource`]: known politicians (with title variants),
//!   political organisations and bill references
//! - [`AnalysisMentionSource`]: entities reported by the external analyzer

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{OntologyError, OntologyResult};
use super::mention::{ExtractionInput, MentionSource, RawMention, SourceKind, Span};
use crate::models::{EntityType, Metadata};
use crate::utils::snippet;

/// Confidence of a known-politician match
pub const POLITICIAN_CONFIDENCE: f64 = 0.9;
/// Confidence of a known-organisation match
pub const ORGANIZATION_CONFIDENCE: f64 = 0.95;
/// Confidence of a bill reference match
pub const LEGISLATION_CONFIDENCE: f64 = 0.99;
/// Confidence assigned to analyzer entities
pub const ANALYSIS_CONFIDENCE: f64 = 0.8;

/// Extraction configuration
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Characters of context kept on each side of a match
    pub context_window: usize,

    /// Minimum entity name length in characters
    pub min_entity_length: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            context_window: 100,
            min_entity_length: 2,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for ExtractionConfig
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> OntologyResult<()> {
        if self.min_entity_length == 0 {
            return Err(OntologyError::invalid_config(
                "min_entity_length",
                "0",
                "Must be at least 1",
            ));
        }
        if self.context_window > 10_000 {
            return Err(OntologyError::invalid_config(
                "context_window",
                self.context_window.to_string(),
                "Must be at most 10000",
            ));
        }
        Ok(())
    }
}

/// Builder for ExtractionConfig with fluent API
#[derive(Debug, Clone, Default)]
pub struct ExtractionConfigBuilder {
    context_window: Option<usize>,
    min_entity_length: Option<usize>,
}

impl ExtractionConfigBuilder {
    /// Set context window size
    pub fn context_window(mut self, chars: usize) -> Self {
        self.context_window = Some(chars);
        self
    }

    /// Set minimum entity name length
    pub fn min_entity_length(mut self, len: usize) -> Self {
        self.min_entity_length = Some(len);
        self
    }

    /// Build the config with validation
    pub fn build(self) -> OntologyResult<ExtractionConfig> {
        let defaults = ExtractionConfig::default();
        let config = ExtractionConfig {
            context_window: self.context_window.unwrap_or(defaults.context_window),
            min_entity_length: self.min_entity_length.unwrap_or(defaults.min_entity_length),
        };
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Pattern catalog
// ============================================================================

/// A politician recognised by name or by title + name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnownPolitician {
    pub name: String,
    pub titles: Vec<String>,
    pub party: String,
}

impl KnownPolitician {
    fn new(name: &str, titles: &[&str], party: &str) -> Self {
        Self {
            name: name.to_string(),
            titles: titles.iter().map(|t| t.to_string()).collect(),
            party: party.to_string(),
        }
    }
}

/// A bill reference form, e.g. `H.R. 302`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillForm {
    /// Canonical prefix as written in names, e.g. `H.R.`
    pub prefix: String,
    pub subtype: String,
}

impl BillForm {
    fn new(prefix: &str, subtype: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            subtype: subtype.to_string(),
        }
    }
}

/// Domain knowledge used by [`PatternMentionSource`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternCatalog {
    pub politicians: Vec<KnownPolitician>,
    pub organizations: Vec<String>,
    pub bills: Vec<BillForm>,
}

impl Default for PatternCatalog {
    fn default() -> Self {
        Self {
            politicians: vec![
                KnownPolitician::new("Joe Biden", &["President", "Senator"], "Democratic"),
                KnownPolitician::new("Donald Trump", &["President", "Former President"], "Republican"),
                KnownPolitician::new("Nancy Pelosi", &["Speaker", "Representative"], "Democratic"),
                KnownPolitician::new("Mitch McConnell", &["Senator", "Minority Leader"], "Republican"),
                KnownPolitician::new("Chuck Schumer", &["Senator", "Majority Leader"], "Democratic"),
                KnownPolitician::new("Kevin McCarthy", &["Representative", "Speaker"], "Republican"),
            ],
            organizations: [
                "House of Representatives",
                "Senate",
                "Congress",
                "Supreme Court",
                "Department of Justice",
                "Department of Defense",
                "Department of Health and Human Services",
                "Centers for Disease Control",
                "Federal Bureau of Investigation",
                "Central Intelligence Agency",
                "National Security Agency",
                "Democratic Party",
                "Republican Party",
                "Green Party",
                "Libertarian Party",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            bills: vec![
                BillForm::new("H.R.", "house_bill"),
                BillForm::new("S.", "senate_bill"),
                BillForm::new("H.J.Res.", "house_joint_resolution"),
                BillForm::new("S.J.Res.", "senate_joint_resolution"),
                BillForm::new("H.Con.Res.", "house_concurrent_resolution"),
                BillForm::new("S.Con.Res.", "senate_concurrent_resolution"),
            ],
        }
    }
}

/// How a compiled pattern names its matches
#[derive(Debug, Clone)]
enum MatchName {
    /// Always the given canonical name
    Fixed(String),
    /// `<prefix> <number>` from capture group 1
    Bill(String),
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    regex: Regex,
    name: MatchName,
    entity_type: EntityType,
    confidence: f64,
    metadata: Metadata,
}

fn compile(pattern: &str, case_insensitive: bool) -> OntologyResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| OntologyError::invalid_config("pattern", pattern, e.to_string()))
}

/// Rule-based extractor over a [`PatternCatalog`]
#[derive(Debug, Clone)]
pub struct PatternMentionSource {
    config: ExtractionConfig,
    patterns: Vec<CompiledPattern>,
}

impl PatternMentionSource {
    pub const ID: &'static str = "pattern";

    /// Create a source with the default catalog
    pub fn new(config: ExtractionConfig) -> OntologyResult<Self> {
        Self::with_catalog(config, &PatternCatalog::default())
    }

    /// Create a source from a custom catalog
    pub fn with_catalog(config: ExtractionConfig, catalog: &PatternCatalog) -> OntologyResult<Self> {
        config.validate()?;
        let mut patterns = Vec::new();

        for politician in &catalog.politicians {
            let mut metadata = Metadata::new();
            metadata.insert("party".to_string(), json!(politician.party));
            metadata.insert("titles".to_string(), json!(politician.titles));

            let escaped = regex::escape(&politician.name);
            let mut forms = vec![format!(r"\b{escaped}\b")];
            for title in &politician.titles {
                forms.push(format!(r"\b{}\s+{escaped}\b", regex::escape(title)));
            }
            for form in forms {
                patterns.push(CompiledPattern {
                    regex: compile(&form, true)?,
                    name: MatchName::Fixed(politician.name.clone()),
                    entity_type: EntityType::Politician,
                    confidence: POLITICIAN_CONFIDENCE,
                    metadata: metadata.clone(),
                });
            }
        }

        for org in &catalog.organizations {
            let kind = if org.contains("Department") || org.contains("Court") {
                "government"
            } else {
                "political"
            };
            let mut metadata = Metadata::new();
            metadata.insert("type".to_string(), json!(kind));

            patterns.push(CompiledPattern {
                regex: compile(&format!(r"\b{}\b", regex::escape(org)), true)?,
                name: MatchName::Fixed(org.clone()),
                entity_type: EntityType::Organization,
                confidence: ORGANIZATION_CONFIDENCE,
                metadata,
            });
        }

        for bill in &catalog.bills {
            let mut metadata = Metadata::new();
            metadata.insert("subtype".to_string(), json!(bill.subtype));

            patterns.push(CompiledPattern {
                regex: compile(&format!(r"\b{}\s*(\d+)\b", regex::escape(&bill.prefix)), false)?,
                name: MatchName::Bill(bill.prefix.clone()),
                entity_type: EntityType::Legislation,
                confidence: LEGISLATION_CONFIDENCE,
                metadata,
            });
        }

        Ok(Self { config, patterns })
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    fn scan(&self, text: &str) -> Vec<RawMention> {
        let mut mentions = Vec::new();

        for pattern in &self.patterns {
            for cap in pattern.regex.captures_iter(text) {
                let Some(whole) = cap.get(0) else {
                    continue;
                };
                let name = match &pattern.name {
                    MatchName::Fixed(name) => name.clone(),
                    MatchName::Bill(prefix) => match cap.get(1) {
                        Some(number) => format!("{prefix} {}", number.as_str()),
                        None => continue,
                    },
                };

                mentions.push(RawMention {
                    name,
                    entity_type: pattern.entity_type,
                    span: Some(Span::new(whole.start(), whole.end())),
                    confidence: pattern.confidence,
                    source: Self::ID.to_string(),
                    kind: SourceKind::Pattern,
                    context: snippet(text, whole.start(), whole.end(), self.config.context_window),
                    sentiment: None,
                    metadata: pattern.metadata.clone(),
                });
            }
        }

        mentions.sort_by_key(|m| m.span.map(|s| s.start).unwrap_or(usize::MAX));
        mentions
    }
}

#[async_trait]
impl MentionSource for PatternMentionSource {
    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Pattern
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> OntologyResult<Vec<RawMention>> {
        Ok(self.scan(input.text))
    }
}

// ============================================================================
// Analyzer entities
// ============================================================================

/// Adapts `AnalysisResult.entities` into raw mentions
#[derive(Debug, Clone, Default)]
pub struct AnalysisMentionSource {
    config: ExtractionConfig,
}

impl AnalysisMentionSource {
    pub const ID: &'static str = "analysis";

    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    fn locate(text: &str, name: &str) -> OntologyResult<Option<Span>> {
        let regex = compile(&regex::escape(name), true)
            .map_err(|e| OntologyError::extraction_failed(Self::ID, e.to_string()))?;
        Ok(regex.find(text).map(|m| Span::new(m.start(), m.end())))
    }
}

#[async_trait]
impl MentionSource for AnalysisMentionSource {
    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Statistical
    }

    async fn extract(&self, input: &ExtractionInput<'_>) -> OntologyResult<Vec<RawMention>> {
        let mut mentions = Vec::with_capacity(input.analysis.entities.len());

        for entity in &input.analysis.entities {
            let name = entity.name.trim();
            if name.chars().count() < self.config.min_entity_length {
                continue;
            }

            let span = Self::locate(input.text, name)?;
            let context = match (entity.context.trim(), span) {
                (ctx, _) if !ctx.is_empty() => ctx.to_string(),
                (_, Some(s)) => snippet(input.text, s.start, s.end, self.config.context_window),
                _ => String::new(),
            };

            let mut metadata = Metadata::new();
            if !entity.entity_type.trim().is_empty() {
                metadata.insert("analysis_label".to_string(), json!(entity.entity_type));
            }

            mentions.push(RawMention {
                name: name.to_string(),
                entity_type: EntityType::from_label(&entity.entity_type),
                span,
                confidence: ANALYSIS_CONFIDENCE,
                source: Self::ID.to_string(),
                kind: SourceKind::Statistical,
                context,
                sentiment: entity.sentiment,
                metadata,
            });
        }

        Ok(mentions)
    }
}
