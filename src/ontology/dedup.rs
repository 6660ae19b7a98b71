//! Within-document mention deduplication
//!
//! Mentions are grouped by normalized name. Each group collapses into one
//! [`ResolvedMention`] whose `mention_count` is the group size.
//!
//! Representative selection, in order:
//! 1. highest confidence
//! 2. more authoritative [`SourceKind`] (pattern over statistical)
//! 3. earliest in extraction order
//!
//! Metadata of the whole group is merged in extraction order, later entries
//! winning on key collision.

use std::collections::HashMap;

use super::mention::{RawMention, ResolvedMention};
use super::metadata::merge_all;

/// Collapses raw mentions of one document into one mention per entity
#[derive(Debug, Clone, Copy, Default)]
pub struct MentionDeduplicator;

impl MentionDeduplicator {
    pub fn new() -> Self {
        Self
    }

    /// Deduplicate; groups are emitted in order of first appearance
    pub fn deduplicate(&self, mentions: Vec<RawMention>) -> Vec<ResolvedMention> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<RawMention>> = HashMap::new();

        for mention in mentions {
            let key = mention.normalized_name();
            if key.is_empty() {
                continue;
            }
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(mention);
        }

        order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .filter_map(collapse)
            .collect()
    }
}

fn collapse(group: Vec<RawMention>) -> Option<ResolvedMention> {
    if group.len() == 1 {
        return group.into_iter().next().map(ResolvedMention::from);
    }

    let mut best = 0;
    for (idx, candidate) in group.iter().enumerate().skip(1) {
        let current = &group[best];
        let better = candidate.confidence > current.confidence
            || (candidate.confidence == current.confidence && candidate.kind > current.kind);
        if better {
            best = idx;
        }
    }

    let metadata = merge_all(group.iter().map(|m| &m.metadata));
    let scores: Vec<f64> = group.iter().filter_map(|m| m.sentiment).collect();
    let sentiment = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    let mention_count = group.len() as i64;
    let fallback_context = group
        .iter()
        .map(|m| m.context.trim())
        .find(|c| !c.is_empty())
        .map(str::to_string);

    let representative = group.into_iter().nth(best)?;
    let context = if representative.context.trim().is_empty() {
        fallback_context.unwrap_or_default()
    } else {
        representative.context
    };

    Some(ResolvedMention {
        name: representative.name.trim().to_string(),
        entity_type: representative.entity_type,
        span: representative.span,
        confidence: representative.confidence,
        source: representative.source,
        kind: representative.kind,
        context,
        sentiment,
        metadata,
        mention_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, Metadata};
    use crate::ontology::mention::SourceKind;
    use serde_json::json;

    fn mention(name: &str, confidence: f64, kind: SourceKind) -> RawMention {
        RawMention {
            name: name.to_string(),
            entity_type: EntityType::Person,
            span: None,
            confidence,
            source: kind.as_str().to_string(),
            kind,
            context: String::new(),
            sentiment: None,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_single_mention_passes_through() {
        let out = MentionDeduplicator::new().deduplicate(vec![mention("Jane Smith", 0.8, SourceKind::Statistical)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mention_count, 1);
        assert_eq!(out[0].confidence, 0.8);
    }

    #[test]
    fn test_highest_confidence_wins() {
        let out = MentionDeduplicator::new().deduplicate(vec![
            mention("Jane Smith", 0.8, SourceKind::Statistical),
            mention("Jane Smith", 0.9, SourceKind::Pattern),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mention_count, 2);
        assert_eq!(out[0].confidence, 0.9);
        assert_eq!(out[0].kind, SourceKind::Pattern);
    }

    #[test]
    fn test_tie_prefers_pattern_source() {
        let out = MentionDeduplicator::new().deduplicate(vec![
            mention("Senate", 0.9, SourceKind::Statistical),
            mention("senate", 0.9, SourceKind::Pattern),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, SourceKind::Pattern);
        assert_eq!(out[0].name, "senate");
    }

    #[test]
    fn test_tie_same_kind_keeps_first() {
        let mut first = mention("Senate", 0.9, SourceKind::Pattern);
        first.source = "first".to_string();
        let mut second = mention("Senate", 0.9, SourceKind::Pattern);
        second.source = "second".to_string();

        let out = MentionDeduplicator::new().deduplicate(vec![first, second]);
        assert_eq!(out[0].source, "first");
    }

    #[test]
    fn test_metadata_merged_in_extraction_order() {
        let mut a = mention("Jane Smith", 0.9, SourceKind::Pattern);
        a.metadata.insert("party".to_string(), json!("Democratic"));
        a.metadata.insert("title".to_string(), json!("Senator"));
        let mut b = mention("Jane Smith", 0.8, SourceKind::Statistical);
        b.metadata.insert("party".to_string(), json!("Independent"));

        let out = MentionDeduplicator::new().deduplicate(vec![a, b]);
        assert_eq!(out[0].metadata["party"], json!("Independent"));
        assert_eq!(out[0].metadata["title"], json!("Senator"));
    }

    #[test]
    fn test_groups_keep_first_appearance_order() {
        let out = MentionDeduplicator::new().deduplicate(vec![
            mention("B", 0.5, SourceKind::Statistical),
            mention("A", 0.5, SourceKind::Statistical),
            mention("b", 0.5, SourceKind::Statistical),
        ]);
        let names: Vec<&str> = out.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn test_context_falls_back_to_group() {
        let rep = mention("Jane Smith", 0.9, SourceKind::Pattern);
        let mut other = mention("Jane Smith", 0.8, SourceKind::Statistical);
        other.context = "Jane Smith voted no".to_string();

        let out = MentionDeduplicator::new().deduplicate(vec![rep, other]);
        assert_eq!(out[0].context, "Jane Smith voted no");
    }

    #[test]
    fn test_sentiment_is_group_mean() {
        let mut a = mention("Jane Smith", 0.9, SourceKind::Pattern);
        a.sentiment = Some(0.2);
        let mut b = mention("Jane Smith", 0.8, SourceKind::Statistical);
        b.sentiment = Some(0.6);
        let c = mention("Jane Smith", 0.7, SourceKind::Statistical);

        let out = MentionDeduplicator::new().deduplicate(vec![a, b, c]);
        let sentiment = out[0].sentiment.unwrap();
        assert!((sentiment - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_blank_names_dropped() {
        let out = MentionDeduplicator::new().deduplicate(vec![mention("   ", 0.9, SourceKind::Pattern)]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(MentionDeduplicator::new().deduplicate(vec![]).is_empty());
    }
}
