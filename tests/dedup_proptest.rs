//! Property tests for within-document mention deduplication

mod common;

use proptest::prelude::*;
use std::collections::HashSet;

use polgraph::models::{normalize_name, EntityType};
use polgraph::ontology::{MentionDeduplicator, RawMention, SourceKind};

const NAMES: &[&str] = &["Jane Smith", "jane smith", "  JANE SMITH ", "John Doe", "Senate", "H.R. 302"];

fn mention_strategy() -> impl Strategy<Value = RawMention> {
    (
        prop::sample::select(NAMES),
        0u8..=100,
        prop::bool::ANY,
    )
        .prop_map(|(name, confidence, pattern)| {
            let kind = if pattern { SourceKind::Pattern } else { SourceKind::Statistical };
            common::raw_mention(name, EntityType::Person, f64::from(confidence) / 100.0, kind.as_str(), kind)
        })
}

proptest! {
    #[test]
    fn counts_are_preserved(mentions in prop::collection::vec(mention_strategy(), 0..40)) {
        let total = mentions.len() as i64;
        let resolved = MentionDeduplicator::new().deduplicate(mentions);

        prop_assert_eq!(resolved.iter().map(|m| m.mention_count).sum::<i64>(), total);
    }

    #[test]
    fn one_mention_per_normalized_name(mentions in prop::collection::vec(mention_strategy(), 0..40)) {
        let expected: HashSet<String> = mentions.iter().map(|m| normalize_name(&m.name)).collect();
        let resolved = MentionDeduplicator::new().deduplicate(mentions);

        let keys: Vec<String> = resolved.iter().map(|m| m.normalized_name()).collect();
        let unique: HashSet<String> = keys.iter().cloned().collect();
        prop_assert_eq!(keys.len(), unique.len());
        prop_assert_eq!(unique, expected);
    }

    #[test]
    fn representative_has_group_max_confidence(mentions in prop::collection::vec(mention_strategy(), 1..40)) {
        let resolved = MentionDeduplicator::new().deduplicate(mentions.clone());

        for m in &resolved {
            let best = mentions
                .iter()
                .filter(|raw| normalize_name(&raw.name) == m.normalized_name())
                .map(|raw| raw.confidence)
                .fold(f64::MIN, f64::max);
            prop_assert_eq!(m.confidence, best);
        }
    }

    #[test]
    fn groups_follow_first_appearance(mentions in prop::collection::vec(mention_strategy(), 0..40)) {
        let mut first_seen = Vec::new();
        for m in &mentions {
            let key = normalize_name(&m.name);
            if !first_seen.contains(&key) {
                first_seen.push(key);
            }
        }
        let resolved = MentionDeduplicator::new().deduplicate(mentions);

        let order: Vec<String> = resolved.iter().map(|m| m.normalized_name()).collect();
        prop_assert_eq!(order, first_seen);
    }
}
