//! Metadata merging
//!
//! Entity and graph-node metadata are open key-value maps. Every merge in the
//! pipeline goes through [`merge_metadata`] so that the rule is the same for
//! the relational and the graph store: union of keys, last writer wins per key.

use crate::models::Metadata;

/// Merge `incoming` into `existing`, incoming keys winning on collision.
pub fn merge_metadata(existing: &Metadata, incoming: &Metadata) -> Metadata {
    let mut merged = existing.clone();
    merge_into(&mut merged, incoming);
    merged
}

/// In-place variant of [`merge_metadata`].
pub fn merge_into(target: &mut Metadata, incoming: &Metadata) {
    for (key, value) in incoming {
        target.insert(key.clone(), value.clone());
    }
}

/// Fold a sequence of maps left to right.
pub fn merge_all<'a, I>(maps: I) -> Metadata
where
    I: IntoIterator<Item = &'a Metadata>,
{
    let mut merged = Metadata::new();
    for map in maps {
        merge_into(&mut merged, map);
    }
    merged
}
