//! Source list deduplication.
//!
//! Retrieval returns one descriptor per chunk hit, so the same page can
//! appear several times under one URL. Inline citations in the generated
//! text refer to pre-dedup positions, so collapsing the list has to keep a
//! remap from every original position to its collapsed position.

use std::collections::HashMap;

use crate::chat::message::Source;

/// Result of collapsing a retrieved source list by URL identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceDedup {
    /// Unique sources, in first-seen order.
    pub filtered: Vec<Source>,
    /// Original position → position in `filtered`. Total over the input:
    /// every index in `0..sources.len()` has an entry.
    pub index_map: HashMap<usize, usize>,
}

/// Collapse `sources` by URL, keeping first-seen order.
///
/// Repeat occurrences map to the filtered index of their first occurrence.
/// URLs are treated as opaque identity strings; malformed input is not an
/// error. Idempotent: deduping an already-filtered list returns it
/// unchanged with an identity map.
pub fn dedupe_sources(sources: &[Source]) -> SourceDedup {
    let mut filtered: Vec<Source> = Vec::new();
    let mut url_first_seen: HashMap<&str, usize> = HashMap::new();
    let mut index_map: HashMap<usize, usize> = HashMap::new();

    for (i, source) in sources.iter().enumerate() {
        match url_first_seen.get(source.url.as_str()) {
            None => {
                url_first_seen.insert(source.url.as_str(), i);
                index_map.insert(i, filtered.len());
                filtered.push(source.clone());
            }
            Some(&first) => {
                if let Some(&resolved) = index_map.get(&first) {
                    index_map.insert(i, resolved);
                }
            }
        }
    }

    SourceDedup {
        filtered,
        index_map,
    }
}
