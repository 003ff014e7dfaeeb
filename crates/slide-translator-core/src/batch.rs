//! Token-bounded batching of fragments.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::estimate::{estimate, fragment_cost};
use crate::fragment::FragmentSet;

/// A group of fragments sent to the backend in one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Stable label (`batch_3`, `batch_3_sub_2`, `final_1`)
    pub id: String,
    pub fragments: FragmentSet,
    /// Estimated request cost including the prompt overhead
    pub estimated_tokens: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.fragments.keys().cloned().collect()
    }
}

/// Greedy longest-first partitioner.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    max_tokens: usize,
    prompt_overhead: usize,
    per_item_overhead: usize,
}

impl Partitioner {
    pub const fn new(max_tokens: usize, prompt_overhead: usize) -> Self {
        Self {
            max_tokens,
            prompt_overhead,
            per_item_overhead: 0,
        }
    }

    #[must_use]
    pub const fn with_item_overhead(mut self, per_item_overhead: usize) -> Self {
        self.per_item_overhead = per_item_overhead;
        self
    }

    /// Split `fragments` into batches whose estimated cost stays within
    /// `max_tokens`.
    ///
    /// Fragments are taken in descending cost order. A fragment that does
    /// not fit on its own still gets a batch to itself. Every fragment lands
    /// in exactly one batch; the input order only breaks ties.
    pub fn partition(&self, fragments: &FragmentSet) -> Vec<Batch> {
        let mut items: Vec<(&String, &String, usize)> = fragments
            .iter()
            .map(|(id, text)| (id, text, fragment_cost(id, text, self.per_item_overhead)))
            .collect();
        // Stable, so equal costs keep extraction order
        items.sort_by(|a, b| b.2.cmp(&a.2));

        let mut batches = Vec::new();
        let mut current = FragmentSet::new();
        let mut current_cost = self.prompt_overhead;

        for (id, text, cost) in items {
            if !current.is_empty() && current_cost + cost > self.max_tokens {
                batches.push(self.close(batches.len(), std::mem::take(&mut current), current_cost));
                current_cost = self.prompt_overhead;
            }
            if current.is_empty() && self.prompt_overhead + cost > self.max_tokens {
                debug!("Fragment {} ({} tokens) exceeds the batch ceiling alone", id, cost);
            }
            current.insert(id.clone(), text.clone());
            current_cost += cost;
        }

        if !current.is_empty() {
            batches.push(self.close(batches.len(), current, current_cost));
        }

        if !batches.is_empty() {
            let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
            info!(
                "Created {} batches from {} fragments (sizes min={}, max={}, ceiling={} tokens)",
                batches.len(),
                fragments.len(),
                sizes.iter().min().copied().unwrap_or(0),
                sizes.iter().max().copied().unwrap_or(0),
                self.max_tokens
            );
        }

        batches
    }

    fn close(&self, index: usize, fragments: FragmentSet, estimated_tokens: usize) -> Batch {
        debug!(
            "Closing batch {} with {} fragments, ~{} tokens",
            index + 1,
            fragments.len(),
            estimated_tokens
        );
        Batch {
            id: format!("batch_{}", index + 1),
            fragments,
            estimated_tokens,
        }
    }
}

/// Partition with no per-item overhead.
pub fn partition(fragments: &FragmentSet, max_tokens: usize, prompt_overhead: usize) -> Vec<Batch> {
    Partitioner::new(max_tokens, prompt_overhead).partition(fragments)
}

/// Split `fragments` into fixed-size chunks labelled `{prefix}{n}`, keeping
/// their order. Used for recovery sub-batches and the final sweep.
pub fn chunk(fragments: &FragmentSet, size: usize, prefix: &str) -> Vec<Batch> {
    let size = size.max(1);
    let items: Vec<(&String, &String)> = fragments.iter().collect();
    items
        .chunks(size)
        .enumerate()
        .map(|(i, part)| {
            let fragments: FragmentSet = part
                .iter()
                .map(|(id, text)| ((*id).clone(), (*text).clone()))
                .collect();
            let estimated_tokens = fragments.values().map(|t| estimate(t)).sum();
            Batch {
                id: format!("{prefix}{}", i + 1),
                fragments,
                estimated_tokens,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn set(pairs: &[(&str, &str)]) -> FragmentSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn numbered(n: usize, text_len: usize) -> FragmentSet {
        (0..n)
            .map(|i| (format!("f{i}"), "x".repeat(text_len + i % 7)))
            .collect()
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        assert!(partition(&FragmentSet::new(), 100, 10).is_empty());
    }

    #[test]
    fn test_every_fragment_in_exactly_one_batch() {
        let fragments = numbered(57, 40);
        let batches = partition(&fragments, 60, 5);

        let mut seen = HashSet::new();
        for batch in &batches {
            assert!(!batch.is_empty());
            for id in batch.fragments.keys() {
                assert!(seen.insert(id.clone()), "{id} appears twice");
            }
        }
        let expected: HashSet<String> = fragments.keys().cloned().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_batches_respect_ceiling() {
        let fragments = numbered(40, 30);
        let max = 50;
        let overhead = 8;
        for batch in partition(&fragments, max, overhead) {
            let sum: usize = batch.fragments.values().map(|t| estimate(t)).sum();
            assert!(sum + overhead <= max, "{} over budget", batch.id);
        }
    }

    #[test]
    fn test_oversized_fragment_is_isolated() {
        let fragments = set(&[
            ("small_a", "tiny"),
            ("huge", &"y".repeat(400)),
            ("small_b", "also tiny"),
        ]);
        let batches = partition(&fragments, 20, 5);

        let huge = batches
            .iter()
            .find(|b| b.fragments.contains_key("huge"))
            .unwrap();
        assert_eq!(huge.len(), 1);
        assert_eq!(batches.iter().map(Batch::len).sum::<usize>(), 3);
    }

    #[test]
    fn test_longest_first() {
        let fragments = set(&[("short", "ab"), ("long", &"z".repeat(80)), ("mid", &"m".repeat(20))]);
        let batches = partition(&fragments, 10_000, 0);
        assert_eq!(batches.len(), 1);
        let order: Vec<&str> = batches[0].fragments.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["long", "mid", "short"]);
    }

    #[test]
    fn test_order_follows_packed_cost() {
        // The long key outweighs the longer text
        let long_key = "k".repeat(40);
        let fragments = set(&[("a", &"z".repeat(12)), (long_key.as_str(), "zz")]);
        let batches = partition(&fragments, 10_000, 0);
        let order: Vec<&str> = batches[0].fragments.keys().map(String::as_str).collect();
        assert_eq!(order, vec![long_key.as_str(), "a"]);
    }

    #[test]
    fn test_item_overhead_shrinks_batches() {
        let fragments = numbered(30, 8);
        let plain = Partitioner::new(40, 0).partition(&fragments);
        let padded = Partitioner::new(40, 0).with_item_overhead(10).partition(&fragments);
        assert!(padded.len() > plain.len());
    }

    #[test]
    fn test_batch_ids_are_sequential() {
        let batches = partition(&numbered(20, 40), 30, 0);
        for (i, batch) in batches.iter().enumerate() {
            assert_eq!(batch.id, format!("batch_{}", i + 1));
        }
    }

    #[test]
    fn test_chunk_sizes() {
        let fragments = numbered(20, 3);
        let chunks = chunk(&fragments, 5, "batch_1_sub_");
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() == 5));
        assert_eq!(chunks[3].id, "batch_1_sub_4");

        let chunks = chunk(&fragments, 6, "final_");
        assert_eq!(chunks.iter().map(Batch::len).collect::<Vec<_>>(), vec![6, 6, 6, 2]);
    }
}
