//! Near-duplicate removal
//!
//! Two results are duplicates when their content hashes match or when the
//! token sets of their normalized titles have Jaccard similarity above
//! [`TITLE_SIMILARITY_THRESHOLD`]. The first-seen result is kept.

use crate::sources::SourceResult;
use std::collections::{BTreeSet, HashSet};

pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Jaccard similarity of two token sets; empty sets never match
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn title_tokens(result: &SourceResult) -> BTreeSet<String> {
    result
        .normalized_title()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Outcome of one dedup pass
#[derive(Debug, Clone)]
pub struct Deduplicated {
    pub results: Vec<SourceResult>,
    pub removed: usize,
}

impl Deduplicated {
    /// Share of the input that was dropped as duplicate
    pub fn ratio(&self) -> f64 {
        let total = self.results.len() + self.removed;
        if total == 0 {
            0.0
        } else {
            self.removed as f64 / total as f64
        }
    }
}

pub fn deduplicate(results: Vec<SourceResult>) -> Deduplicated {
    let mut seen_hashes: HashSet<String> = HashSet::new();
    let mut kept_titles: Vec<BTreeSet<String>> = Vec::new();
    let mut kept = Vec::with_capacity(results.len());
    let mut removed = 0;

    for result in results {
        if !seen_hashes.insert(result.content_hash()) {
            removed += 1;
            continue;
        }

        let tokens = title_tokens(&result);
        if kept_titles
            .iter()
            .any(|existing| jaccard(existing, &tokens) > TITLE_SIMILARITY_THRESHOLD)
        {
            removed += 1;
            continue;
        }

        kept_titles.push(tokens);
        kept.push(result);
    }

    Deduplicated {
        results: kept,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, snippet: &str, provider: &str) -> SourceResult {
        SourceResult::new(title, format!("https://{}.example/{}", provider, title.len()), snippet, provider)
    }

    #[test]
    fn test_identical_hash_kept_once() {
        let a = result("Rust ownership", "Ownership rules explained", "wikipedia");
        let deduped = deduplicate(vec![a.clone(), a]);
        assert_eq!(deduped.results.len(), 1);
        assert_eq!(deduped.removed, 1);
        assert_eq!(deduped.ratio(), 0.5);
    }

    #[test]
    fn test_similar_titles_first_seen_wins() {
        let first = result(
            "The Rust programming language ownership and borrowing guide",
            "first",
            "wikipedia",
        );
        let second = result(
            "Rust programming language ownership and borrowing guide",
            "second",
            "stackexchange",
        );
        let deduped = deduplicate(vec![first, second]);
        assert_eq!(deduped.results.len(), 1);
        assert_eq!(deduped.results[0].provider, "wikipedia");
    }

    #[test]
    fn test_distinct_titles_survive() {
        let deduped = deduplicate(vec![
            result("Rust ownership", "a", "wikipedia"),
            result("Go garbage collector", "b", "hackernews"),
            result("", "c", "openalex"),
            result("", "d", "openalex"),
        ]);
        assert_eq!(deduped.results.len(), 4);
        assert_eq!(deduped.ratio(), 0.0);
    }

    #[test]
    fn test_jaccard() {
        let a: BTreeSet<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["a", "b", "c", "e"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 0.6).abs() < 1e-9);
        assert_eq!(jaccard(&a, &a), 1.0);
    }
}
