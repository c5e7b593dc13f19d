//! Composite ranking
//!
//! Combined score = relevance × credibility × recency × diversity. The
//! adjustments below are applied once per fetched result, before sorting:
//! - snippet shorter than 50 chars: relevance × 0.7
//! - high-trust provider: credibility × 1.1
//! - newer than 30 days: recency × 1.2

use crate::sources::SourceResult;
use chrono::{DateTime, Duration, Utc};

const SHORT_SNIPPET_CHARS: usize = 50;
const SHORT_SNIPPET_PENALTY: f64 = 0.7;
const HIGH_TRUST_BOOST: f64 = 1.1;
const FRESH_DAYS: i64 = 30;
const FRESH_BOOST: f64 = 1.2;

#[derive(Debug, Clone)]
pub struct Ranker {
    high_trust_providers: Vec<String>,
}

impl Ranker {
    pub fn new(high_trust_providers: Vec<String>) -> Self {
        Self {
            high_trust_providers,
        }
    }

    pub fn is_high_trust(&self, provider: &str) -> bool {
        self.high_trust_providers
            .iter()
            .any(|p| p.eq_ignore_ascii_case(provider))
    }

    /// Copy of `result` with the ranking adjustments folded into its scores
    pub fn adjust(&self, result: &SourceResult, now: DateTime<Utc>) -> SourceResult {
        let mut adjusted = result.clone();

        if result.snippet.chars().count() < SHORT_SNIPPET_CHARS {
            adjusted.relevance_score *= SHORT_SNIPPET_PENALTY;
        }
        if self.is_high_trust(&result.provider) {
            adjusted.credibility_score *= HIGH_TRUST_BOOST;
        }
        if let Some(ts) = result.timestamp {
            if now - ts < Duration::days(FRESH_DAYS) {
                adjusted.recency_score *= FRESH_BOOST;
            }
        }

        adjusted
    }

    /// Adjust every result and sort by combined score
    pub fn rank(&self, results: &[SourceResult], now: DateTime<Utc>) -> Vec<SourceResult> {
        let mut adjusted: Vec<SourceResult> = results.iter().map(|r| self.adjust(r, now)).collect();
        sort_by_combined_score(&mut adjusted);
        adjusted
    }
}

/// Descending stable sort; ties keep their input order and a NaN score
/// sorts last
pub fn sort_by_combined_score(results: &mut [SourceResult]) {
    results.sort_by(|a, b| sort_key(b).total_cmp(&sort_key(a)));
}

fn sort_key(result: &SourceResult) -> f64 {
    let score = result.combined_score();
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}
