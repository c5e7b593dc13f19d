use crate::ranking::sort_by_combined_score;
use crate::rate_limiter::LimiterStatus;
use crate::sources::SourceResult;
use answerforge_common::resilience::CircuitState;
use serde::{Deserialize, Serialize};

/// Outcome of one federated search call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResults {
    /// Deduplicated results, best first
    pub results: Vec<SourceResult>,
    pub total_sources: usize,
    pub successful_sources: usize,
    pub failed_sources: usize,
    pub query_time_ms: f64,
    /// Share of fetched results dropped as duplicates
    pub deduplication_ratio: f64,
    /// Sources that failed, were throttled or missed the deadline
    #[serde(default)]
    pub failed_source_names: Vec<String>,
}

impl AggregatedResults {
    pub fn empty(total_sources: usize) -> Self {
        Self {
            results: Vec::new(),
            total_sources,
            successful_sources: 0,
            failed_sources: total_sources,
            query_time_ms: 0.0,
            deduplication_ratio: 0.0,
            failed_source_names: Vec::new(),
        }
    }

    /// The `k` best results by combined score
    pub fn top_k(&self, k: usize) -> Vec<SourceResult> {
        let mut sorted = self.results.clone();
        sort_by_combined_score(&mut sorted);
        sorted.truncate(k);
        sorted
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Distinct providers present in the results, in rank order
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = Vec::new();
        for result in &self.results {
            if !providers.contains(&result.provider) {
                providers.push(result.provider.clone());
            }
        }
        providers
    }
}

/// Health of one registered source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    #[serde(flatten)]
    pub limiter: LimiterStatus,
    pub circuit_state: CircuitState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_orders_by_combined_score() {
        let mut low = SourceResult::new("low", "https://a.example", "", "a");
        low.relevance_score = 0.2;
        let mut high = SourceResult::new("high", "https://b.example", "", "b");
        high.relevance_score = 0.9;

        let aggregated = AggregatedResults {
            results: vec![low, high],
            ..AggregatedResults::empty(2)
        };

        let top = aggregated.top_k(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].title, "high");
        assert_eq!(aggregated.providers(), vec!["a", "b"]);
    }
}
