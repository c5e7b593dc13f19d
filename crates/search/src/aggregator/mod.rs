//! Retrieval aggregator
//!
//! Fans a query, or a batch of related queries, out to every registered
//! source in parallel, each gated by its own rate limiter and guarded by the
//! resilience layer, under a global deadline. Results are merged in
//! registration order, deduplicated, ranked and cached.

mod results;

pub use results::{AggregatedResults, SourceStatus};

use crate::dedup::deduplicate;
use crate::ranking::Ranker;
use crate::rate_limiter::SourceRateLimiter;
use crate::sources::{build_sources, SourceFetcher, SourceResult};
use answerforge_common::cache::{keys, CacheSettings};
use answerforge_common::config::AppConfig;
use answerforge_common::errors::{AppError, Result};
use answerforge_common::metrics;
use answerforge_common::resilience::{
    classify_base, CriticalOperationError, ErrorCategory, OperationType, Resilience, RetryPolicy,
};
use answerforge_common::{CacheStats, TtlCache};
use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Retries per source fetch; the global deadline bounds the rest
const MAX_FETCH_RETRIES: u32 = 1;

struct RegisteredSource {
    fetcher: Arc<dyn SourceFetcher>,
    limiter: Arc<SourceRateLimiter>,
}

type FetchOutcome = (usize, std::result::Result<Vec<SourceResult>, CriticalOperationError>);

pub struct RetrievalAggregator {
    sources: Vec<RegisteredSource>,
    resilience: Arc<Resilience>,
    cache: TtlCache,
    ranker: Ranker,
    deadline: Duration,
    fetch_policy: RetryPolicy,
    default_max_results: usize,
}

impl RetrievalAggregator {
    /// Aggregator over the given fetchers
    pub fn new(
        config: &AppConfig,
        fetchers: Vec<Arc<dyn SourceFetcher>>,
        resilience: Arc<Resilience>,
    ) -> Self {
        let sources = fetchers
            .into_iter()
            .map(|fetcher| {
                let limiter = SourceRateLimiter::new(fetcher.name(), config.rate_limit_for(fetcher.name()));
                RegisteredSource {
                    fetcher,
                    limiter: Arc::new(limiter),
                }
            })
            .collect();

        let deadline = config.aggregator.deadline();
        let base = RetryPolicy::from_config(&config.resilience);
        let fetch_policy = RetryPolicy {
            max_retries: base.max_retries.min(MAX_FETCH_RETRIES),
            timeout: base.timeout.min(deadline),
            ..base
        };

        Self {
            sources,
            resilience,
            cache: TtlCache::new(CacheSettings::from_config(
                &config.cache,
                "search",
                config.aggregator.cache_ttl_secs,
            )),
            ranker: Ranker::new(config.aggregator.high_trust_providers.clone()),
            deadline,
            fetch_policy,
            default_max_results: config.aggregator.default_max_results,
        }
    }

    /// Aggregator over the HTTP fetchers enabled in config
    pub fn from_config(config: &AppConfig, resilience: Arc<Resilience>) -> Result<Self> {
        let fetchers = build_sources(&config.sources)?;
        Ok(Self::new(config, fetchers, resilience))
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.fetcher.name().to_string())
            .collect()
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    pub fn default_max_results(&self) -> usize {
        self.default_max_results
    }

    /// Federated search across every registered source
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        use_cache: bool,
    ) -> Result<AggregatedResults> {
        self.search_many(&[query.to_string()], max_results, use_cache)
            .await
    }

    /// Federated search for several related queries at once.
    ///
    /// Each source is admitted by its limiter once and fetches every query
    /// inside a single guarded operation, so one user request moves limiter
    /// and circuit state by one step per source. A source succeeds when any
    /// of its queries does. Each fetch asks for `max_results` items.
    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn search_many(
        &self,
        queries: &[String],
        max_results: usize,
        use_cache: bool,
    ) -> Result<AggregatedResults> {
        let queries: Arc<[String]> = queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();
        if queries.is_empty() {
            return Err(AppError::validation("Search query must not be empty"));
        }
        if max_results == 0 {
            return Err(AppError::Validation {
                message: "max_results must be at least 1".to_string(),
                field: Some("max_results".to_string()),
            });
        }

        let key_parts: Vec<&str> = queries.iter().map(String::as_str).collect();
        let cache_key = keys::search_batch(&key_parts, max_results);
        if use_cache {
            match self.cache.get::<AggregatedResults>(&cache_key).await {
                Ok(Some(cached)) => {
                    debug!("Serving federated search from cache");
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Search cache read failed, fetching live"),
            }
        }

        let started = Instant::now();
        let mut outcomes: Vec<Option<Vec<SourceResult>>> = vec![None; self.sources.len()];
        let mut failed_names: Vec<String> = Vec::new();
        let mut set: JoinSet<FetchOutcome> = JoinSet::new();

        for (index, source) in self.sources.iter().enumerate() {
            let name = source.fetcher.name().to_string();
            if let Err(denied) = source.limiter.acquire() {
                let info = classify_base(&denied);
                metrics::record_source_fetch(&name, "throttled", 0);
                metrics::record_error(info.category.as_str(), info.severity.as_str());
                debug!(source = %name, error = %denied, "Source not admitted");
                failed_names.push(name);
                continue;
            }

            let fetcher = source.fetcher.clone();
            let resilience = self.resilience.clone();
            let policy = self.fetch_policy.clone();
            let queries = queries.clone();

            set.spawn(async move {
                let outcome = resilience
                    .operation::<Vec<SourceResult>>(OperationType::Api, &name, "search")
                    .policy(policy)
                    .run(|| {
                        let fetcher = fetcher.clone();
                        let queries = queries.clone();
                        async move { fetch_queries(fetcher.as_ref(), &queries, max_results).await }
                    })
                    .await;
                (index, outcome)
            });
        }

        let deadline = started + self.deadline;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => self.record_outcome(index, outcome, &mut outcomes),
                Ok(Some(Err(join_err))) => {
                    warn!(error = %join_err, "Source fetch task failed to complete");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        deadline_ms = self.deadline.as_millis() as u64,
                        pending = set.len(),
                        "Aggregation deadline reached, abandoning pending sources"
                    );
                    set.abort_all();
                    break;
                }
            }
        }

        let mut fetched = Vec::new();
        let mut successful_sources = 0;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let name = self.sources[index].fetcher.name();
            match outcome {
                Some(results) => {
                    successful_sources += 1;
                    fetched.extend(results);
                }
                None if !failed_names.iter().any(|n| n == name) => {
                    failed_names.push(name.to_string());
                }
                None => {}
            }
        }

        let deduped = deduplicate(fetched);
        let deduplication_ratio = deduped.ratio();
        let mut ranked = self.ranker.rank(&deduped.results, Utc::now());
        ranked.truncate(max_results);

        let total_sources = self.sources.len();
        let aggregated = AggregatedResults {
            results: ranked,
            total_sources,
            successful_sources,
            failed_sources: total_sources - successful_sources,
            query_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            deduplication_ratio,
            failed_source_names: failed_names,
        };

        info!(
            results = aggregated.results.len(),
            successful = aggregated.successful_sources,
            failed = aggregated.failed_sources,
            elapsed_ms = aggregated.query_time_ms,
            "Federated search complete"
        );

        if use_cache && aggregated.successful_sources > 0 {
            if let Err(e) = self.cache.set(&cache_key, &aggregated).await {
                warn!(error = %e, "Failed to cache search results");
            }
        }

        Ok(aggregated)
    }

    fn record_outcome(
        &self,
        index: usize,
        outcome: std::result::Result<Vec<SourceResult>, CriticalOperationError>,
        outcomes: &mut [Option<Vec<SourceResult>>],
    ) {
        let source = &self.sources[index];
        let name = source.fetcher.name();

        match outcome {
            Ok(results) => {
                source.limiter.record_success();
                metrics::record_source_fetch(name, "success", results.len());
                debug!(source = name, count = results.len(), "Source fetch succeeded");
                outcomes[index] = Some(results);
            }
            Err(err) => {
                // An open circuit already blocks the source; do not stack limiter backoff on it
                if err.response.error_type != ErrorCategory::CircuitOpen {
                    source.limiter.record_failure();
                }
                metrics::record_source_fetch(name, "failed", 0);
                warn!(
                    source = name,
                    error_type = err.response.error_type.as_str(),
                    attempts = err.attempts,
                    "Source fetch failed"
                );
            }
        }
    }

    /// Limiter and circuit state per source
    pub fn get_source_status(&self) -> BTreeMap<String, SourceStatus> {
        self.sources
            .iter()
            .map(|source| {
                let name = source.fetcher.name().to_string();
                let status = SourceStatus {
                    limiter: source.limiter.status(),
                    circuit_state: self.resilience.breaker(&name).state(),
                };
                (name, status)
            })
            .collect()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Drop every cached search, returning how many there were
    pub async fn cache_clear(&self) -> usize {
        self.cache.clear().await
    }

    /// Drop expired cached searches, returning how many were removed
    pub async fn cache_prune(&self) -> usize {
        self.cache.prune().await
    }
}

/// Fetch every query from one source; fails only when all of them fail
async fn fetch_queries(
    fetcher: &dyn SourceFetcher,
    queries: &[String],
    limit: usize,
) -> Result<Vec<SourceResult>> {
    if let [query] = queries {
        return fetcher.fetch(query, limit).await;
    }

    let outcomes = join_all(queries.iter().map(|q| fetcher.fetch(q, limit))).await;
    let mut results = Vec::new();
    let mut answered = false;
    let mut first_error = None;
    for (query, outcome) in queries.iter().zip(outcomes) {
        match outcome {
            Ok(batch) => {
                answered = true;
                results.extend(batch);
            }
            Err(e) => {
                debug!(source = fetcher.name(), query = %query, error = %e, "Sub-query fetch failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if !answered => Err(e),
        _ => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockSource;
    use answerforge_common::resilience::CircuitState;

    const LONG: &str = "Ownership is a set of rules that govern how a Rust program manages memory.";

    fn result(title: &str, provider: &str, relevance: f64) -> SourceResult {
        let mut r = SourceResult::new(
            title,
            format!("https://{}.example/{}", provider, title.replace(' ', "_")),
            LONG,
            provider,
        );
        r.relevance_score = relevance;
        r
    }

    fn aggregator(fetchers: Vec<Arc<dyn SourceFetcher>>) -> RetrievalAggregator {
        let config = AppConfig::default();
        let resilience = Arc::new(Resilience::new(&config.resilience));
        RetrievalAggregator::new(&config, fetchers, resilience)
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_still_returns_results() {
        let wikipedia = Arc::new(MockSource::failing("wikipedia", 503));
        let stackexchange = Arc::new(MockSource::with_results(
            "stackexchange",
            vec![result("Understanding ownership", "stackexchange", 0.9)],
        ));
        let hackernews = Arc::new(MockSource::with_results(
            "hackernews",
            vec![result("Ask HN: borrow checker tips", "hackernews", 0.6)],
        ));
        let openalex = Arc::new(MockSource::with_results(
            "openalex",
            vec![result("Ownership types for object encapsulation", "openalex", 0.8)],
        ));

        let aggregator = aggregator(vec![wikipedia.clone(), stackexchange, hackernews, openalex]);
        let aggregated = aggregator
            .search("Wikipedia fails, StackExchange succeeds", 10, false)
            .await
            .unwrap();

        assert_eq!(aggregated.total_sources, 4);
        assert!(aggregated.failed_sources >= 1);
        assert!(aggregated.successful_sources >= 1);
        assert!(!aggregated.results.is_empty());
        assert_eq!(aggregated.failed_source_names, vec!["wikipedia".to_string()]);
        // One retry after the first 503
        assert_eq!(wikipedia.calls(), 2);

        let status = aggregator.get_source_status();
        assert_eq!(status["wikipedia"].limiter.consecutive_failures, 1);
        assert!(!status["wikipedia"].limiter.available);
        assert_eq!(status["stackexchange"].circuit_state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_round_trip_is_identical_and_offline() {
        let source = Arc::new(MockSource::with_results(
            "wikipedia",
            vec![
                result("Rust ownership", "wikipedia", 0.9),
                result("Rust lifetimes", "wikipedia", 0.7),
            ],
        ));
        let aggregator = aggregator(vec![source.clone()]);

        let first = aggregator.search("X", 10, true).await.unwrap();
        let second = aggregator.search("X", 10, true).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        let stats = aggregator.cache_stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(aggregator.cache_clear().await, 1);

        aggregator.search("X", 10, true).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_bypass_and_prune() {
        let source = Arc::new(MockSource::echo("wikipedia"));
        let aggregator = aggregator(vec![source.clone()]);

        aggregator.search("rust", 5, false).await.unwrap();
        aggregator.search("rust", 5, false).await.unwrap();
        assert_eq!(source.calls(), 2);

        aggregator.search("rust", 5, true).await.unwrap();
        tokio::time::advance(Duration::from_secs(3601)).await;
        assert_eq!(aggregator.cache_prune().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_slow_source() {
        let slow = Arc::new(MockSource::slow(
            "openalex",
            Duration::from_secs(60),
            vec![result("Late paper", "openalex", 1.0)],
        ));
        let fast = Arc::new(MockSource::with_results(
            "wikipedia",
            vec![result("Quick article", "wikipedia", 0.5)],
        ));

        let mut config = AppConfig::default();
        config.aggregator.deadline_ms = 2_000;
        config.resilience.operation_timeout_ms = 30_000;
        let resilience = Arc::new(Resilience::new(&config.resilience));
        let aggregator = RetrievalAggregator::new(&config, vec![slow, fast], resilience);

        let aggregated = aggregator.search("ownership", 10, false).await.unwrap();
        assert_eq!(aggregated.successful_sources, 1);
        assert_eq!(aggregated.failed_source_names, vec!["openalex".to_string()]);
        assert_eq!(aggregated.results.len(), 1);
        assert!(aggregated.query_time_ms <= 2_100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_across_sources_collapse() {
        let same = result("Rust ownership explained", "wikipedia", 0.9);
        let mut dup = same.clone();
        dup.provider = "hackernews".into();

        let aggregator = aggregator(vec![
            Arc::new(MockSource::with_results("wikipedia", vec![same])),
            Arc::new(MockSource::with_results("hackernews", vec![dup])),
        ]);

        let aggregated = aggregator.search("ownership", 10, false).await.unwrap();
        assert_eq!(aggregated.results.len(), 1);
        assert_eq!(aggregated.results[0].provider, "wikipedia");
        assert_eq!(aggregated.deduplication_ratio, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_source_counts_as_failed() {
        let source = Arc::new(MockSource::echo("wikipedia"));
        let mut config = AppConfig::default();
        config.sources.rate_limit.max_requests = 1;
        let resilience = Arc::new(Resilience::new(&config.resilience));
        let aggregator = RetrievalAggregator::new(&config, vec![source.clone()], resilience);

        aggregator.search("first", 5, false).await.unwrap();
        let throttled = aggregator.search("second", 5, false).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(throttled.failed_sources, 1);
        assert!(throttled.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_symbol_queries_do_not_share_cache_entries() {
        let source = Arc::new(MockSource::echo("wikipedia"));
        let aggregator = aggregator(vec![source.clone()]);

        let cpp = aggregator.search("what is C++", 5, true).await.unwrap();
        let csharp = aggregator.search("what is C#", 5, true).await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_ne!(cpp.results[0].url, csharp.results[0].url);
        assert!(csharp.results[0].snippet.contains("C#"));

        aggregator.search("What is C++?", 5, true).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_many_moves_source_state_once() {
        let failing = Arc::new(MockSource::failing("wikipedia", 503));
        let healthy = Arc::new(MockSource::echo("stackexchange"));
        let aggregator = aggregator(vec![failing.clone(), healthy.clone()]);
        let queries = vec![
            "rust memory safety".to_string(),
            "memory safety".to_string(),
            "borrow checker".to_string(),
        ];

        let aggregated = aggregator.search_many(&queries, 5, false).await.unwrap();

        // Three queries, first attempt plus one retry
        assert_eq!(failing.calls(), 6);
        assert_eq!(healthy.calls(), 3);
        assert_eq!(aggregated.total_sources, 2);
        assert_eq!(aggregated.successful_sources, 1);
        assert_eq!(aggregated.failed_source_names, vec!["wikipedia".to_string()]);
        assert!(aggregated.results.len() > 3);

        let breaker = aggregator.resilience.breaker("wikipedia");
        assert_eq!(breaker.failure_count(), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
        let status = aggregator.get_source_status();
        assert_eq!(status["wikipedia"].limiter.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_many_tolerates_a_failed_query() {
        let source = Arc::new(MockSource::failing_on("wikipedia", "lifetimes", 503));
        let aggregator = aggregator(vec![source.clone()]);
        let queries = vec!["rust ownership".to_string(), "rust lifetimes".to_string()];

        let aggregated = aggregator.search_many(&queries, 5, false).await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(aggregated.successful_sources, 1);
        assert!(aggregated.failed_source_names.is_empty());
        assert!(aggregated.results.iter().all(|r| r.snippet.contains("ownership")));
        assert_eq!(aggregator.resilience.breaker("wikipedia").failure_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_arguments() {
        let aggregator = aggregator(vec![Arc::new(MockSource::echo("wikipedia"))]);
        tokio_test::assert_err!(aggregator.search("rust", 0, false).await);
        tokio_test::assert_err!(aggregator.search("   ", 5, false).await);
    }
}
