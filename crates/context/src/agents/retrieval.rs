//! Retrieval stage: federated search, or for scatter-gather queries one
//! federated pass over every sub-query, merged into a single result set

use super::{Agent, StageOutput};
use crate::models::{PipelineResults, QueryContext, StageName};
use crate::query::ExecutionPattern;
use answerforge_common::errors::{AppError, Result};
use answerforge_search::{AggregatedResults, RetrievalAggregator, SourceResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutput {
    pub documents: Vec<SourceResult>,
    pub entities: Vec<String>,
    pub sub_queries: Vec<String>,
    pub total_sources: usize,
    pub successful_sources: usize,
    pub failed_source_names: Vec<String>,
    pub deduplication_ratio: f64,
    pub confidence: f64,
}

pub struct RetrievalAgent {
    aggregator: Arc<RetrievalAggregator>,
    max_documents: usize,
}

impl RetrievalAgent {
    pub fn new(aggregator: Arc<RetrievalAggregator>, max_documents: usize) -> Self {
        Self {
            aggregator,
            max_documents: max_documents.max(1),
        }
    }

    /// Mean quality of the top documents, scaled by source availability
    fn confidence(aggregated: &AggregatedResults) -> f64 {
        if aggregated.results.is_empty() || aggregated.total_sources == 0 {
            return 0.1;
        }
        let top: Vec<&SourceResult> = aggregated.results.iter().take(3).collect();
        let quality = top
            .iter()
            .map(|r| (r.relevance_score * r.credibility_score).min(1.0))
            .sum::<f64>()
            / top.len() as f64;
        let availability = aggregated.successful_sources as f64 / aggregated.total_sources as f64;
        quality * (0.5 + 0.5 * availability)
    }
}

#[async_trait::async_trait]
impl Agent for RetrievalAgent {
    fn stage(&self) -> StageName {
        StageName::Retrieval
    }

    async fn execute(&self, ctx: &QueryContext, _prior: &PipelineResults) -> Result<StageOutput> {
        let analysis = &ctx.analysis;
        let sub_queries: Vec<String> = analysis.sub_queries.iter().map(|s| s.query.clone()).collect();

        let aggregated = if ctx.pattern() == ExecutionPattern::ScatterGather && sub_queries.len() > 1 {
            debug!(trace_id = %ctx.trace_id, count = sub_queries.len(), "Scatter-gather retrieval");
            self.aggregator
                .search_many(&sub_queries, self.max_documents, true)
                .await?
        } else {
            self.aggregator.search(&ctx.query, self.max_documents, true).await?
        };

        if aggregated.successful_sources == 0 {
            return Err(AppError::Stage {
                stage: StageName::Retrieval.to_string(),
                message: format!(
                    "no knowledge source responded (failed: {})",
                    aggregated.failed_source_names.join(", ")
                ),
            });
        }

        let confidence = Self::confidence(&aggregated);
        Ok(StageOutput::Retrieval(RetrievalOutput {
            documents: aggregated.results,
            entities: analysis.entities.iter().map(|e| e.text.clone()).collect(),
            sub_queries: if ctx.pattern() == ExecutionPattern::ScatterGather {
                sub_queries
            } else {
                Vec::new()
            },
            total_sources: aggregated.total_sources,
            successful_sources: aggregated.successful_sources,
            failed_source_names: aggregated.failed_source_names,
            deduplication_ratio: aggregated.deduplication_ratio,
            confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::TokenBudgetController;
    use crate::query::QueryAnalyzer;
    use answerforge_common::config::AppConfig;
    use answerforge_common::Resilience;
    use answerforge_search::{MockSource, SourceFetcher};
    use serde_json::Map;

    const RESEARCH_QUERY: &str = "Survey of recent research on garbage collection in ML runtimes";

    fn context(query: &str) -> QueryContext {
        let config = AppConfig::default();
        QueryContext {
            query: query.to_string(),
            user_context: Map::new(),
            trace_id: "trace-ret".to_string(),
            analysis: QueryAnalyzer::default().analyze(query),
            budget: TokenBudgetController::new(config.budget).allocate(query).unwrap(),
        }
    }

    fn agent(sources: Vec<Arc<dyn SourceFetcher>>) -> RetrievalAgent {
        let config = AppConfig::default();
        let resilience = Arc::new(Resilience::new(&config.resilience));
        let aggregator = RetrievalAggregator::new(&config, sources, resilience);
        RetrievalAgent::new(Arc::new(aggregator), 10)
    }

    fn retrieval(output: StageOutput) -> RetrievalOutput {
        match output {
            StageOutput::Retrieval(o) => o,
            other => panic!("unexpected output for {}", other.stage()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_research_query_merges_every_sub_query() {
        let source = Arc::new(MockSource::echo("alpha"));
        let agent = agent(vec![source.clone() as Arc<dyn SourceFetcher>]);
        let ctx = context(RESEARCH_QUERY);
        assert_eq!(ctx.pattern(), ExecutionPattern::ScatterGather);

        let output = retrieval(agent.execute(&ctx, &PipelineResults::new()).await.unwrap());

        assert_eq!(source.calls(), 3);
        assert_eq!(output.sub_queries.len(), 3);
        for sub_query in &output.sub_queries {
            assert!(
                output.documents.iter().any(|d| d.snippet.starts_with(sub_query.as_str())),
                "no document for sub-query {sub_query}"
            );
        }
        assert_eq!(output.total_sources, 1);
        assert_eq!(output.successful_sources, 1);
        assert!(output.confidence > 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sub_query_keeps_the_others() {
        let alpha = Arc::new(MockSource::failing_on("alpha", "machine learning", 503));
        let beta = Arc::new(MockSource::echo("beta"));
        let agent = agent(vec![alpha.clone() as Arc<dyn SourceFetcher>, beta.clone()]);

        let output = retrieval(
            agent
                .execute(&context(RESEARCH_QUERY), &PipelineResults::new())
                .await
                .unwrap(),
        );

        assert_eq!(alpha.calls(), 3);
        assert_eq!(output.successful_sources, 2);
        assert!(output.failed_source_names.is_empty());
        assert!(output
            .documents
            .iter()
            .filter(|d| d.provider == "alpha")
            .all(|d| !d.snippet.contains("machine learning")));
        assert!(output.documents.iter().any(|d| d.provider == "alpha"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_source_answering_is_a_stage_error() {
        let agent = agent(vec![
            Arc::new(MockSource::failing("alpha", 503)) as Arc<dyn SourceFetcher>,
            Arc::new(MockSource::failing("beta", 500)),
        ]);

        let result = agent
            .execute(&context(RESEARCH_QUERY), &PipelineResults::new())
            .await;

        match result {
            Err(AppError::Stage { stage, message }) => {
                assert_eq!(stage, "retrieval");
                assert!(message.contains("alpha") && message.contains("beta"));
            }
            other => panic!("expected a stage error, got {:?}", other.map(|o| o.stage())),
        }
    }

    #[tokio::test]
    async fn test_plain_query_is_one_search() {
        let source = Arc::new(MockSource::echo("alpha"));
        let agent = agent(vec![source.clone() as Arc<dyn SourceFetcher>]);

        let output = retrieval(
            agent
                .execute(&context("what is rust ownership"), &PipelineResults::new())
                .await
                .unwrap(),
        );

        assert_eq!(source.calls(), 1);
        assert!(output.sub_queries.is_empty());
        assert_eq!(output.documents.len(), 3);
    }
}
