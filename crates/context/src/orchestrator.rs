//! Pipeline orchestrator
//!
//! Runs one query through setup (validation, analysis, cache lookup, budget),
//! the four stages under per-stage timeouts, and response aggregation.
//! A failing stage never aborts the pipeline: it is recorded as a failed or
//! timed-out [`AgentResult`], and stages that depend on it are skipped.
//!
//! Dependency edges: FactCheck needs Retrieval, Citation needs Synthesis.
//! Synthesis always runs. For fork-join queries with two compared subjects,
//! FactCheck gathers its own evidence and runs concurrently with Retrieval.

use crate::agents::{
    Agent, CitationAgent, FactCheckAgent, LanguageModel, OpenAiChatModel, RetrievalAgent,
    SynthesisAgent,
};
use crate::budget::TokenBudgetController;
use crate::models::{
    AgentResult, FinalResult, PipelineResults, QueryContext, QueryRequest, ResultMetadata,
    StageName,
};
use crate::query::{ExecutionPattern, QueryAnalyzer};
use crate::response::ResponseAggregator;
use crate::semantic_cache::SemanticCache;
use answerforge_common::config::{AppConfig, PipelineConfig};
use answerforge_common::errors::{AppError, Result};
use answerforge_common::metrics;
use answerforge_common::resilience::{sanitize, ErrorContext};
use answerforge_common::{CacheStats, OperationType, Resilience};
use answerforge_search::RetrievalAggregator;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

/// The agent behind each stage
pub struct StageAgents {
    pub retrieval: Arc<dyn Agent>,
    pub fact_check: Arc<dyn Agent>,
    pub synthesis: Arc<dyn Agent>,
    pub citation: Arc<dyn Agent>,
}

impl StageAgents {
    /// Default agents over a shared aggregator
    pub fn standard(
        config: &AppConfig,
        aggregator: Arc<RetrievalAggregator>,
        model: Option<Arc<dyn LanguageModel>>,
        resilience: Arc<Resilience>,
    ) -> Self {
        Self {
            retrieval: Arc::new(RetrievalAgent::new(
                aggregator.clone(),
                config.pipeline.max_documents,
            )),
            fact_check: Arc::new(FactCheckAgent::new(aggregator)),
            synthesis: Arc::new(SynthesisAgent::new(config, model, resilience)),
            citation: Arc::new(CitationAgent::new()),
        }
    }
}

enum Setup {
    Cached(FinalResult),
    Ready(QueryContext),
}

pub struct PipelineOrchestrator {
    agents: StageAgents,
    analyzer: QueryAnalyzer,
    budget: TokenBudgetController,
    cache: SemanticCache,
    response: ResponseAggregator,
    resilience: Arc<Resilience>,
    timeouts: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(config: &AppConfig, agents: StageAgents, resilience: Arc<Resilience>) -> Self {
        Self {
            agents,
            analyzer: QueryAnalyzer::default(),
            budget: TokenBudgetController::new(config.budget.clone()),
            cache: SemanticCache::new(config),
            response: ResponseAggregator::new(),
            resilience,
            timeouts: config.pipeline.clone(),
        }
    }

    /// Orchestrator with the configured knowledge sources and language model
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let resilience = Resilience::shared(&config.resilience);
        let aggregator = Arc::new(RetrievalAggregator::from_config(config, resilience.clone())?);
        Self::with_aggregator(config, aggregator, resilience)
    }

    /// Orchestrator over an existing aggregator; the language model still
    /// comes from configuration
    pub fn with_aggregator(
        config: &AppConfig,
        aggregator: Arc<RetrievalAggregator>,
        resilience: Arc<Resilience>,
    ) -> Result<Self> {
        let model = OpenAiChatModel::from_config(&config.llm)?
            .map(|m| Arc::new(m) as Arc<dyn LanguageModel>);
        if model.is_none() {
            info!("No language model configured, synthesis will be extractive");
        }
        let agents = StageAgents::standard(config, aggregator, model, resilience.clone());
        Ok(Self::new(config, agents, resilience))
    }

    pub fn resilience(&self) -> &Arc<Resilience> {
        &self.resilience
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Answer one query; failures are reported inside the result
    pub async fn process_query(&self, query: &str, user_context: Map<String, Value>) -> FinalResult {
        let trace_id = Uuid::new_v4().to_string();
        let span = info_span!("query", trace_id = %trace_id);
        self.process(query, user_context, trace_id).instrument(span).await
    }

    async fn process(
        &self,
        query: &str,
        user_context: Map<String, Value>,
        trace_id: String,
    ) -> FinalResult {
        let started = Instant::now();

        let ctx = match self.setup(query, user_context, &trace_id).await {
            Ok(Setup::Ready(ctx)) => ctx,
            Ok(Setup::Cached(hit)) => {
                info!(trace_id = %trace_id, "Answer served from cache");
                let pattern = hit
                    .metadata
                    .pattern
                    .map(|p| p.as_str())
                    .unwrap_or(ExecutionPattern::Sequential.as_str());
                metrics::record_query(pattern, hit.success, true);
                return hit;
            }
            Err(err) => {
                let ctx = ErrorContext::new("pipeline", "setup").with_request_id(trace_id.clone());
                let kind = match err {
                    AppError::CacheError { .. } => OperationType::Database,
                    _ => OperationType::Api,
                };
                let response = self.resilience.handle(kind, &err, &ctx);
                let mut metadata = ResultMetadata::empty(trace_id);
                metadata.total_time_ms = started.elapsed().as_millis() as u64;
                metrics::record_query("none", false, false);
                return FinalResult::setup_failure(response, metadata);
            }
        };

        info!(
            trace_id = %ctx.trace_id,
            pattern = ctx.pattern().as_str(),
            intent = ?ctx.analysis.intent,
            budget_tokens = ctx.budget.total_tokens,
            "Query accepted"
        );

        let results = self.run_stages(&ctx).await;
        let total_time_ms = started.elapsed().as_millis() as u64;
        let result = self.response.aggregate(&ctx, &results, total_time_ms);

        if result.success {
            let mut stored = result.clone();
            stored.metadata.cached = true;
            if let Err(e) = self.cache.set(query, &stored).await {
                warn!(trace_id = %ctx.trace_id, error = %e, "Failed to cache answer");
            }
        }

        metrics::record_query(ctx.pattern().as_str(), result.success, false);
        info!(
            trace_id = %ctx.trace_id,
            success = result.success,
            confidence = result.confidence,
            warnings = result.warnings.len(),
            elapsed_ms = total_time_ms,
            "Query completed"
        );
        result
    }

    async fn setup(
        &self,
        query: &str,
        user_context: Map<String, Value>,
        trace_id: &str,
    ) -> Result<Setup> {
        let request = QueryRequest {
            query: query.to_string(),
            user_context,
        };
        request.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: Some("query".to_string()),
        })?;
        if request.query.trim().is_empty() {
            return Err(AppError::Validation {
                message: "query must not be blank".to_string(),
                field: Some("query".to_string()),
            });
        }

        let analysis = self.analyzer.analyze(&request.query);

        if let Some(hit) = self.cache.get(&request.query).await? {
            return Ok(Setup::Cached(hit));
        }

        let budget = self.budget.allocate(&request.query)?;

        Ok(Setup::Ready(QueryContext {
            query: request.query,
            user_context: request.user_context,
            trace_id: trace_id.to_string(),
            analysis,
            budget,
        }))
    }

    async fn run_stages(&self, ctx: &QueryContext) -> PipelineResults {
        let mut results = PipelineResults::new();

        if ctx.fact_check_is_independent() {
            let upstream = PipelineResults::new();
            let (retrieval, fact_check) = tokio::join!(
                self.run_stage(self.agents.retrieval.as_ref(), ctx, &upstream),
                self.run_stage(self.agents.fact_check.as_ref(), ctx, &upstream),
            );
            results.insert(StageName::Retrieval, retrieval);
            results.insert(StageName::FactCheck, fact_check);
        } else {
            let retrieval = self.run_stage(self.agents.retrieval.as_ref(), ctx, &results).await;
            results.insert(StageName::Retrieval, retrieval);

            let fact_check = if results.succeeded(StageName::Retrieval) {
                self.run_stage(self.agents.fact_check.as_ref(), ctx, &results).await
            } else {
                skip(ctx, StageName::FactCheck, "retrieval did not succeed")
            };
            results.insert(StageName::FactCheck, fact_check);
        }

        let synthesis = self.run_stage(self.agents.synthesis.as_ref(), ctx, &results).await;
        results.insert(StageName::Synthesis, synthesis);

        let citation = if results.succeeded(StageName::Synthesis) {
            self.run_stage(self.agents.citation.as_ref(), ctx, &results).await
        } else {
            skip(ctx, StageName::Citation, "synthesis did not succeed")
        };
        results.insert(StageName::Citation, citation);

        results
    }

    fn timeout_for(&self, stage: StageName) -> Duration {
        match stage {
            StageName::Retrieval => self.timeouts.retrieval_timeout(),
            StageName::FactCheck => self.timeouts.fact_check_timeout(),
            StageName::Synthesis => self.timeouts.synthesis_timeout(),
            StageName::Citation => self.timeouts.citation_timeout(),
        }
    }

    async fn run_stage(
        &self,
        agent: &dyn Agent,
        ctx: &QueryContext,
        prior: &PipelineResults,
    ) -> AgentResult {
        let stage = agent.stage();
        let timeout = self.timeout_for(stage);
        let started = Instant::now();
        info!(trace_id = %ctx.trace_id, stage = stage.as_str(), "Stage started");

        let outcome = tokio::time::timeout(timeout, agent.execute(ctx, prior)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(output)) => AgentResult::from_output(&output, elapsed_ms),
            Ok(Err(e)) => {
                warn!(
                    trace_id = %ctx.trace_id,
                    stage = stage.as_str(),
                    error = %sanitize(&e.to_string()),
                    "Stage failed"
                );
                AgentResult::failed(sanitize(&e.to_string()), elapsed_ms)
            }
            Err(_) => {
                warn!(
                    trace_id = %ctx.trace_id,
                    stage = stage.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Stage timed out"
                );
                AgentResult::timed_out(timeout.as_millis() as u64, elapsed_ms)
            }
        };

        metrics::record_stage(stage.as_str(), result.status.as_str(), started.elapsed().as_secs_f64());
        info!(
            trace_id = %ctx.trace_id,
            stage = stage.as_str(),
            status = result.status.as_str(),
            confidence = result.confidence,
            elapsed_ms,
            "Stage finished"
        );
        result
    }
}

fn skip(ctx: &QueryContext, stage: StageName, reason: &str) -> AgentResult {
    info!(trace_id = %ctx.trace_id, stage = stage.as_str(), reason, "Stage skipped");
    metrics::record_stage(stage.as_str(), "skipped", 0.0);
    AgentResult::skipped(reason)
}
