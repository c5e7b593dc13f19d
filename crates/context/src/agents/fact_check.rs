//! Fact-check stage
//!
//! Candidate claims are sentences from evidence snippets that mention the
//! query's keywords. Sentences with enough token overlap are clustered into
//! one claim; a claim is verified when at least two distinct providers
//! support it, or one high-trust provider does.
//!
//! Evidence normally comes from the retrieval stage. For comparison queries
//! running fork-join, the agent searches each compared subject on its own.

use super::retrieval::RetrievalOutput;
use super::{Agent, StageOutput};
use crate::models::{PipelineResults, QueryContext, StageName};
use crate::query::content_words;
use answerforge_common::errors::{AppError, Result};
use answerforge_search::dedup::jaccard;
use answerforge_search::{RetrievalAggregator, SourceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

const MIN_SENTENCE_CHARS: usize = 25;
const CLAIM_SIMILARITY_THRESHOLD: f64 = 0.5;
const DEFAULT_MAX_CLAIMS: usize = 8;
const RESULTS_PER_SUBJECT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub provider: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub verified: bool,
    pub evidence: Vec<Evidence>,
}

impl Claim {
    pub fn providers(&self) -> BTreeSet<&str> {
        self.evidence.iter().map(|e| e.provider.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckOutput {
    pub verified_facts: Vec<Claim>,
    pub unverified_claims: Vec<Claim>,
    /// Documents the claims were drawn from
    pub evidence_documents: Vec<SourceResult>,
    pub subjects: Vec<String>,
    /// Evidence was gathered by this stage rather than taken from retrieval
    pub independent: bool,
    pub confidence: f64,
}

struct Cluster {
    tokens: BTreeSet<String>,
    claim: Claim,
}

pub struct FactCheckAgent {
    aggregator: Arc<RetrievalAggregator>,
    max_claims: usize,
}

impl FactCheckAgent {
    pub fn new(aggregator: Arc<RetrievalAggregator>) -> Self {
        Self {
            aggregator,
            max_claims: DEFAULT_MAX_CLAIMS,
        }
    }

    pub fn with_max_claims(mut self, max_claims: usize) -> Self {
        self.max_claims = max_claims.max(1);
        self
    }

    /// One federated pass over every compared subject
    async fn gather_by_subject(&self, ctx: &QueryContext) -> Result<Vec<SourceResult>> {
        let subjects = &ctx.analysis.comparison_subjects;
        let limit = RESULTS_PER_SUBJECT * subjects.len().max(1);
        let gathered = self.aggregator.search_many(subjects, limit, true).await?;

        if gathered.successful_sources == 0 {
            warn!(
                trace_id = %ctx.trace_id,
                subjects = ?subjects,
                failed = ?gathered.failed_source_names,
                "No source answered for the compared subjects"
            );
        }
        Ok(gathered.results)
    }

    /// Cluster candidate sentences into claims
    fn extract_claims(&self, documents: &[SourceResult], keywords: &BTreeSet<String>) -> Vec<Claim> {
        let high_trust = self.aggregator.ranker();
        let mut clusters: Vec<Cluster> = Vec::new();

        for doc in documents {
            for sentence in sentences(&doc.snippet) {
                let tokens: BTreeSet<String> = content_words(sentence).into_iter().collect();
                if tokens.is_disjoint(keywords) {
                    continue;
                }

                let evidence = Evidence {
                    provider: doc.provider.clone(),
                    title: doc.title.clone(),
                    url: doc.url.clone(),
                };

                match clusters
                    .iter_mut()
                    .find(|c| jaccard(&c.tokens, &tokens) >= CLAIM_SIMILARITY_THRESHOLD)
                {
                    Some(cluster) => {
                        if !cluster.claim.evidence.iter().any(|e| e.url == evidence.url) {
                            cluster.claim.evidence.push(evidence);
                        }
                    }
                    None => clusters.push(Cluster {
                        tokens,
                        claim: Claim {
                            text: sentence.to_string(),
                            verified: false,
                            evidence: vec![evidence],
                        },
                    }),
                }
            }
        }

        let mut claims: Vec<Claim> = clusters
            .into_iter()
            .map(|c| {
                let mut claim = c.claim;
                let verified = {
                    let providers = claim.providers();
                    providers.len() >= 2 || providers.iter().any(|p| high_trust.is_high_trust(p))
                };
                claim.verified = verified;
                claim
            })
            .collect();

        // Best-supported claims first; stable so ties keep document order
        claims.sort_by_key(|c| std::cmp::Reverse(c.providers().len()));
        claims.truncate(self.max_claims);
        claims
    }
}

/// Sentences long enough to carry a claim
fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| s.chars().count() >= MIN_SENTENCE_CHARS)
}

fn query_keywords(ctx: &QueryContext) -> BTreeSet<String> {
    let mut keywords: BTreeSet<String> = ctx
        .analysis
        .keywords
        .iter()
        .flat_map(|k| content_words(k))
        .collect();
    if keywords.is_empty() {
        keywords = content_words(&ctx.query).into_iter().collect();
    }
    keywords
}

#[async_trait::async_trait]
impl Agent for FactCheckAgent {
    fn stage(&self) -> StageName {
        StageName::FactCheck
    }

    async fn execute(&self, ctx: &QueryContext, prior: &PipelineResults) -> Result<StageOutput> {
        let independent = ctx.fact_check_is_independent();
        let documents = if independent {
            self.gather_by_subject(ctx).await?
        } else {
            prior
                .output::<RetrievalOutput>(StageName::Retrieval)
                .map(|r| r.documents)
                .ok_or_else(|| AppError::Stage {
                    stage: StageName::FactCheck.to_string(),
                    message: "retrieval output unavailable".to_string(),
                })?
        };

        let claims = self.extract_claims(&documents, &query_keywords(ctx));
        let total = claims.len();
        let (verified_facts, unverified_claims): (Vec<Claim>, Vec<Claim>) =
            claims.into_iter().partition(|c| c.verified);

        debug!(
            trace_id = %ctx.trace_id,
            documents = documents.len(),
            verified = verified_facts.len(),
            unverified = unverified_claims.len(),
            independent,
            "Fact check complete"
        );

        let confidence = if total == 0 {
            0.3
        } else {
            0.4 + 0.6 * verified_facts.len() as f64 / total as f64
        };

        Ok(StageOutput::FactCheck(FactCheckOutput {
            verified_facts,
            unverified_claims,
            evidence_documents: documents,
            subjects: if independent {
                ctx.analysis.comparison_subjects.clone()
            } else {
                Vec::new()
            },
            independent,
            confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::TokenBudgetController;
    use crate::models::AgentResult;
    use crate::query::QueryAnalyzer;
    use answerforge_common::{AppConfig, Resilience};
    use answerforge_search::{MockSource, SourceFetcher};
    use serde_json::Map;

    fn context(query: &str) -> QueryContext {
        let config = AppConfig::default();
        QueryContext {
            query: query.to_string(),
            user_context: Map::new(),
            trace_id: "trace-fc".to_string(),
            analysis: QueryAnalyzer::default().analyze(query),
            budget: TokenBudgetController::new(config.budget).allocate(query).unwrap(),
        }
    }

    fn agent(sources: Vec<Arc<dyn SourceFetcher>>) -> FactCheckAgent {
        let config = AppConfig::default();
        let resilience = Arc::new(Resilience::new(&config.resilience));
        FactCheckAgent::new(Arc::new(RetrievalAggregator::new(&config, sources, resilience)))
    }

    fn doc(provider: &str, url: &str, snippet: &str) -> SourceResult {
        SourceResult::new("Ownership", url, snippet, provider)
    }

    fn prior_with(documents: Vec<SourceResult>) -> PipelineResults {
        let output = StageOutput::Retrieval(RetrievalOutput {
            documents,
            entities: Vec::new(),
            sub_queries: Vec::new(),
            total_sources: 2,
            successful_sources: 2,
            failed_source_names: Vec::new(),
            deduplication_ratio: 0.0,
            confidence: 0.8,
        });
        let mut prior = PipelineResults::new();
        prior.insert(StageName::Retrieval, AgentResult::from_output(&output, 5));
        prior
    }

    #[tokio::test]
    async fn test_claim_verified_by_two_providers() {
        let prior = prior_with(vec![
            doc("stackexchange", "https://a.example/1", "Rust ownership rules free memory when the owner goes out of scope."),
            doc("hackernews", "https://b.example/2", "Rust ownership rules free memory as soon as the owner goes out of scope."),
            doc("hackernews", "https://b.example/3", "Unrelated chatter about ownership of domain names and registrars."),
        ]);

        let output = agent(Vec::new())
            .execute(&context("how does rust ownership free memory"), &prior)
            .await
            .unwrap();
        let StageOutput::FactCheck(output) = output else {
            panic!("wrong stage output");
        };

        assert_eq!(output.verified_facts.len(), 1);
        assert_eq!(output.verified_facts[0].providers().len(), 2);
        assert_eq!(output.unverified_claims.len(), 1);
        assert!((output.confidence - 0.7).abs() < 1e-9);
        assert!(!output.independent);
    }

    #[tokio::test]
    async fn test_single_high_trust_provider_verifies() {
        let prior = prior_with(vec![doc(
            "wikipedia",
            "https://en.wikipedia.org/wiki/Ownership",
            "Rust ownership is a set of rules that govern how memory is managed.",
        )]);

        let output = agent(Vec::new())
            .execute(&context("what is rust ownership"), &prior)
            .await
            .unwrap();
        let StageOutput::FactCheck(output) = output else {
            panic!("wrong stage output");
        };
        assert_eq!(output.verified_facts.len(), 1);
        assert!(output.unverified_claims.is_empty());
    }

    #[tokio::test]
    async fn test_missing_retrieval_output_is_an_error() {
        let result = agent(Vec::new())
            .execute(&context("what is rust ownership"), &PipelineResults::new())
            .await;
        assert!(matches!(result, Err(AppError::Stage { .. })));
    }

    #[tokio::test]
    async fn test_comparison_gathers_evidence_per_subject() {
        let alpha = Arc::new(MockSource::echo("alpha"));
        let beta = Arc::new(MockSource::echo("beta"));
        let agent = agent(vec![alpha.clone() as Arc<dyn SourceFetcher>, beta.clone()]);

        let ctx = context("rust vs golang");
        assert!(ctx.fact_check_is_independent());

        let output = agent.execute(&ctx, &PipelineResults::new()).await.unwrap();
        let StageOutput::FactCheck(output) = output else {
            panic!("wrong stage output");
        };

        assert!(output.independent);
        assert_eq!(output.subjects, vec!["rust".to_string(), "golang".to_string()]);
        assert_eq!(alpha.calls(), 2);
        assert_eq!(beta.calls(), 2);
        assert!(!output.verified_facts.is_empty());
    }

    #[test]
    fn test_short_fragments_are_not_claims() {
        let found: Vec<&str> = sentences("Too short. This sentence is long enough to count.").collect();
        assert_eq!(found, vec!["This sentence is long enough to count"]);
    }
}
