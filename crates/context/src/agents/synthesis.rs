//! Synthesis stage
//!
//! With a language model configured, the answer comes from a chat
//! completion guarded by the resilience layer; once retries are exhausted
//! the stage falls back to the extractive answer. Without a model the
//! extractive answer is built directly from verified facts and the top
//! snippets, with `[n]` markers pointing into `sources`.

use super::fact_check::{Claim, FactCheckOutput};
use super::llm::{CompletionRequest, LanguageModel};
use super::retrieval::RetrievalOutput;
use super::{Agent, StageOutput};
use crate::models::{PipelineResults, QueryContext, StageName};
use answerforge_common::config::AppConfig;
use answerforge_common::errors::{AppError, Result};
use answerforge_common::resilience::RetryPolicy;
use answerforge_common::{OperationType, Resilience};
use answerforge_search::SourceResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are a careful research assistant. Answer using ONLY the numbered sources provided. \
Cite every claim inline as [n] using the source numbers. If the sources are insufficient, say so.";

const EXTRACTIVE_FACTS: usize = 3;
const EXTRACTIVE_SNIPPETS: usize = 3;
const MAX_SENTENCE_CHARS: usize = 240;
/// A tenth of the stage timeout stays free for the extractive fallback
const EXTRACTIVE_RESERVE_DIVISOR: u32 = 10;

/// A numbered source the answer may cite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// 1-based, matches the `[n]` markers
    pub index: usize,
    pub title: String,
    pub url: String,
    pub provider: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMethod {
    Llm,
    Extractive,
    /// Model configured but unavailable
    ExtractiveFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub facts_used: usize,
    pub method: SynthesisMethod,
    pub model: Option<String>,
    pub token_estimate: usize,
    pub confidence: f64,
}

pub struct SynthesisAgent {
    model: Option<Arc<dyn LanguageModel>>,
    resilience: Arc<Resilience>,
    policy: RetryPolicy,
    /// Share of the stage timeout the model call may use
    model_budget: Duration,
    max_documents: usize,
    max_tokens: usize,
    temperature: f32,
}

impl SynthesisAgent {
    pub fn new(
        config: &AppConfig,
        model: Option<Arc<dyn LanguageModel>>,
        resilience: Arc<Resilience>,
    ) -> Self {
        let stage_timeout = config.pipeline.synthesis_timeout();
        let model_budget = stage_timeout - stage_timeout / EXTRACTIVE_RESERVE_DIVISOR;
        Self {
            model,
            policy: resilience.default_policy().fit_within(model_budget),
            model_budget,
            resilience,
            max_documents: config.pipeline.max_documents.max(1),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        }
    }

    /// Retry policy for the model call, narrowed to the stage timeout
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy.fit_within(self.model_budget);
        self
    }

    fn build_prompt(query: &str, sources: &[SourceRef], facts: &[Claim]) -> String {
        let mut prompt = format!("Question: {}\n\nSources:\n", query);
        for source in sources {
            prompt.push_str(&format!(
                "\n[{}] {} ({})\n{}\n",
                source.index, source.title, source.provider, source.snippet
            ));
        }
        if !facts.is_empty() {
            prompt.push_str("\nCross-checked facts:\n");
            for fact in facts {
                prompt.push_str(&format!("- {}\n", fact.text));
            }
        }
        prompt.push_str("\nAnswer:");
        prompt
    }

    async fn complete(
        &self,
        ctx: &QueryContext,
        model: &Arc<dyn LanguageModel>,
        request: CompletionRequest,
    ) -> Option<String> {
        let outcome = self
            .resilience
            .operation::<Option<String>>(OperationType::Model, "llm", "chat_completion")
            .policy(self.policy.clone())
            .fallback(None)
            .request_id(ctx.trace_id.clone())
            .run(|| {
                let model = Arc::clone(model);
                let request = request.clone();
                async move { model.complete(&request).await.map(Some) }
            })
            .await;

        match outcome {
            Ok(answer) => answer,
            Err(e) => {
                warn!(trace_id = %ctx.trace_id, error = %e, "Model call failed");
                None
            }
        }
    }
}

/// Documents available to synthesis, retrieval first
fn collect_documents(prior: &PipelineResults) -> Vec<SourceResult> {
    let mut documents = prior
        .output::<RetrievalOutput>(StageName::Retrieval)
        .map(|r| r.documents)
        .unwrap_or_default();

    if let Some(fact_check) = prior.output::<FactCheckOutput>(StageName::FactCheck) {
        for doc in fact_check.evidence_documents {
            if !documents.iter().any(|d| d.url == doc.url) {
                documents.push(doc);
            }
        }
    }
    documents
}

fn build_sources(documents: &[SourceResult], facts: &[Claim], max_documents: usize) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = documents
        .iter()
        .take(max_documents)
        .enumerate()
        .map(|(i, doc)| SourceRef {
            index: i + 1,
            title: doc.title.clone(),
            url: doc.url.clone(),
            provider: doc.provider.clone(),
            snippet: doc.snippet.clone(),
        })
        .collect();

    for fact in facts {
        for evidence in &fact.evidence {
            if !sources.iter().any(|s| s.url == evidence.url) {
                sources.push(SourceRef {
                    index: sources.len() + 1,
                    title: evidence.title.clone(),
                    url: evidence.url.clone(),
                    provider: evidence.provider.clone(),
                    snippet: fact.text.clone(),
                });
            }
        }
    }
    sources
}

fn first_sentence(text: &str) -> &str {
    let sentence = text
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| text.trim());
    truncate_chars(sentence, MAX_SENTENCE_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn strip_terminal(sentence: &str) -> &str {
    sentence.trim_end_matches(['.', '!', '?'])
}

/// Deterministic answer from facts and snippets; `None` with nothing to say
fn extractive_answer(sources: &[SourceRef], facts: &[Claim], max_chars: usize) -> Option<(String, usize)> {
    let mut parts: Vec<String> = Vec::new();
    let mut cited: Vec<usize> = Vec::new();

    let facts_used: Vec<&Claim> = facts.iter().take(EXTRACTIVE_FACTS).collect();
    for fact in &facts_used {
        let markers: Vec<String> = fact
            .evidence
            .iter()
            .filter_map(|e| sources.iter().find(|s| s.url == e.url))
            .map(|s| {
                cited.push(s.index);
                format!("[{}]", s.index)
            })
            .collect();
        parts.push(format!("{} {}.", strip_terminal(&fact.text), markers.join("")));
    }

    for source in sources
        .iter()
        .filter(|s| !cited.contains(&s.index))
        .take(EXTRACTIVE_SNIPPETS)
    {
        let sentence = first_sentence(&source.snippet);
        if sentence.is_empty() {
            continue;
        }
        parts.push(format!("{} [{}].", strip_terminal(sentence), source.index));
    }

    if parts.is_empty() {
        return None;
    }

    let answer = parts.join(" ");
    let answer = truncate_chars(&answer, max_chars.max(1)).trim_end().to_string();
    Some((answer, facts_used.len()))
}

#[async_trait::async_trait]
impl Agent for SynthesisAgent {
    fn stage(&self) -> StageName {
        StageName::Synthesis
    }

    async fn execute(&self, ctx: &QueryContext, prior: &PipelineResults) -> Result<StageOutput> {
        let facts = prior
            .output::<FactCheckOutput>(StageName::FactCheck)
            .map(|f| f.verified_facts)
            .unwrap_or_default();
        let documents = collect_documents(prior);
        let sources = build_sources(&documents, &facts, self.max_documents);

        let budget_tokens = ctx.budget.for_stage(StageName::Synthesis).max(1);
        let max_chars = budget_tokens * 4;

        let mut method = SynthesisMethod::Extractive;
        if let Some(model) = &self.model {
            let request = CompletionRequest {
                system: SYSTEM_PROMPT.to_string(),
                prompt: Self::build_prompt(&ctx.query, &sources, &facts),
                max_tokens: budget_tokens.min(self.max_tokens).max(1),
                temperature: self.temperature,
            };

            if let Some(answer) = self.complete(ctx, model, request).await {
                let confidence = if sources.is_empty() {
                    0.4
                } else if facts.is_empty() {
                    0.7
                } else {
                    0.85
                };
                debug!(trace_id = %ctx.trace_id, model = model.model_name(), "Model answer produced");
                return Ok(StageOutput::Synthesis(SynthesisOutput {
                    token_estimate: answer.chars().count() / 4,
                    answer,
                    sources,
                    facts_used: facts.len(),
                    method: SynthesisMethod::Llm,
                    model: Some(model.model_name().to_string()),
                    confidence,
                }));
            }
            method = SynthesisMethod::ExtractiveFallback;
        }

        let (answer, facts_used) =
            extractive_answer(&sources, &facts, max_chars).ok_or_else(|| AppError::Stage {
                stage: StageName::Synthesis.to_string(),
                message: "no evidence available to synthesize an answer".to_string(),
            })?;

        let confidence = (0.35 + 0.1 * facts_used as f64).min(0.75);
        debug!(
            trace_id = %ctx.trace_id,
            method = ?method,
            sources = sources.len(),
            facts_used,
            "Extractive answer produced"
        );

        Ok(StageOutput::Synthesis(SynthesisOutput {
            token_estimate: answer.chars().count() / 4,
            answer,
            sources,
            facts_used,
            method,
            model: None,
            confidence,
        }))
    }
}
