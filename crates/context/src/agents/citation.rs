//! Citation stage: resolve `[n]` markers in the synthesized answer

use super::synthesis::{SourceRef, SynthesisOutput};
use super::{Agent, StageOutput};
use crate::models::{Citation, PipelineResults, QueryContext, StageName};
use answerforge_common::errors::{AppError, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

/// Sources cited when the answer carries no markers
const FALLBACK_CITATIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationOutput {
    pub citations: Vec<Citation>,
    /// Citations were resolved from markers in the answer
    pub inline: bool,
    /// Markers that point at no source
    pub unresolved_markers: Vec<usize>,
    pub confidence: f64,
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid citation marker pattern"))
}

/// Distinct marker numbers with the byte offset of their first occurrence
fn markers(answer: &str) -> Vec<(usize, usize)> {
    let mut found: Vec<(usize, usize)> = Vec::new();
    for caps in marker_pattern().captures_iter(answer) {
        let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Ok(index) = number.as_str().parse::<usize>() else {
            continue;
        };
        if !found.iter().any(|(i, _)| *i == index) {
            found.push((index, whole.start()));
        }
    }
    found
}

fn citation(source: &SourceRef, position: Option<usize>) -> Citation {
    Citation {
        index: source.index,
        title: source.title.clone(),
        url: source.url.clone(),
        provider: source.provider.clone(),
        snippet: source.snippet.clone(),
        position,
    }
}

#[derive(Debug, Default)]
pub struct CitationAgent;

impl CitationAgent {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, synthesis: &SynthesisOutput) -> CitationOutput {
        let found = markers(&synthesis.answer);

        if found.is_empty() {
            let citations: Vec<Citation> = synthesis
                .sources
                .iter()
                .take(FALLBACK_CITATIONS)
                .map(|s| citation(s, None))
                .collect();
            let confidence = if citations.is_empty() { 0.3 } else { 0.6 };
            return CitationOutput {
                citations,
                inline: false,
                unresolved_markers: Vec::new(),
                confidence,
            };
        }

        let mut citations = Vec::new();
        let mut unresolved_markers = Vec::new();
        for (index, position) in &found {
            match synthesis.sources.iter().find(|s| s.index == *index) {
                Some(source) => citations.push(citation(source, Some(*position))),
                None => unresolved_markers.push(*index),
            }
        }

        CitationOutput {
            confidence: citations.len() as f64 / found.len() as f64,
            citations,
            inline: true,
            unresolved_markers,
        }
    }
}

#[async_trait::async_trait]
impl Agent for CitationAgent {
    fn stage(&self) -> StageName {
        StageName::Citation
    }

    async fn execute(&self, ctx: &QueryContext, prior: &PipelineResults) -> Result<StageOutput> {
        let synthesis = prior
            .output::<SynthesisOutput>(StageName::Synthesis)
            .ok_or_else(|| AppError::Stage {
                stage: StageName::Citation.to_string(),
                message: "synthesis output unavailable".to_string(),
            })?;

        let output = self.resolve(&synthesis);
        debug!(
            trace_id = %ctx.trace_id,
            citations = output.citations.len(),
            unresolved = output.unresolved_markers.len(),
            inline = output.inline,
            "Citations resolved"
        );
        Ok(StageOutput::Citation(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SynthesisMethod;

    fn source(index: usize) -> SourceRef {
        SourceRef {
            index,
            title: format!("Source {}", index),
            url: format!("https://example.org/{}", index),
            provider: "wikipedia".to_string(),
            snippet: "snippet".to_string(),
        }
    }

    fn synthesis(answer: &str, sources: usize) -> SynthesisOutput {
        SynthesisOutput {
            answer: answer.to_string(),
            sources: (1..=sources).map(source).collect(),
            facts_used: 0,
            method: SynthesisMethod::Extractive,
            model: None,
            token_estimate: 10,
            confidence: 0.5,
        }
    }

    #[test]
    fn test_markers_resolve_in_order_of_appearance() {
        let output = CitationAgent.resolve(&synthesis("Alpha [2]. Beta [1][2]. Gamma [7].", 3));

        assert!(output.inline);
        let indexes: Vec<usize> = output.citations.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![2, 1]);
        assert_eq!(output.citations[0].position, Some(6));
        assert_eq!(output.unresolved_markers, vec![7]);
        assert!((output.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unmarked_answer_cites_top_sources() {
        let output = CitationAgent.resolve(&synthesis("No markers here.", 5));
        assert!(!output.inline);
        assert_eq!(output.citations.len(), 3);
        assert!(output.citations.iter().all(|c| c.position.is_none()));
        assert_eq!(output.confidence, 0.6);

        let empty = CitationAgent.resolve(&synthesis("No markers here.", 0));
        assert!(empty.citations.is_empty());
        assert_eq!(empty.confidence, 0.3);
    }

    #[tokio::test]
    async fn test_missing_synthesis_is_an_error() {
        let ctx_query = "what is rust";
        let ctx = QueryContext {
            query: ctx_query.to_string(),
            user_context: serde_json::Map::new(),
            trace_id: "trace-cite".to_string(),
            analysis: crate::query::QueryAnalyzer::default().analyze(ctx_query),
            budget: crate::budget::TokenBudgetController::new(Default::default())
                .allocate(ctx_query)
                .unwrap(),
        };
        let result = CitationAgent.execute(&ctx, &PipelineResults::new()).await;
        assert!(matches!(result, Err(AppError::Stage { .. })));
    }
}
