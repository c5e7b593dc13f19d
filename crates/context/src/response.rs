//! Folds per-stage results into the caller-facing [`FinalResult`]

use crate::agents::{CitationOutput, RetrievalOutput, SynthesisOutput};
use crate::models::{FinalResult, PipelineResults, QueryContext, ResultMetadata, StageName};
use answerforge_common::resilience::{classify_message, sanitize, ErrorResponse};

/// Weight of each stage's confidence in the overall score
const STAGE_WEIGHTS: [(StageName, f64); 4] = [
    (StageName::Retrieval, 0.2),
    (StageName::FactCheck, 0.3),
    (StageName::Synthesis, 0.35),
    (StageName::Citation, 0.15),
];

#[derive(Debug, Default)]
pub struct ResponseAggregator;

impl ResponseAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(
        &self,
        ctx: &QueryContext,
        results: &PipelineResults,
        total_time_ms: u64,
    ) -> FinalResult {
        let synthesis = results.output::<SynthesisOutput>(StageName::Synthesis);
        let success = synthesis.is_some();

        let citations = results
            .output::<CitationOutput>(StageName::Citation)
            .map(|c| c.citations)
            .unwrap_or_default();

        let error = if success {
            None
        } else {
            let message = results
                .get(StageName::Synthesis)
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "synthesis did not run".to_string());
            Some(error_response(&message, &ctx.trace_id))
        };

        FinalResult {
            success,
            answer: synthesis.map(|s| s.answer),
            error,
            confidence: if success { overall_confidence(results) } else { 0.0 },
            citations,
            warnings: warnings(results),
            metadata: metadata(ctx, results, total_time_ms),
        }
    }
}

/// Weighted stage confidence; stages that did not succeed contribute zero
fn overall_confidence(results: &PipelineResults) -> f64 {
    let total_weight: f64 = STAGE_WEIGHTS.iter().map(|(_, w)| w).sum();
    let score: f64 = STAGE_WEIGHTS
        .iter()
        .filter_map(|(stage, weight)| {
            results
                .get(*stage)
                .filter(|r| r.success)
                .map(|r| weight * r.confidence)
        })
        .sum();
    (score / total_weight).clamp(0.0, 1.0)
}

fn warnings(results: &PipelineResults) -> Vec<String> {
    let mut warnings: Vec<String> = results
        .iter()
        .filter(|(_, r)| !r.success)
        .map(|(stage, r)| {
            format!(
                "{} {}: {}",
                stage,
                r.status.as_str(),
                r.error.as_deref().unwrap_or("no detail")
            )
        })
        .collect();

    if let Some(retrieval) = results.output::<RetrievalOutput>(StageName::Retrieval) {
        if !retrieval.failed_source_names.is_empty() {
            warnings.push(format!(
                "retrieval degraded: sources unavailable: {}",
                retrieval.failed_source_names.join(", ")
            ));
        }
    }

    if let Some(citation) = results.output::<CitationOutput>(StageName::Citation) {
        if !citation.unresolved_markers.is_empty() {
            let markers: Vec<String> = citation
                .unresolved_markers
                .iter()
                .map(|m| format!("[{}]", m))
                .collect();
            warnings.push(format!("citation markers without a source: {}", markers.join(" ")));
        }
    }

    warnings
}

fn metadata(ctx: &QueryContext, results: &PipelineResults, total_time_ms: u64) -> ResultMetadata {
    let mut metadata = ResultMetadata::empty(ctx.trace_id.clone());
    for (stage, result) in results.iter() {
        metadata.stage_status.insert(*stage, result.status);
        metadata.stage_timings_ms.insert(*stage, result.execution_time_ms);
    }
    metadata.pattern = Some(ctx.pattern());
    metadata.budget = Some(ctx.budget.clone());
    metadata.total_time_ms = total_time_ms;
    metadata
}

/// Client-facing error for a failure known only by its message
pub fn error_response(message: &str, request_id: &str) -> ErrorResponse {
    let info = classify_message(message);
    ErrorResponse {
        error: info.category.user_message().to_string(),
        error_type: info.category,
        retryable: info.retryable,
        fallback_data: None,
        detail: Some(sanitize(message)),
        request_id: Some(request_id.to_string()),
    }
}
