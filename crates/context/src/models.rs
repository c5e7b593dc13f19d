//! Pipeline data model
//!
//! [`QueryContext`] is created once per query and shared read-only by every
//! stage. Each stage's typed output is normalized into an [`AgentResult`] at
//! the stage boundary; [`PipelineResults`] collects them for the response
//! aggregator.

use crate::agents::StageOutput;
use crate::budget::Budget;
use crate::query::{ExecutionPattern, QueryAnalysis};
use answerforge_common::resilience::ErrorResponse;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use validator::Validate;

/// Inbound query as received from a caller
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    #[serde(default)]
    pub user_context: Map<String, Value>,
}

/// Immutable per-query context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    pub query: String,
    pub user_context: Map<String, Value>,
    pub trace_id: String,
    pub analysis: QueryAnalysis,
    pub budget: Budget,
}

impl QueryContext {
    pub fn pattern(&self) -> ExecutionPattern {
        self.analysis.pattern
    }

    /// Fact-check gathers its own evidence instead of consuming retrieval
    pub fn fact_check_is_independent(&self) -> bool {
        self.analysis.pattern == ExecutionPattern::ForkJoin
            && self.analysis.comparison_subjects.len() >= 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Retrieval,
    FactCheck,
    Synthesis,
    Citation,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::Retrieval,
        StageName::FactCheck,
        StageName::Synthesis,
        StageName::Citation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Retrieval => "retrieval",
            StageName::FactCheck => "fact_check",
            StageName::Synthesis => "synthesis",
            StageName::Citation => "citation",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
    TimedOut,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
            StageStatus::TimedOut => "timed_out",
        }
    }
}

/// Normalized outcome of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub status: StageStatus,
    pub data: Map<String, Value>,
    pub error: Option<String>,
    /// In `[0, 1]`
    pub confidence: f64,
    pub execution_time_ms: u64,
}

impl AgentResult {
    /// Normalize a typed stage output; an output that does not serialize to
    /// a JSON object becomes a failed result
    pub fn from_output(output: &StageOutput, execution_time_ms: u64) -> Self {
        let confidence = output.confidence();
        match output.to_data() {
            Ok(data) => Self {
                success: true,
                status: StageStatus::Succeeded,
                data,
                error: None,
                confidence: clamp_unit(confidence),
                execution_time_ms,
            },
            Err(message) => Self::failed(message, execution_time_ms),
        }
    }

    pub fn failed(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            status: StageStatus::Failed,
            data: Map::new(),
            error: Some(error.into()),
            confidence: 0.0,
            execution_time_ms,
        }
    }

    pub fn timed_out(timeout_ms: u64, execution_time_ms: u64) -> Self {
        Self {
            status: StageStatus::TimedOut,
            ..Self::failed(format!("timed out after {}ms", timeout_ms), execution_time_ms)
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            ..Self::failed(format!("skipped: {}", reason.into()), 0)
        }
    }

    /// Typed view of `data`, only for successful results
    pub fn output<T: DeserializeOwned>(&self) -> Option<T> {
        if !self.success {
            return None;
        }
        serde_json::from_value(Value::Object(self.data.clone())).ok()
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Stage results for one query, keyed by stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResults {
    stages: BTreeMap<StageName, AgentResult>,
}

impl PipelineResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: StageName, result: AgentResult) {
        self.stages.insert(stage, result);
    }

    pub fn get(&self, stage: StageName) -> Option<&AgentResult> {
        self.stages.get(&stage)
    }

    pub fn succeeded(&self, stage: StageName) -> bool {
        self.get(stage).map(|r| r.success).unwrap_or(false)
    }

    pub fn output<T: DeserializeOwned>(&self, stage: StageName) -> Option<T> {
        self.get(stage).and_then(AgentResult::output)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StageName, &AgentResult)> {
        self.stages.iter()
    }
}

/// A source attached to the final answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based marker number
    pub index: usize,
    pub title: String,
    pub url: String,
    pub provider: String,
    pub snippet: String,
    /// Byte offset of the first marker in the answer, when cited inline
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub stage_status: BTreeMap<StageName, StageStatus>,
    pub stage_timings_ms: BTreeMap<StageName, u64>,
    pub trace_id: String,
    pub pattern: Option<ExecutionPattern>,
    pub budget: Option<Budget>,
    pub cached: bool,
    pub total_time_ms: u64,
}

impl ResultMetadata {
    pub fn empty(trace_id: impl Into<String>) -> Self {
        Self {
            stage_status: BTreeMap::new(),
            stage_timings_ms: BTreeMap::new(),
            trace_id: trace_id.into(),
            pattern: None,
            budget: None,
            cached: false,
            total_time_ms: 0,
        }
    }
}

/// What a caller receives for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub success: bool,
    pub answer: Option<String>,
    pub error: Option<ErrorResponse>,
    pub confidence: f64,
    pub citations: Vec<Citation>,
    pub warnings: Vec<String>,
    pub metadata: ResultMetadata,
}

impl FinalResult {
    /// Result for a query that failed before any stage ran
    pub fn setup_failure(error: ErrorResponse, metadata: ResultMetadata) -> Self {
        Self {
            success: false,
            answer: None,
            error: Some(error),
            confidence: 0.0,
            citations: Vec::new(),
            warnings: Vec::new(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let ok = QueryRequest {
            query: "what is rust".into(),
            user_context: Map::new(),
        };
        assert!(ok.validate().is_ok());

        let empty = QueryRequest {
            query: String::new(),
            user_context: Map::new(),
        };
        assert!(empty.validate().is_err());

        let long = QueryRequest {
            query: "x".repeat(2001),
            user_context: Map::new(),
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_result_constructors() {
        let skipped = AgentResult::skipped("retrieval did not succeed");
        assert!(!skipped.success);
        assert_eq!(skipped.status, StageStatus::Skipped);
        assert_eq!(skipped.confidence, 0.0);
        assert!(skipped.error.as_deref().unwrap_or_default().starts_with("skipped"));

        let timed_out = AgentResult::timed_out(1000, 1001);
        assert_eq!(timed_out.status, StageStatus::TimedOut);
        assert!(timed_out.output::<Map<String, Value>>().is_none());
    }

    #[test]
    fn test_stage_names_serialize_as_map_keys() {
        let mut results = PipelineResults::new();
        results.insert(StageName::FactCheck, AgentResult::skipped("x"));
        let json = serde_json::to_value(&results).unwrap();
        assert!(json["stages"]["fact_check"].is_object());
        assert!(!results.succeeded(StageName::FactCheck));
        assert!(!results.succeeded(StageName::Synthesis));
    }
}
