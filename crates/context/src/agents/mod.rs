//! Pipeline stage agents
//!
//! Each agent produces one typed [`StageOutput`] variant. The orchestrator
//! normalizes it into an `AgentResult` at the stage boundary, and later
//! stages read earlier outputs back through `PipelineResults::output`.

mod citation;
mod fact_check;
mod llm;
mod retrieval;
mod synthesis;

pub use citation::{CitationAgent, CitationOutput};
pub use fact_check::{Claim, Evidence, FactCheckAgent, FactCheckOutput};
pub use llm::{CompletionRequest, LanguageModel, OpenAiChatModel};
pub use retrieval::{RetrievalAgent, RetrievalOutput};
pub use synthesis::{SourceRef, SynthesisAgent, SynthesisMethod, SynthesisOutput};

use crate::models::{PipelineResults, QueryContext, StageName};
use answerforge_common::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of stage outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    Retrieval(RetrievalOutput),
    FactCheck(FactCheckOutput),
    Synthesis(SynthesisOutput),
    Citation(CitationOutput),
}

impl StageOutput {
    pub fn stage(&self) -> StageName {
        match self {
            StageOutput::Retrieval(_) => StageName::Retrieval,
            StageOutput::FactCheck(_) => StageName::FactCheck,
            StageOutput::Synthesis(_) => StageName::Synthesis,
            StageOutput::Citation(_) => StageName::Citation,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            StageOutput::Retrieval(o) => o.confidence,
            StageOutput::FactCheck(o) => o.confidence,
            StageOutput::Synthesis(o) => o.confidence,
            StageOutput::Citation(o) => o.confidence,
        }
    }

    /// Inner output as a JSON object
    pub fn to_data(&self) -> std::result::Result<Map<String, Value>, String> {
        let value = match self {
            StageOutput::Retrieval(o) => serde_json::to_value(o),
            StageOutput::FactCheck(o) => serde_json::to_value(o),
            StageOutput::Synthesis(o) => serde_json::to_value(o),
            StageOutput::Citation(o) => serde_json::to_value(o),
        }
        .map_err(|e| format!("{} output could not be serialized: {}", self.stage(), e))?;

        match value {
            Value::Object(map) => Ok(map),
            other => Err(format!(
                "{} output is not an object: {}",
                self.stage(),
                other
            )),
        }
    }
}

/// One pipeline stage
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn stage(&self) -> StageName;

    /// Run the stage given the results of the stages before it
    async fn execute(&self, ctx: &QueryContext, prior: &PipelineResults) -> Result<StageOutput>;
}
