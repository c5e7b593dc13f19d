//! AnswerForge question-answering pipeline
//!
//! - `query`: intent and execution-pattern classification, entity extraction
//! - `budget`: per-query token allocation
//! - `agents`: the retrieval, fact-check, synthesis and citation stages
//! - `orchestrator`: stage sequencing, timeouts, skips and caching
//! - `response`: folding stage results into a [`FinalResult`]

pub mod agents;
pub mod budget;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod response;
pub mod semantic_cache;

pub use budget::{Budget, TokenBudgetController};
pub use models::{AgentResult, Citation, FinalResult, PipelineResults, QueryRequest, StageName};
pub use orchestrator::{PipelineOrchestrator, StageAgents};
pub use query::{ExecutionPattern, QueryAnalysis, QueryAnalyzer};
pub use response::ResponseAggregator;
pub use semantic_cache::SemanticCache;
