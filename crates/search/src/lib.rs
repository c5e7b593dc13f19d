//! AnswerForge federated retrieval
//!
//! - `sources`: one fetcher per free knowledge API, plus a mock
//! - `rate_limiter`: per-source sliding window with failure backoff
//! - `dedup` / `ranking`: near-duplicate removal and composite scoring
//! - `aggregator`: parallel fan-out under a global deadline, with caching

pub mod aggregator;
pub mod dedup;
pub mod ranking;
pub mod rate_limiter;
pub mod sources;

pub use aggregator::{AggregatedResults, RetrievalAggregator, SourceStatus};
pub use rate_limiter::{LimiterStatus, SourceRateLimiter};
pub use sources::{build_sources, MockSource, SourceFetcher, SourceResult};
