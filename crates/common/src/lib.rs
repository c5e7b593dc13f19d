//! AnswerForge Common Library
//!
//! Shared code for the AnswerForge crates including:
//! - Error types and handling
//! - Configuration management
//! - In-memory TTL caching
//! - Metrics and tracing setup
//! - The resilience layer (error classification, circuit breakers,
//!   retry with backoff, error monitoring)

pub mod cache;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod resilience;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{CacheStats, TtlCache};
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use resilience::{OperationType, Resilience};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default user agent sent to external knowledge sources
pub const DEFAULT_USER_AGENT: &str = concat!("AnswerForge/", env!("CARGO_PKG_VERSION"));
