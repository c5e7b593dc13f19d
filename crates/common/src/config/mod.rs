//! Configuration management for AnswerForge
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Pipeline stage configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Retrieval aggregator configuration
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// External knowledge sources
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Circuit breaker and retry configuration
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Token/cost budget policy
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Language model used by the synthesis stage
    #[serde(default)]
    pub llm: LlmConfig,

    /// In-memory cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Retrieval stage timeout in milliseconds
    #[serde(default = "default_retrieval_timeout")]
    pub retrieval_timeout_ms: u64,

    /// Fact-check stage timeout in milliseconds
    #[serde(default = "default_fact_check_timeout")]
    pub fact_check_timeout_ms: u64,

    /// Synthesis stage timeout in milliseconds
    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_ms: u64,

    /// Citation stage timeout in milliseconds
    #[serde(default = "default_citation_timeout")]
    pub citation_timeout_ms: u64,

    /// TTL for cached final answers
    #[serde(default = "default_answer_cache_ttl")]
    pub answer_cache_ttl_secs: u64,

    /// Maximum documents handed from retrieval to later stages
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatorConfig {
    /// Global deadline for one fan-out, in milliseconds
    #[serde(default = "default_aggregation_deadline")]
    pub deadline_ms: u64,

    /// TTL for cached search results
    #[serde(default = "default_search_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Results returned when the caller does not ask for a specific count
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,

    /// Providers whose results get the credibility boost
    #[serde(default = "default_high_trust_providers")]
    pub high_trust_providers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    /// Sources registered with the aggregator, in fetch order
    #[serde(default = "default_enabled_sources")]
    pub enabled: Vec<String>,

    /// Per-request HTTP timeout in milliseconds
    #[serde(default = "default_source_request_timeout")]
    pub request_timeout_ms: u64,

    /// User agent sent to every source
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// StackExchange site to search
    #[serde(default = "default_stackexchange_site")]
    pub stackexchange_site: String,

    /// Default sliding-window admission limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-source overrides of the admission limit
    #[serde(default)]
    pub per_source: HashMap<String, RateLimitConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResilienceConfig {
    /// Consecutive failures that open a circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before letting a trial request through
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds (doubles per attempt)
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for a single retry delay in milliseconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Per-attempt timeout for wrapped operations in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    /// Tokens granted to every query
    #[serde(default = "default_base_tokens")]
    pub base_tokens: usize,

    /// Extra tokens per query character
    #[serde(default = "default_tokens_per_char")]
    pub tokens_per_char: usize,

    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Cost estimate used to derive the dollar budget
    #[serde(default = "default_cost_per_1k")]
    pub cost_per_1k_tokens_usd: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat completion endpoint (OpenAI-compatible)
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key; extractive synthesis is used when absent
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    /// HTTP timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum entries per cache instance
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Key prefix for namespacing
    #[serde(default = "default_cache_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_retrieval_timeout() -> u64 { 30_000 }
fn default_fact_check_timeout() -> u64 { 20_000 }
fn default_synthesis_timeout() -> u64 { 15_000 }
fn default_citation_timeout() -> u64 { 10_000 }
fn default_answer_cache_ttl() -> u64 { 3600 }
fn default_max_documents() -> usize { 10 }
fn default_aggregation_deadline() -> u64 { 15_000 }
fn default_search_cache_ttl() -> u64 { 3600 }
fn default_max_results() -> usize { 10 }
fn default_high_trust_providers() -> Vec<String> {
    vec!["wikipedia".to_string(), "openalex".to_string()]
}
fn default_enabled_sources() -> Vec<String> {
    ["wikipedia", "stackexchange", "hackernews", "openalex"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_source_request_timeout() -> u64 { 10_000 }
fn default_user_agent() -> String { crate::DEFAULT_USER_AGENT.to_string() }
fn default_stackexchange_site() -> String { "stackoverflow".to_string() }
fn default_max_requests() -> usize { 30 }
fn default_window_secs() -> u64 { 60 }
fn default_failure_threshold() -> u32 { 5 }
fn default_recovery_timeout() -> u64 { 60 }
fn default_max_retries() -> u32 { 3 }
fn default_backoff_base() -> u64 { 2000 }
fn default_backoff_max() -> u64 { 60_000 }
fn default_operation_timeout() -> u64 { 10_000 }
fn default_base_tokens() -> usize { 1500 }
fn default_tokens_per_char() -> usize { 8 }
fn default_min_tokens() -> usize { 1000 }
fn default_max_tokens() -> usize { 8000 }
fn default_cost_per_1k() -> f64 { 0.002 }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_max_tokens() -> usize { 800 }
fn default_llm_temperature() -> f32 { 0.2 }
fn default_llm_timeout() -> u64 { 30 }
fn default_cache_max_entries() -> usize { 10_000 }
fn default_cache_prefix() -> String { "answerforge".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }
fn default_service_name() -> String { "answerforge".to_string() }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retrieval_timeout_ms: default_retrieval_timeout(),
            fact_check_timeout_ms: default_fact_check_timeout(),
            synthesis_timeout_ms: default_synthesis_timeout(),
            citation_timeout_ms: default_citation_timeout(),
            answer_cache_ttl_secs: default_answer_cache_ttl(),
            max_documents: default_max_documents(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_aggregation_deadline(),
            cache_ttl_secs: default_search_cache_ttl(),
            default_max_results: default_max_results(),
            high_trust_providers: default_high_trust_providers(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_sources(),
            request_timeout_ms: default_source_request_timeout(),
            user_agent: default_user_agent(),
            stackexchange_site: default_stackexchange_site(),
            rate_limit: RateLimitConfig::default(),
            per_source: HashMap::new(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            base_tokens: default_base_tokens(),
            tokens_per_char: default_tokens_per_char(),
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
            cost_per_1k_tokens_usd: default_cost_per_1k(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            key_prefix: default_cache_prefix(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RESILIENCE__MAX_RETRIES=2
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("sources.enabled")
                    .with_list_parse_key("aggregator.high_trust_providers")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML/YAML/JSON file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Admission limit for one source, honoring per-source overrides
    pub fn rate_limit_for(&self, source: &str) -> &RateLimitConfig {
        self.sources
            .per_source
            .get(source)
            .unwrap_or(&self.sources.rate_limit)
    }
}

impl PipelineConfig {
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    pub fn fact_check_timeout(&self) -> Duration {
        Duration::from_millis(self.fact_check_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn citation_timeout(&self) -> Duration {
        Duration::from_millis(self.citation_timeout_ms)
    }
}

impl AggregatorConfig {
    /// Global fan-out deadline as Duration
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl ResilienceConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.retrieval_timeout_ms, 30_000);
        assert_eq!(config.pipeline.citation_timeout(), Duration::from_secs(10));
        assert_eq!(config.aggregator.deadline(), Duration::from_secs(15));
        assert_eq!(config.resilience.failure_threshold, 5);
        assert_eq!(config.resilience.recovery_timeout(), Duration::from_secs(60));
        assert_eq!(config.sources.enabled.len(), 4);
    }

    #[test]
    fn test_rate_limit_override() {
        let mut config = AppConfig::default();
        config.sources.per_source.insert(
            "wikipedia".to_string(),
            RateLimitConfig {
                max_requests: 5,
                window_secs: 10,
            },
        );

        assert_eq!(config.rate_limit_for("wikipedia").max_requests, 5);
        assert_eq!(config.rate_limit_for("openalex").max_requests, 30);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config = Config::builder()
            .set_override("resilience.max_retries", 2)
            .unwrap()
            .build()
            .unwrap();
        let parsed: AppConfig = config.try_deserialize().unwrap();

        assert_eq!(parsed.resilience.max_retries, 2);
        assert_eq!(parsed.resilience.backoff_base_ms, 2000);
        assert_eq!(parsed.pipeline.synthesis_timeout_ms, 15_000);
    }
}
