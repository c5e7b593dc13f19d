//! Knowledge-source fetchers
//!
//! Each fetcher issues one bounded HTTP call against a free JSON API and
//! normalizes the response into [`SourceResult`] records. Fetchers do not
//! retry or rate-limit on their own; the aggregator wraps them.

mod hackernews;
mod mock;
mod openalex;
mod stackexchange;
mod wikipedia;

pub use hackernews::HackerNewsSource;
pub use mock::{MockBehavior, MockSource};
pub use openalex::OpenAlexSource;
pub use stackexchange::StackExchangeSource;
pub use wikipedia::WikipediaSource;

use answerforge_common::config::SourcesConfig;
use answerforge_common::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// One normalized search hit from an external source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Name of the fetcher that produced this result
    pub provider: String,
    /// Publication or last-activity time, if the source reports one
    pub timestamp: Option<DateTime<Utc>>,
    pub relevance_score: f64,
    pub credibility_score: f64,
    pub recency_score: f64,
    pub diversity_score: f64,
}

impl SourceResult {
    /// Result with neutral scores
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            provider: provider.into(),
            timestamp: None,
            relevance_score: 1.0,
            credibility_score: 1.0,
            recency_score: 0.5,
            diversity_score: 1.0,
        }
    }

    /// Host part of the URL, without a leading `www.`
    pub fn domain(&self) -> String {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let host = without_scheme
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .to_lowercase();
        host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
    }

    /// Lowercased alphanumeric words of the title
    pub fn normalized_title(&self) -> String {
        normalize_text(&self.title)
    }

    /// Hash of the normalized title and the first 200 snippet characters
    pub fn content_hash(&self) -> String {
        let prefix: String = self.snippet.chars().take(200).collect();
        let mut hasher = Sha256::new();
        hasher.update(self.normalized_title().as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize_text(&prefix).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Product of the four component scores
    pub fn combined_score(&self) -> f64 {
        self.relevance_score * self.credibility_score * self.recency_score * self.diversity_score
    }
}

/// Common trait for all knowledge sources
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Stable source name, also used as rate-limiter and circuit key
    fn name(&self) -> &str;

    /// Fetch up to `limit` results for the query
    async fn fetch(&self, query: &str, limit: usize) -> Result<Vec<SourceResult>>;
}

/// Build the enabled HTTP fetchers sharing one client
pub fn build_sources(config: &SourcesConfig) -> Result<Vec<Arc<dyn SourceFetcher>>> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()?;

    let mut sources: Vec<Arc<dyn SourceFetcher>> = Vec::new();
    for name in &config.enabled {
        let source: Arc<dyn SourceFetcher> = match name.as_str() {
            "wikipedia" => Arc::new(WikipediaSource::new(client.clone())),
            "stackexchange" => Arc::new(StackExchangeSource::new(
                client.clone(),
                config.stackexchange_site.clone(),
            )),
            "hackernews" => Arc::new(HackerNewsSource::new(client.clone())),
            "openalex" => Arc::new(OpenAlexSource::new(client.clone())),
            other => {
                return Err(AppError::Configuration {
                    message: format!("Unknown knowledge source: {}", other),
                })
            }
        };
        sources.push(source);
    }

    Ok(sources)
}

/// Map a non-2xx response into an upstream error
pub(crate) async fn check_status(
    service: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(AppError::Upstream {
        service: service.to_string(),
        status: status.as_u16(),
        message: body.chars().take(200).collect(),
    })
}

/// Lowercase, keep alphanumerics, collapse whitespace
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid html tag pattern"))
}

/// Drop HTML tags, decode common entities and collapse whitespace
pub fn clean_html(text: &str) -> String {
    let stripped = tag_pattern().replace_all(text, " ");
    let decoded = stripped
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&#x2F;", "/")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Relevance from position in the provider's own ranking: 1.0 for the first
/// hit, decaying towards 0.5
pub fn position_relevance(index: usize, total: usize) -> f64 {
    if total <= 1 {
        return 1.0;
    }
    1.0 - 0.5 * (index as f64 / (total - 1) as f64)
}

/// 1.0 under 30 days old, linear decay to a 0.3 floor at five years, 0.5
/// when unknown
pub fn recency_score(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    const FRESH_DAYS: f64 = 30.0;
    const STALE_DAYS: f64 = 5.0 * 365.0;
    const FLOOR: f64 = 0.3;

    let Some(ts) = timestamp else {
        return 0.5;
    };
    let age_days = (now - ts).num_seconds().max(0) as f64 / 86_400.0;

    if age_days < FRESH_DAYS {
        1.0
    } else if age_days >= STALE_DAYS {
        FLOOR
    } else {
        let progress = (age_days - FRESH_DAYS) / (STALE_DAYS - FRESH_DAYS);
        1.0 - (1.0 - FLOOR) * progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_derived_fields() {
        let result = SourceResult::new(
            "Rust (Programming Language)!",
            "https://www.rust-lang.org/learn?x=1",
            "A language empowering everyone",
            "wikipedia",
        );
        assert_eq!(result.domain(), "rust-lang.org");
        assert_eq!(result.normalized_title(), "rust programming language");

        let mut same = result.clone();
        same.url = "https://elsewhere.example".into();
        assert_eq!(result.content_hash(), same.content_hash());
    }

    #[test]
    fn test_clean_html() {
        assert_eq!(
            clean_html("<span class=\"searchmatch\">Rust</span> &amp; Cargo&#39;s   book"),
            "Rust & Cargo's book"
        );
    }

    #[test]
    fn test_recency_score() {
        let now = Utc::now();
        assert_eq!(recency_score(None, now), 0.5);
        assert_eq!(recency_score(Some(now - ChronoDuration::days(3)), now), 1.0);
        assert_eq!(recency_score(Some(now - ChronoDuration::days(4000)), now), 0.3);

        let mid = recency_score(Some(now - ChronoDuration::days(900)), now);
        assert!(mid > 0.3 && mid < 1.0);
    }

    #[test]
    fn test_position_relevance() {
        assert_eq!(position_relevance(0, 5), 1.0);
        assert_eq!(position_relevance(4, 5), 0.5);
        assert_eq!(position_relevance(0, 1), 1.0);
    }

    #[test]
    fn test_build_sources_rejects_unknown() {
        let mut config = SourcesConfig::default();
        config.enabled = vec!["wikipedia".into(), "altavista".into()];
        assert!(build_sources(&config).is_err());

        config.enabled = vec!["wikipedia".into(), "openalex".into()];
        let names: Vec<String> = build_sources(&config)
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["wikipedia", "openalex"]);
    }
}
