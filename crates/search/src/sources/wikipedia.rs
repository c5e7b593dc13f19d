//! Wikipedia via the MediaWiki search API

use super::{check_status, clean_html, position_relevance, recency_score, SourceFetcher, SourceResult};
use answerforge_common::errors::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

const API_URL: &str = "https://en.wikipedia.org/w/api.php";
const ARTICLE_URL: &str = "https://en.wikipedia.org/wiki/";
const BASE_CREDIBILITY: f64 = 0.85;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<QueryBlock>,
}

#[derive(Debug, Deserialize)]
struct QueryBlock {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

pub struct WikipediaSource {
    client: reqwest::Client,
}

impl WikipediaSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn normalize(response: SearchResponse, now: DateTime<Utc>) -> Vec<SourceResult> {
        let hits = response.query.map(|q| q.search).unwrap_or_default();
        let total = hits.len();

        hits.into_iter()
            .enumerate()
            .map(|(index, hit)| {
                let url = format!("{}{}", ARTICLE_URL, hit.title.replace(' ', "_"));
                let mut result =
                    SourceResult::new(clean_html(&hit.title), url, clean_html(&hit.snippet), "wikipedia");
                result.timestamp = hit.timestamp;
                result.relevance_score = position_relevance(index, total);
                result.credibility_score = BASE_CREDIBILITY;
                result.recency_score = recency_score(hit.timestamp, now);
                result
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SourceFetcher for WikipediaSource {
    fn name(&self) -> &str {
        "wikipedia"
    }

    async fn fetch(&self, query: &str, limit: usize) -> Result<Vec<SourceResult>> {
        let limit = limit.clamp(1, 50).to_string();
        let response = self
            .client
            .get(API_URL)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("format", "json"),
                ("utf8", "1"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
            ])
            .send()
            .await?;

        let body: SearchResponse = check_status(self.name(), response).await?.json().await?;
        let results = Self::normalize(body, Utc::now());

        debug!(source = "wikipedia", count = results.len(), "Fetched results");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_search_response() {
        let body: SearchResponse = serde_json::from_value(serde_json::json!({
            "query": {"search": [
                {"title": "Rust (programming language)",
                 "snippet": "<span class=\"searchmatch\">Rust</span> is a general-purpose language",
                 "timestamp": "2024-05-01T10:00:00Z"},
                {"title": "Rust", "snippet": "Iron oxide"}
            ]}
        }))
        .unwrap();

        let results = WikipediaSource::normalize(body, Utc::now());
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].url,
            "https://en.wikipedia.org/wiki/Rust_(programming_language)"
        );
        assert_eq!(results[0].snippet, "Rust is a general-purpose language");
        assert!(results[0].relevance_score > results[1].relevance_score);
        assert_eq!(results[1].recency_score, 0.5);
    }

    #[test]
    fn test_missing_query_block_is_empty() {
        let body: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(WikipediaSource::normalize(body, Utc::now()).is_empty());
    }
}
