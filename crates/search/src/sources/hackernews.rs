//! Hacker News via the Algolia search API

use super::{check_status, clean_html, position_relevance, recency_score, SourceFetcher, SourceResult};
use answerforge_common::errors::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

const API_URL: &str = "https://hn.algolia.com/api/v1/search";
const ITEM_URL: &str = "https://news.ycombinator.com/item?id=";
const BASE_CREDIBILITY: f64 = 0.6;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "objectID")]
    object_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    story_title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    story_text: Option<String>,
    #[serde(default)]
    comment_text: Option<String>,
    #[serde(default)]
    points: Option<i64>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

pub struct HackerNewsSource {
    client: reqwest::Client,
}

impl HackerNewsSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn normalize(response: SearchResponse, now: DateTime<Utc>) -> Vec<SourceResult> {
        let hits: Vec<Hit> = response
            .hits
            .into_iter()
            .filter(|hit| hit.title.is_some() || hit.story_title.is_some())
            .collect();
        let total = hits.len();

        hits.into_iter()
            .enumerate()
            .map(|(index, hit)| {
                let title = hit.title.or(hit.story_title).unwrap_or_default();
                let url = hit
                    .url
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(|| format!("{}{}", ITEM_URL, hit.object_id));
                let text = hit.story_text.or(hit.comment_text).unwrap_or_default();
                let snippet: String = clean_html(&text).chars().take(400).collect();
                let points = hit.points.unwrap_or(0).max(0) as f64;

                let mut result = SourceResult::new(clean_html(&title), url, snippet, "hackernews");
                result.timestamp = hit.created_at;
                result.relevance_score = position_relevance(index, total);
                result.credibility_score = (BASE_CREDIBILITY + (points + 1.0).log10() * 0.05).min(0.8);
                result.recency_score = recency_score(hit.created_at, now);
                result
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SourceFetcher for HackerNewsSource {
    fn name(&self) -> &str {
        "hackernews"
    }

    async fn fetch(&self, query: &str, limit: usize) -> Result<Vec<SourceResult>> {
        let per_page = limit.clamp(1, 100).to_string();
        let response = self
            .client
            .get(API_URL)
            .query(&[
                ("query", query),
                ("tags", "story"),
                ("hitsPerPage", per_page.as_str()),
            ])
            .send()
            .await?;

        let body: SearchResponse = check_status(self.name(), response).await?.json().await?;
        let results = Self::normalize(body, Utc::now());

        debug!(source = "hackernews", count = results.len(), "Fetched results");
        Ok(results)
    }
}
