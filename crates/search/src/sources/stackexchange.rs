//! StackExchange `/2.3/search/advanced`

use super::{check_status, clean_html, position_relevance, recency_score, SourceFetcher, SourceResult};
use answerforge_common::errors::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

const API_URL: &str = "https://api.stackexchange.com/2.3/search/advanced";
const BASE_CREDIBILITY: f64 = 0.7;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Question>,
    #[serde(default)]
    quota_remaining: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Question {
    title: String,
    link: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    excerpt: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    is_answered: bool,
    #[serde(default)]
    last_activity_date: Option<i64>,
}

pub struct StackExchangeSource {
    client: reqwest::Client,
    site: String,
}

impl StackExchangeSource {
    pub fn new(client: reqwest::Client, site: impl Into<String>) -> Self {
        Self {
            client,
            site: site.into(),
        }
    }

    /// Baseline plus a bounded bonus for an accepted-style, upvoted question
    fn credibility(question: &Question) -> f64 {
        let votes = (question.score.max(0) as f64 + 1.0).log10() * 0.05;
        let answered = if question.is_answered { 0.05 } else { 0.0 };
        (BASE_CREDIBILITY + votes.min(0.15) + answered).min(0.95)
    }

    fn normalize(response: SearchResponse, now: DateTime<Utc>) -> Vec<SourceResult> {
        let total = response.items.len();

        response
            .items
            .into_iter()
            .enumerate()
            .map(|(index, question)| {
                let text = question
                    .excerpt
                    .as_deref()
                    .or(question.body.as_deref())
                    .unwrap_or_default();
                let snippet: String = clean_html(text).chars().take(400).collect();
                let timestamp = question
                    .last_activity_date
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

                let mut result = SourceResult::new(
                    clean_html(&question.title),
                    question.link.clone(),
                    snippet,
                    "stackexchange",
                );
                result.timestamp = timestamp;
                result.relevance_score = position_relevance(index, total);
                result.credibility_score = Self::credibility(&question);
                result.recency_score = recency_score(timestamp, now);
                result
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SourceFetcher for StackExchangeSource {
    fn name(&self) -> &str {
        "stackexchange"
    }

    async fn fetch(&self, query: &str, limit: usize) -> Result<Vec<SourceResult>> {
        let pagesize = limit.clamp(1, 100).to_string();
        let response = self
            .client
            .get(API_URL)
            .query(&[
                ("order", "desc"),
                ("sort", "relevance"),
                ("q", query),
                ("site", self.site.as_str()),
                ("pagesize", pagesize.as_str()),
                ("filter", "withbody"),
            ])
            .send()
            .await?;

        let body: SearchResponse = check_status(self.name(), response).await?.json().await?;
        if let Some(quota) = body.quota_remaining {
            debug!(source = "stackexchange", quota_remaining = quota, "Quota");
        }
        let results = Self::normalize(body, Utc::now());

        debug!(source = "stackexchange", count = results.len(), "Fetched results");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_questions() {
        let body: SearchResponse = serde_json::from_value(serde_json::json!({
            "items": [
                {"title": "How do I use &quot;lifetimes&quot;?",
                 "link": "https://stackoverflow.com/q/1",
                 "body": "<p>Lifetimes describe how long references are valid</p>",
                 "score": 120, "is_answered": true, "last_activity_date": 1700000000},
                {"title": "Borrow checker", "link": "https://stackoverflow.com/q/2", "score": 0}
            ],
            "quota_remaining": 290
        }))
        .unwrap();

        let results = StackExchangeSource::normalize(body, Utc::now());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "How do I use \"lifetimes\"?");
        assert!(results[0].timestamp.is_some());
        assert!(results[0].credibility_score > results[1].credibility_score);
        assert!(results[0].credibility_score <= 0.95);
        assert_eq!(results[1].snippet, "");
    }
}
