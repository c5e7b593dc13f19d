//! OpenAlex scholarly works search

use super::{check_status, clean_html, position_relevance, recency_score, SourceFetcher, SourceResult};
use answerforge_common::errors::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

const API_URL: &str = "https://api.openalex.org/works";
const BASE_CREDIBILITY: f64 = 0.85;

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    cited_by_count: i64,
    /// word -> positions
    #[serde(default)]
    abstract_inverted_index: Option<BTreeMap<String, Vec<usize>>>,
}

/// Rebuild abstract text from OpenAlex's inverted index
fn rebuild_abstract(index: &BTreeMap<String, Vec<usize>>) -> String {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str())))
        .collect();
    positioned.sort_by_key(|(p, _)| *p);
    positioned
        .into_iter()
        .map(|(_, w)| w)
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct OpenAlexSource {
    client: reqwest::Client,
}

impl OpenAlexSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn normalize(response: WorksResponse, now: DateTime<Utc>) -> Vec<SourceResult> {
        let works: Vec<Work> = response
            .results
            .into_iter()
            .filter(|w| w.display_name.is_some())
            .collect();
        let total = works.len();

        works
            .into_iter()
            .enumerate()
            .map(|(index, work)| {
                let timestamp = work
                    .publication_date
                    .as_deref()
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc());
                let snippet: String = work
                    .abstract_inverted_index
                    .as_ref()
                    .map(rebuild_abstract)
                    .unwrap_or_default()
                    .chars()
                    .take(500)
                    .collect();
                let url = work.doi.clone().unwrap_or_else(|| work.id.clone());
                let citations = work.cited_by_count.max(0) as f64;

                let mut result = SourceResult::new(
                    clean_html(work.display_name.as_deref().unwrap_or_default()),
                    url,
                    snippet,
                    "openalex",
                );
                result.timestamp = timestamp;
                result.relevance_score = position_relevance(index, total);
                result.credibility_score =
                    (BASE_CREDIBILITY + (citations + 1.0).log10() * 0.03).min(0.98);
                result.recency_score = recency_score(timestamp, now);
                result
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SourceFetcher for OpenAlexSource {
    fn name(&self) -> &str {
        "openalex"
    }

    async fn fetch(&self, query: &str, limit: usize) -> Result<Vec<SourceResult>> {
        let per_page = limit.clamp(1, 200).to_string();
        let response = self
            .client
            .get(API_URL)
            .query(&[("search", query), ("per-page", per_page.as_str())])
            .send()
            .await?;

        let body: WorksResponse = check_status(self.name(), response).await?.json().await?;
        let results = Self::normalize(body, Utc::now());

        debug!(source = "openalex", count = results.len(), "Fetched results");
        Ok(results)
    }
}
