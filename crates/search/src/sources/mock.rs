//! Deterministic in-process source for tests and offline runs

use super::{SourceFetcher, SourceResult};
use answerforge_common::errors::{AppError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Serve these results (truncated to the requested limit)
    Results(Vec<SourceResult>),
    /// Synthesize results that echo the query
    Echo,
    /// Fail every call with this upstream status
    Fail { status: u16 },
    /// Fail queries containing `needle`, echo the rest
    FailOn { needle: String, status: u16 },
    /// Sleep, then serve the results
    Slow {
        delay: Duration,
        results: Vec<SourceResult>,
    },
}

pub struct MockSource {
    name: String,
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new(name: impl Into<String>, behavior: MockBehavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_results(name: impl Into<String>, results: Vec<SourceResult>) -> Self {
        Self::new(name, MockBehavior::Results(results))
    }

    pub fn echo(name: impl Into<String>) -> Self {
        Self::new(name, MockBehavior::Echo)
    }

    pub fn failing(name: impl Into<String>, status: u16) -> Self {
        Self::new(name, MockBehavior::Fail { status })
    }

    pub fn failing_on(name: impl Into<String>, needle: impl Into<String>, status: u16) -> Self {
        Self::new(
            name,
            MockBehavior::FailOn {
                needle: needle.into(),
                status,
            },
        )
    }

    pub fn slow(name: impl Into<String>, delay: Duration, results: Vec<SourceResult>) -> Self {
        Self::new(name, MockBehavior::Slow { delay, results })
    }

    /// Number of fetches served so far, including failed ones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn failure(&self, status: u16) -> AppError {
        AppError::Upstream {
            service: self.name.clone(),
            status,
            message: "mock failure".to_string(),
        }
    }

    fn echo_results(&self, query: &str, limit: usize) -> Vec<SourceResult> {
        let count = limit.min(3);
        // Titles stay short so echoes never collapse into each other in dedup
        let topic: Vec<&str> = query.split_whitespace().take(2).collect();
        let topic = topic.join(" ");
        (0..count)
            .map(|i| {
                let mut result = SourceResult::new(
                    format!("{} entry {} on {}", self.name, i + 1, topic),
                    format!("https://{}.example/{}/{}", self.name, i + 1, query.replace(' ', "-")),
                    format!(
                        "{} is discussed here in detail by {}. This entry {} summarizes what is known about {}.",
                        query,
                        self.name,
                        i + 1,
                        query
                    ),
                    self.name.clone(),
                );
                result.relevance_score = super::position_relevance(i, count);
                result.credibility_score = 0.8;
                result
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SourceFetcher for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, query: &str, limit: usize) -> Result<Vec<SourceResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Results(results) => Ok(results.iter().take(limit).cloned().collect()),
            MockBehavior::Echo => Ok(self.echo_results(query, limit)),
            MockBehavior::Fail { status } => Err(self.failure(*status)),
            MockBehavior::FailOn { needle, status } => {
                if query.contains(needle.as_str()) {
                    Err(self.failure(*status))
                } else {
                    Ok(self.echo_results(query, limit))
                }
            }
            MockBehavior::Slow { delay, results } => {
                tokio::time::sleep(*delay).await;
                Ok(results.iter().take(limit).cloned().collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let source = MockSource::echo("alpha");
        let results = source.fetch("rust traits", 10).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "alpha entry 1 on rust traits");
        assert!(results[0].snippet.contains("rust traits"));

        let failing = MockSource::failing("beta", 503);
        assert!(failing.fetch("q", 5).await.is_err());
        assert_eq!(source.calls() + failing.calls(), 2);
    }
}
