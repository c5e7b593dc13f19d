//! Final-answer cache keyed by normalized query

use crate::models::FinalResult;
use answerforge_common::cache::{keys, CacheSettings};
use answerforge_common::config::AppConfig;
use answerforge_common::errors::Result;
use answerforge_common::{CacheStats, TtlCache};
use std::time::Duration;

pub struct SemanticCache {
    cache: TtlCache,
    ttl: Duration,
}

impl SemanticCache {
    pub fn new(config: &AppConfig) -> Self {
        let ttl_secs = config.pipeline.answer_cache_ttl_secs;
        Self {
            cache: TtlCache::new(CacheSettings::from_config(&config.cache, "answer", ttl_secs)),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub async fn get(&self, query: &str) -> Result<Option<FinalResult>> {
        self.cache.get(&keys::answer(query)).await
    }

    pub async fn set(&self, query: &str, result: &FinalResult) -> Result<()> {
        self.cache.set_with_ttl(&keys::answer(query), result, self.ttl).await
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn clear(&self) -> usize {
        self.cache.clear().await
    }

    pub async fn prune(&self) -> usize {
        self.cache.prune().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResultMetadata;

    #[tokio::test(start_paused = true)]
    async fn test_equivalent_phrasings_share_an_entry() {
        let cache = SemanticCache::new(&AppConfig::default());
        let result = FinalResult {
            success: true,
            answer: Some("Rust is a systems language.".into()),
            error: None,
            confidence: 0.8,
            citations: Vec::new(),
            warnings: Vec::new(),
            metadata: ResultMetadata::empty("trace-1"),
        };

        tokio_test::assert_ok!(cache.set("What is Rust?", &result).await);
        assert_eq!(cache.get("what is rust").await.unwrap(), Some(result));

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert_eq!(cache.get("what is rust").await.unwrap(), None);
        assert_eq!(cache.prune().await, 1);
    }
}
