//! In-memory TTL cache
//!
//! Provides:
//! - Generic get/set operations with TTL
//! - JSON-serialized values, so a read returns exactly what was written
//! - Capacity bound with expiry-first eviction
//! - Stats, clear and prune for operational endpoints

use crate::config::CacheConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Cache instance settings
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Default TTL
    pub default_ttl: Duration,
    /// Maximum number of live entries
    pub max_entries: usize,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            key_prefix: "answerforge".to_string(),
        }
    }
}

impl CacheSettings {
    /// Build settings for one named cache from the shared cache config
    pub fn from_config(config: &CacheConfig, namespace: &str, ttl_secs: u64) -> Self {
        Self {
            default_ttl: Duration::from_secs(ttl_secs),
            max_entries: config.max_entries,
            key_prefix: format!("{}:{}", config.key_prefix, namespace),
        }
    }
}

/// Snapshot of cache occupancy and hit rate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
    pub hits: u64,
    pub misses: u64,
    pub max_entries: usize,
}

#[derive(Debug)]
struct CacheEntry {
    json: String,
    expires_at: Instant,
}

/// In-memory TTL cache, safe for concurrent readers
pub struct TtlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    settings: CacheSettings,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache {
    /// Create a new cache
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            settings,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.settings.key_prefix, key)
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key(key);
        let entries = self.entries.read().await;

        match entries.get(&full_key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let parsed = serde_json::from_str(&entry.json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache(true, &self.settings.key_prefix);
                debug!(key = %full_key, "Cache hit");
                Ok(Some(parsed))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache(false, &self.settings.key_prefix);
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Set a value in cache with default TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.settings.default_ttl).await
    }

    /// Set a value in cache with custom TTL
    pub async fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;

        if self.settings.max_entries == 0 {
            return Err(AppError::CacheError {
                message: "Cache capacity is zero".to_string(),
            });
        }

        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&full_key) && entries.len() >= self.settings.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);

            if entries.len() >= self.settings.max_entries {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    warn!(key = %victim, "Cache full, evicting entry closest to expiry");
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(
            full_key.clone(),
            CacheEntry {
                json,
                expires_at: now + ttl,
            },
        );

        debug!(key = %full_key, ttl_secs = ttl.as_secs(), "Cache set");
        Ok(())
    }

    /// Delete a key from cache
    pub async fn delete(&self, key: &str) -> bool {
        let full_key = self.key(key);
        let deleted = self.entries.write().await.remove(&full_key).is_some();
        debug!(key = %full_key, deleted, "Cache delete");
        deleted
    }

    /// Check if a live key exists
    pub async fn exists(&self, key: &str) -> bool {
        let full_key = self.key(key);
        self.entries
            .read()
            .await
            .get(&full_key)
            .map(|entry| entry.expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// Get or set with a loader function
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        // Try to get from cache first
        if let Some(cached) = self.get::<T>(key).await? {
            return Ok(cached);
        }

        // Load from source
        let value = loader().await?;

        // Cache the result
        if let Err(e) = self.set_with_ttl(key, &value, ttl).await {
            warn!(error = %e, "Failed to cache value, continuing without cache");
        }

        Ok(value)
    }

    /// Occupancy and hit counters
    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let expired = entries.values().filter(|e| e.expires_at <= now).count();

        CacheStats {
            entries: entries.len(),
            expired,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            max_entries: self.settings.max_entries,
        }
    }

    /// Remove every entry, returning how many there were
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        debug!(prefix = %self.settings.key_prefix, count, "Cache cleared");
        count
    }

    /// Remove only expired entries, returning how many were removed
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        debug!(prefix = %self.settings.key_prefix, removed, "Cache pruned");
        removed
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Collapse case, punctuation and whitespace so trivially different
    /// phrasings share a key.
    ///
    /// `+`, `#`, `.` and `-` survive inside a token, so `c++`, `c#` and
    /// `node.js` stay distinct; leading and trailing `.`/`-` are dropped.
    pub fn normalize_query(query: &str) -> String {
        query
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '+' | '#' | '.' | '-') {
                    c
                } else {
                    ' '
                }
            })
            .collect::<String>()
            .split_whitespace()
            .map(|w| w.trim_matches(|c| c == '.' || c == '-'))
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Short hex fingerprint of arbitrary parts
    pub fn fingerprint(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let hash = hex::encode(hasher.finalize());
        hash[..32].to_string()
    }

    /// Build a federated search cache key for one or more queries
    pub fn search_batch(queries: &[&str], limit: usize) -> String {
        let mut parts: Vec<String> = queries.iter().map(|q| normalize_query(q)).collect();
        parts.push(limit.to_string());
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
        format!("search:{}", fingerprint(&parts))
    }

    /// Build a final-answer cache key
    pub fn answer(query: &str) -> String {
        format!("answer:{}", fingerprint(&[&normalize_query(query)]))
    }
}
