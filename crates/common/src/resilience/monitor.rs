//! Rolling error-rate monitor
//!
//! Counts handled errors per category and severity over a one-hour window
//! and raises an alert log line when a severity threshold is crossed.

use super::classify::{ErrorCategory, ErrorContext, ErrorInfo, ErrorSeverity};
use crate::metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Errors per window that trigger an alert, by severity
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical: 5,
            high: 10,
            medium: 20,
        }
    }
}

impl AlertThresholds {
    fn for_severity(&self, severity: ErrorSeverity) -> Option<usize> {
        match severity {
            ErrorSeverity::Critical => Some(self.critical),
            ErrorSeverity::High => Some(self.high),
            ErrorSeverity::Medium => Some(self.medium),
            ErrorSeverity::Low => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAlert {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub count: usize,
    pub window_secs: u64,
    pub service: String,
}

type ErrorKey = (ErrorCategory, ErrorSeverity);

pub struct ErrorMonitor {
    window: Duration,
    thresholds: AlertThresholds,
    events: Mutex<HashMap<ErrorKey, VecDeque<Instant>>>,
}

impl Default for ErrorMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), AlertThresholds::default())
    }
}

impl ErrorMonitor {
    pub fn new(window: Duration, thresholds: AlertThresholds) -> Self {
        Self {
            window,
            thresholds,
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Record one handled error; returns the alert when this error crosses
    /// its severity threshold
    pub fn record(&self, info: &ErrorInfo, ctx: &ErrorContext) -> Option<ErrorAlert> {
        metrics::record_error(info.category.as_str(), info.severity.as_str());

        let now = Instant::now();
        let count = {
            let mut events = self.events.lock();
            let bucket = events.entry((info.category, info.severity)).or_default();
            Self::evict(bucket, now, self.window);
            bucket.push_back(now);
            bucket.len()
        };

        let threshold = self.thresholds.for_severity(info.severity)?;
        if count != threshold {
            return None;
        }

        let alert = ErrorAlert {
            category: info.category,
            severity: info.severity,
            count,
            window_secs: self.window.as_secs(),
            service: ctx.service.clone(),
        };

        tracing::error!(
            alert = true,
            category = info.category.as_str(),
            severity = info.severity.as_str(),
            count,
            window_secs = alert.window_secs,
            service = %ctx.service,
            "Error rate threshold crossed"
        );

        Some(alert)
    }

    /// Live counts keyed by `category:severity`
    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        let now = Instant::now();
        let mut events = self.events.lock();
        let mut counts = BTreeMap::new();

        for ((category, severity), bucket) in events.iter_mut() {
            Self::evict(bucket, now, self.window);
            if !bucket.is_empty() {
                counts.insert(
                    format!("{}:{}", category.as_str(), severity.as_str()),
                    bucket.len(),
                );
            }
        }

        counts
    }

    fn evict(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = bucket.front() {
            if now.duration_since(*front) >= window {
                bucket.pop_front();
            } else {
                break;
            }
        }
    }
}
