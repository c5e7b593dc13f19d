//! Per-source admission control
//!
//! Sliding window of request timestamps plus failure-driven exponential
//! backoff: after `n` consecutive failures the source is blocked for
//! `min(60 * 2^n, 3600)` seconds. A success clears the backoff.

use answerforge_common::config::RateLimitConfig;
use answerforge_common::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const BACKOFF_UNIT_SECS: u64 = 60;
const MAX_BACKOFF_SECS: u64 = 3600;

#[derive(Debug, Default)]
struct RateLimiterState {
    request_timestamps: VecDeque<Instant>,
    backoff_until: Option<Instant>,
    consecutive_failures: u32,
}

/// Health view of one limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterStatus {
    pub available: bool,
    pub backoff_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub requests_in_window: usize,
    pub max_requests: usize,
}

pub struct SourceRateLimiter {
    source: String,
    max_requests: usize,
    window: Duration,
    state: Mutex<RateLimiterState>,
}

impl SourceRateLimiter {
    pub fn new(source: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            source: source.into(),
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            state: Mutex::new(RateLimiterState::default()),
        }
    }

    /// Admit one request if the source is neither backing off nor over its
    /// window quota. An admitted request is counted immediately; a denial is
    /// `AppError::RateLimited` carrying the wait until the next admission.
    pub fn acquire(&self) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(until) = state.backoff_until.filter(|until| now < *until) {
            debug!(source = %self.source, "Source backing off, request denied");
            return Err(self.denied(until - now));
        }

        self.evict(&mut state, now);
        if state.request_timestamps.len() >= self.max_requests {
            debug!(
                source = %self.source,
                max_requests = self.max_requests,
                "Rate limit window full, request denied"
            );
            let wait = state
                .request_timestamps
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            return Err(self.denied(wait));
        }

        state.request_timestamps.push_back(now);
        Ok(())
    }

    fn denied(&self, wait: Duration) -> AppError {
        AppError::RateLimited {
            service: self.source.clone(),
            retry_after_secs: Some(wait.as_secs_f64().ceil() as u64),
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.backoff_until = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let delay = Self::backoff_for(state.consecutive_failures);
        state.backoff_until = Some(Instant::now() + delay);

        warn!(
            source = %self.source,
            consecutive_failures = state.consecutive_failures,
            backoff_secs = delay.as_secs(),
            "Source failed, backing off"
        );
    }

    /// `min(60 * 2^failures, 3600)` seconds
    pub fn backoff_for(failures: u32) -> Duration {
        let factor = 2u64.checked_pow(failures).unwrap_or(u64::MAX);
        let secs = BACKOFF_UNIT_SECS.saturating_mul(factor).min(MAX_BACKOFF_SECS);
        Duration::from_secs(secs)
    }

    pub fn status(&self) -> LimiterStatus {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.evict(&mut state, now);

        let remaining = state
            .backoff_until
            .filter(|until| *until > now)
            .map(|until| until - now);
        let backoff_until = remaining
            .and_then(|r| chrono::Duration::from_std(r).ok())
            .map(|r| Utc::now() + r);

        LimiterStatus {
            available: remaining.is_none() && state.request_timestamps.len() < self.max_requests,
            backoff_until,
            consecutive_failures: state.consecutive_failures,
            requests_in_window: state.request_timestamps.len(),
            max_requests: self.max_requests,
        }
    }

    /// Remaining backoff, if any
    pub fn backoff_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        self.state
            .lock()
            .backoff_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    fn evict(&self, state: &mut RateLimiterState, now: Instant) {
        while let Some(front) = state.request_timestamps.front() {
            if now.duration_since(*front) >= self.window {
                state.request_timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
