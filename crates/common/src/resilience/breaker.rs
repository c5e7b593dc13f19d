//! Circuit breakers, one per logical service
//!
//! CLOSED lets calls through and counts failures. Reaching the failure
//! threshold opens the circuit. An OPEN circuit blocks calls until
//! `recovery_timeout` has passed since the last failure, then reports
//! HALF_OPEN and lets trial requests through. The next success closes it again.

use crate::config::ResilienceConfig;
use crate::metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&ResilienceConfig> for CircuitBreakerConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout(),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Point-in-time view of a breaker for status endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub seconds_since_last_failure: Option<f64>,
}

pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether a call may go through right now
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state != CircuitState::Open
    }

    /// Current state, with an elapsed recovery window reported as HALF_OPEN
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;

        if previous != CircuitState::Closed {
            info!(service = %self.service, from = previous.as_str(), "Circuit closed");
            metrics::record_circuit_transition(&self.service, CircuitState::Closed.as_str());
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            inner.state = CircuitState::Open;
            warn!(
                service = %self.service,
                failures = inner.failure_count,
                recovery_secs = self.config.recovery_timeout.as_secs(),
                "Circuit opened"
            );
            metrics::record_circuit_transition(&self.service, CircuitState::Open.as_str());
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        CircuitSnapshot {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            seconds_since_last_failure: inner.last_failure.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }

        let recovered = inner
            .last_failure
            .map(|t| t.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(true);

        if recovered {
            inner.state = CircuitState::HalfOpen;
            info!(service = %self.service, "Circuit half-open, allowing trial request");
            metrics::record_circuit_transition(&self.service, CircuitState::HalfOpen.as_str());
        }
    }
}

/// Lazily creates one breaker per service name
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.config.clone())))
            .clone()
    }

    /// Snapshots sorted by service name
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.lock().values().cloned().collect();
        let mut snapshots: Vec<CircuitSnapshot> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}
