//! Critical-operation wrapper
//!
//! Runs an external call under a per-attempt timeout, consults the circuit
//! breaker before every attempt, retries retryable failures with exponential
//! backoff, and on exhaustion returns the configured fallback or a typed
//! [`CriticalOperationError`].

use super::classify::{ErrorContext, ErrorResponse, ErrorSeverity};
use super::{OperationType, Resilience};
use crate::config::ResilienceConfig;
use crate::errors::{AppError, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Retry and timeout policy for one wrapped call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First retry delay; doubles on each further retry
    pub backoff_base: Duration,
    /// Upper bound for one retry delay
    pub backoff_max: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            timeout: config.operation_timeout(),
        }
    }

    /// Single attempt, no retries
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            timeout,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deterministic exponential schedule: base, 2*base, 4*base ... capped
    pub fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.backoff_base,
            initial_interval: self.backoff_base,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.backoff_max.max(self.backoff_base),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        backoff.reset();
        backoff
    }

    /// Sum of the delays slept between attempts
    pub fn retry_delays(&self) -> Duration {
        let mut backoff = self.backoff();
        (0..self.max_retries)
            .map(|_| backoff.next_backoff().unwrap_or(self.backoff_max))
            .sum()
    }

    /// Longest a guarded call can run: every attempt times out
    pub fn worst_case(&self) -> Duration {
        self.timeout * (self.max_retries + 1) + self.retry_delays()
    }

    /// Narrows the policy so [`worst_case`](Self::worst_case) fits in `budget`.
    ///
    /// Drops retries first, and keeps a retry only while every attempt still
    /// gets at least half of its usual timeout. A single attempt is capped at
    /// `budget`.
    pub fn fit_within(&self, budget: Duration) -> Self {
        if self.worst_case() <= budget {
            return self.clone();
        }

        let floor = self.timeout.min(budget) / 2;
        for retries in (1..=self.max_retries).rev() {
            let candidate = self.clone().with_max_retries(retries);
            let delays = candidate.retry_delays();
            if delays >= budget {
                continue;
            }
            let per_attempt = (budget - delays) / (retries + 1);
            if per_attempt >= floor {
                return candidate.with_timeout(self.timeout.min(per_attempt));
            }
        }

        self.clone()
            .with_max_retries(0)
            .with_timeout(self.timeout.min(budget))
    }
}

/// Raised when a wrapped call is exhausted and no fallback was configured
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{operation} on {service} failed after {attempts} attempt(s): {}", .response.error)]
pub struct CriticalOperationError {
    pub operation: String,
    pub service: String,
    pub attempts: u32,
    pub severity: ErrorSeverity,
    pub response: ErrorResponse,
}

/// Builder for one guarded call; see [`Resilience::operation`]
pub struct CriticalOperation<'a, T> {
    resilience: &'a Resilience,
    kind: OperationType,
    context: ErrorContext,
    policy: RetryPolicy,
    fallback: Option<T>,
    fallback_data: Option<serde_json::Value>,
}

impl<'a, T> CriticalOperation<'a, T> {
    pub(crate) fn new(
        resilience: &'a Resilience,
        kind: OperationType,
        context: ErrorContext,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            resilience,
            kind,
            context,
            policy,
            fallback: None,
            fallback_data: None,
        }
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Value returned instead of an error once retries are exhausted
    pub fn fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Data attached to the client-facing error for graceful degradation
    pub fn fallback_data(mut self, data: serde_json::Value) -> Self {
        self.fallback_data = Some(data);
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.context.request_id = request_id.into();
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.context.user_id = Some(user_id.into());
        self
    }

    /// Run the operation under the configured policy
    pub async fn run<F, Fut>(self, mut op: F) -> std::result::Result<T, CriticalOperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handler = self.resilience.handler(self.kind);
        let breaker = self.resilience.breaker(&self.context.service);
        let mut backoff = self.policy.backoff();
        let mut attempts: u32 = 0;

        let last_error = loop {
            if !breaker.can_execute() {
                debug!(service = %self.context.service, "Circuit open, failing fast");
                break AppError::CircuitBreakerOpen {
                    service: self.context.service.clone(),
                };
            }

            attempts += 1;
            let err = match tokio::time::timeout(self.policy.timeout, op()).await {
                Ok(Ok(value)) => {
                    breaker.on_success();
                    if attempts > 1 {
                        info!(
                            service = %self.context.service,
                            operation = %self.context.operation,
                            attempts,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Ok(Err(err)) => err,
                Err(_) => AppError::Timeout {
                    operation: format!("{}.{}", self.context.service, self.context.operation),
                    timeout_ms: self.policy.timeout.as_millis() as u64,
                },
            };

            breaker.on_failure();

            if !handler.should_retry(&err) || attempts > self.policy.max_retries {
                break err;
            }

            let delay = backoff.next_backoff().unwrap_or(self.policy.backoff_max);
            warn!(
                service = %self.context.service,
                operation = %self.context.operation,
                attempt = attempts,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %super::sanitize(&err.to_string()),
                "Operation failed, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        let severity = handler.classify(&last_error).severity;
        let mut response = self.resilience.handle(self.kind, &last_error, &self.context);

        if let Some(fallback) = self.fallback {
            info!(
                service = %self.context.service,
                operation = %self.context.operation,
                attempts,
                error_type = response.error_type.as_str(),
                "Operation exhausted, returning fallback"
            );
            return Ok(fallback);
        }

        response.fallback_data = self.fallback_data;
        Err(CriticalOperationError {
            operation: self.context.operation,
            service: self.context.service,
            attempts,
            severity,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilienceConfig;
    use crate::resilience::{CircuitState, ErrorCategory};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn resilience() -> Resilience {
        Resilience::new(&ResilienceConfig::default())
    }

    #[test]
    fn test_backoff_schedule_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(60),
            timeout: Duration::from_secs(1),
        };
        let mut backoff = policy.backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(8)));
    }

    #[test]
    fn test_fit_within_bounds_worst_case() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.worst_case(), Duration::from_secs(54));

        let budget = Duration::from_millis(13_500);
        let fitted = policy.fit_within(budget);
        assert_eq!(fitted.max_retries, 1);
        assert_eq!(fitted.timeout, Duration::from_millis(5_750));
        assert!(fitted.worst_case() <= budget);

        let roomy = policy.fit_within(Duration::from_secs(120));
        assert_eq!(roomy, policy);

        let tight = policy.fit_within(Duration::from_secs(3));
        assert_eq!(tight.max_retries, 0);
        assert_eq!(tight.timeout, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_returns_fallback() {
        let resilience = resilience();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = resilience
            .operation::<String>(OperationType::Api, "slow-service", "lookup")
            .max_retries(2)
            .timeout(Duration::from_secs(1))
            .fallback("fallback answer".to_string())
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("too late".to_string())
                }
            })
            .await;

        assert_eq!(result.unwrap(), "fallback answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_without_fallback_is_typed_error() {
        let resilience = resilience();

        let result = resilience
            .operation::<u32>(OperationType::Api, "flaky", "fetch")
            .max_retries(1)
            .fallback_data(serde_json::json!({"results": []}))
            .run(|| async {
                Err(AppError::Upstream {
                    service: "flaky".into(),
                    status: 503,
                    message: "unavailable".into(),
                })
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.response.error_type, ErrorCategory::ServerError);
        assert!(err.response.retryable);
        assert!(err.response.fallback_data.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let resilience = resilience();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = resilience
            .operation::<u32>(OperationType::Api, "secured", "fetch")
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::Upstream {
                        service: "secured".into(),
                        status: 401,
                        message: "bad key".into(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.unwrap_err().response.error_type,
            ErrorCategory::Authentication
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast() {
        let resilience = resilience();
        let breaker = resilience.breaker("down");
        for _ in 0..5 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = resilience
            .operation::<u32>(OperationType::Api, "down", "fetch")
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            result.unwrap_err().response.error_type,
            ErrorCategory::CircuitOpen
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry_closes_breaker() {
        let resilience = resilience();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = resilience
            .operation::<u32>(OperationType::Api, "bumpy", "fetch")
            .run(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AppError::Timeout {
                            operation: "bumpy.fetch".into(),
                            timeout_ms: 10,
                        })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        let value = tokio_test::assert_ok!(result);
        assert_eq!(value, 42);
        assert_eq!(resilience.breaker("bumpy").failure_count(), 0);
    }
}
