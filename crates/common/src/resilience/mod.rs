//! Resilience layer
//!
//! Error classification, circuit breakers, retry with exponential backoff,
//! rolling error monitoring and sanitized client-facing error responses.
//! [`Resilience`] owns one of each and is shared by the aggregator and the
//! pipeline.

mod breaker;
mod classify;
mod monitor;
mod retry;

pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
};
pub use classify::{
    classify_base, classify_message, classify_status, sanitize, ApiErrorHandler,
    DatabaseErrorHandler, ErrorCategory, ErrorContext, ErrorHandler, ErrorInfo, ErrorResponse,
    ErrorSeverity, ModelErrorHandler,
};
pub use monitor::{AlertThresholds, ErrorAlert, ErrorMonitor};
pub use retry::{CriticalOperation, CriticalOperationError, RetryPolicy};

use crate::config::ResilienceConfig;
use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which handler classifies a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// External knowledge-source HTTP APIs
    Api,
    /// Language-model inference
    Model,
    /// Caches and other storage
    Database,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Api => "api",
            OperationType::Model => "model",
            OperationType::Database => "database",
        }
    }
}

pub struct Resilience {
    policy: RetryPolicy,
    breakers: CircuitBreakerRegistry,
    monitor: ErrorMonitor,
    api: ApiErrorHandler,
    model: ModelErrorHandler,
    database: DatabaseErrorHandler,
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new(&ResilienceConfig::default())
    }
}

impl Resilience {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            policy: RetryPolicy::from_config(config),
            breakers: CircuitBreakerRegistry::new(CircuitBreakerConfig::from(config)),
            monitor: ErrorMonitor::default(),
            api: ApiErrorHandler,
            model: ModelErrorHandler,
            database: DatabaseErrorHandler,
        }
    }

    pub fn shared(config: &ResilienceConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn handler(&self, kind: OperationType) -> &dyn ErrorHandler {
        match kind {
            OperationType::Api => &self.api,
            OperationType::Model => &self.model,
            OperationType::Database => &self.database,
        }
    }

    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers.get(service)
    }

    pub fn monitor(&self) -> &ErrorMonitor {
        &self.monitor
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start building a guarded call against `service`
    pub fn operation<T>(
        &self,
        kind: OperationType,
        service: &str,
        operation: &str,
    ) -> CriticalOperation<'_, T> {
        CriticalOperation::new(
            self,
            kind,
            ErrorContext::new(service, operation),
            self.policy.clone(),
        )
    }

    /// Classify, record and project an error into its client-facing form
    pub fn handle(&self, kind: OperationType, err: &AppError, ctx: &ErrorContext) -> ErrorResponse {
        let handler = self.handler(kind);
        let info = handler.classify(err);
        self.monitor.record(&info, ctx);
        handler.handle(err, ctx)
    }

    /// Breaker state per service, sorted by name
    pub fn circuit_status(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_records_to_monitor() {
        let resilience = Resilience::default();
        let ctx = ErrorContext::new("cache", "get");
        let response = resilience.handle(
            OperationType::Database,
            &AppError::internal("deadlock detected"),
            &ctx,
        );

        assert_eq!(response.error_type, ErrorCategory::Deadlock);
        assert_eq!(resilience.monitor().snapshot().get("deadlock:medium"), Some(&1));
    }

    #[test]
    fn test_handlers_by_kind() {
        let resilience = Resilience::default();
        assert_eq!(
            resilience.handler(OperationType::Model).operation_type(),
            OperationType::Model
        );
        assert_eq!(OperationType::Database.as_str(), "database");
    }

    #[test]
    fn test_circuit_status_lists_touched_services() {
        let resilience = Resilience::default();
        resilience.breaker("wikipedia").on_failure();
        let status = resilience.circuit_status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].state, CircuitState::Closed);
        assert_eq!(status[0].failure_count, 1);
    }
}
