//! Token and cost budget per query
//!
//! The total grows linearly with query length and is clamped to the
//! configured bounds, then split across stages by fixed shares.

use crate::models::StageName;
use answerforge_common::config::BudgetConfig;
use answerforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Share of the total budget granted to each stage, in percent
const STAGE_SHARES: [(StageName, usize); 4] = [
    (StageName::Retrieval, 10),
    (StageName::FactCheck, 20),
    (StageName::Synthesis, 55),
    (StageName::Citation, 15),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub total_tokens: usize,
    pub estimated_cost_usd: f64,
    pub allocations: BTreeMap<StageName, usize>,
}

impl Budget {
    pub fn for_stage(&self, stage: StageName) -> usize {
        self.allocations.get(&stage).copied().unwrap_or(0)
    }
}

pub struct TokenBudgetController {
    config: BudgetConfig,
}

impl TokenBudgetController {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    pub fn allocate(&self, query: &str) -> Result<Budget> {
        if self.config.min_tokens > self.config.max_tokens {
            return Err(AppError::Configuration {
                message: format!(
                    "budget min_tokens ({}) exceeds max_tokens ({})",
                    self.config.min_tokens, self.config.max_tokens
                ),
            });
        }

        let chars = query.trim().chars().count();
        let raw = self
            .config
            .base_tokens
            .saturating_add(chars.saturating_mul(self.config.tokens_per_char));
        let total_tokens = raw.clamp(self.config.min_tokens, self.config.max_tokens);

        let allocations = STAGE_SHARES
            .iter()
            .map(|(stage, share)| (*stage, total_tokens * share / 100))
            .collect();

        Ok(Budget {
            total_tokens,
            estimated_cost_usd: total_tokens as f64 / 1000.0 * self.config.cost_per_1k_tokens_usd,
            allocations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_grows_with_query_length() {
        let controller = TokenBudgetController::new(BudgetConfig::default());
        let short = controller.allocate("what is rust").unwrap();
        let long = controller.allocate(&"why ".repeat(100)).unwrap();

        assert_eq!(short.total_tokens, 1500 + 12 * 8);
        assert!(long.total_tokens > short.total_tokens);
        assert_eq!(long.total_tokens, 1500 + 399 * 8);
        assert!(short.for_stage(StageName::Synthesis) > short.for_stage(StageName::Retrieval));
    }

    #[test]
    fn test_budget_is_clamped() {
        let controller = TokenBudgetController::new(BudgetConfig::default());
        let huge = controller.allocate(&"x".repeat(2000)).unwrap();
        assert_eq!(huge.total_tokens, 8000);
        assert!((huge.estimated_cost_usd - 0.016).abs() < 1e-9);
    }

    #[test]
    fn test_inverted_bounds_are_a_configuration_error() {
        let config = BudgetConfig {
            min_tokens: 9000,
            max_tokens: 100,
            ..BudgetConfig::default()
        };
        let err = TokenBudgetController::new(config).allocate("q").unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}
