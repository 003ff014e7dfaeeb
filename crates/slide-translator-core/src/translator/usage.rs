use serde::{Deserialize, Serialize};

use super::traits::TokenUsage;
use crate::config::PricingConfig;

/// Running totals of backend calls and tokens for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTracker {
    pub api_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTracker {
    /// Count one call. Backends that report no usage still count as a call.
    pub fn record(&mut self, usage: Option<TokenUsage>) {
        self.api_calls += 1;
        if let Some(usage) = usage {
            self.input_tokens += usage.input_tokens;
            self.output_tokens += usage.output_tokens;
        }
    }

    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Estimated spend in dollars.
    #[allow(clippy::cast_precision_loss)]
    pub fn estimated_cost(&self, pricing: &PricingConfig) -> f64 {
        (self.input_tokens as f64 / 1_000_000.0) * pricing.input_per_million
            + (self.output_tokens as f64 / 1_000_000.0) * pricing.output_per_million
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_cost() {
        let mut usage = UsageTracker::default();
        usage.record(Some(TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 200_000,
        }));
        usage.record(None);

        assert_eq!(usage.api_calls, 2);
        assert_eq!(usage.total_tokens(), 1_200_000);

        let cost = usage.estimated_cost(&PricingConfig::default());
        assert!((cost - 6.0).abs() < 1e-9);
    }
}
