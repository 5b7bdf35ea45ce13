//! # Retry Policy Registry
//!
//! Per-event-type retry parameters and the delay formula the retry
//! scheduler uses when republishing a failed event.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::events::event_types;

/// Exponential-backoff retry policy for one event type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_seconds: 1.0,
            max_delay_seconds: 300.0,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// `delay = min(initial * multiplier^(attempt-1), max)`, then if
    /// `jitter` is set, add up to 20% extra (purely additive — jitter never
    /// reduces the delay below the computed base).
    pub fn calculate_delay(&self, attempt_number: u32) -> f64 {
        let attempt = attempt_number.max(1);
        let base = self.initial_delay_seconds
            * self.backoff_multiplier.powi((attempt - 1) as i32);
        let capped = base.min(self.max_delay_seconds);
        if self.jitter {
            let jitter_fraction: f64 = rand::thread_rng().gen_range(0.0..0.2);
            capped + capped * jitter_fraction
        } else {
            capped
        }
    }
}

/// Maps event type to its retry policy, falling back to a global default
/// for unrecognized types.
pub struct RetryPolicyRegistry {
    policies: HashMap<String, RetryPolicy>,
    default_policy: RetryPolicy,
}

impl Default for RetryPolicyRegistry {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            event_types::EXCEPTION_INGESTED.to_string(),
            RetryPolicy {
                max_retries: 5,
                initial_delay_seconds: 2.0,
                max_delay_seconds: 600.0,
                backoff_multiplier: 2.0,
                jitter: true,
            },
        );
        policies.insert(
            event_types::TOOL_EXECUTION_REQUESTED.to_string(),
            RetryPolicy {
                max_retries: 3,
                initial_delay_seconds: 1.0,
                max_delay_seconds: 300.0,
                backoff_multiplier: 2.0,
                jitter: true,
            },
        );
        policies.insert(
            event_types::FEEDBACK_CAPTURED.to_string(),
            RetryPolicy {
                max_retries: 2,
                initial_delay_seconds: 0.5,
                max_delay_seconds: 60.0,
                backoff_multiplier: 2.0,
                jitter: true,
            },
        );
        Self {
            policies,
            default_policy: RetryPolicy::default(),
        }
    }
}

impl RetryPolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_type: impl Into<String>, policy: RetryPolicy) {
        self.policies.insert(event_type.into(), policy);
    }

    pub fn get(&self, event_type: &str) -> RetryPolicy {
        self.policies
            .get(event_type)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Single entry point the retry scheduler uses: looks up the policy for
    /// `event_type` and computes the delay for `attempt_number`.
    pub fn calculate_delay(&self, event_type: &str, attempt_number: u32) -> f64 {
        self.get(event_type).calculate_delay(attempt_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_seconds: 1.0,
            max_delay_seconds: 1000.0,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.calculate_delay(1), 1.0);
        assert_eq!(policy.calculate_delay(2), 2.0);
        assert_eq!(policy.calculate_delay(3), 4.0);
        assert_eq!(policy.calculate_delay(4), 8.0);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay_seconds: 1.0,
            max_delay_seconds: 5.0,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.calculate_delay(10), 5.0);
    }

    #[test]
    fn test_jitter_only_adds_never_subtracts() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_seconds: 10.0,
            max_delay_seconds: 1000.0,
            backoff_multiplier: 1.0,
            jitter: true,
        };
        for _ in 0..50 {
            let delay = policy.calculate_delay(1);
            assert!(delay >= 10.0);
            assert!(delay <= 12.0);
        }
    }

    #[test]
    fn test_registry_defaults_per_event_type() {
        let registry = RetryPolicyRegistry::new();
        assert_eq!(registry.get(event_types::EXCEPTION_INGESTED).max_retries, 5);
        assert_eq!(
            registry.get(event_types::TOOL_EXECUTION_REQUESTED).max_retries,
            3
        );
        assert_eq!(registry.get(event_types::FEEDBACK_CAPTURED).max_retries, 2);
    }

    #[test]
    fn test_registry_falls_back_to_default() {
        let registry = RetryPolicyRegistry::new();
        let policy = registry.get("SomeUnknownEventType");
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay_seconds, 1.0);
    }

    #[test]
    fn test_registry_override() {
        let mut registry = RetryPolicyRegistry::new();
        registry.register(
            "Custom",
            RetryPolicy {
                max_retries: 1,
                initial_delay_seconds: 0.1,
                max_delay_seconds: 1.0,
                backoff_multiplier: 1.0,
                jitter: false,
            },
        );
        assert_eq!(registry.get("Custom").max_retries, 1);
    }
}
