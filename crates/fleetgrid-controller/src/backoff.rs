//! Per-key exponential backoff for failed evaluations.

use std::collections::HashMap;
use std::time::Duration;

/// Tracks consecutive failures per key and doubles the retry delay on
/// each one, up to a ceiling.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: HashMap<String, u32>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait.
    pub fn next_delay(&mut self, key: &str) -> Duration {
        let failures = self.failures.entry(key.to_string()).or_insert(0);
        let exponent = (*failures).min(31);
        *failures = failures.saturating_add(1);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Forget the failure history of `key`.
    pub fn reset(&mut self, key: &str) {
        self.failures.remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
