//! Operator-facing record of claims that keep failing to evaluate.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::ControllerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub claim: String,
    pub consecutive_failures: u32,
    pub last_error: String,
    pub transient: bool,
    /// Unix seconds of the most recent failure.
    pub last_failure_at: u64,
    /// At or past the persistence threshold.
    pub persistent: bool,
}

pub struct Diagnostics {
    threshold: u32,
    entries: RwLock<BTreeMap<String, FailureRecord>>,
}

impl Diagnostics {
    /// `threshold` consecutive failures make a failure persistent.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn record_failure(&self, claim: &str, err: &ControllerError, now: u64) -> FailureRecord {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .entry(claim.to_string())
            .or_insert_with(|| FailureRecord {
                claim: claim.to_string(),
                consecutive_failures: 0,
                last_error: String::new(),
                transient: true,
                last_failure_at: now,
                persistent: false,
            });
        entry.consecutive_failures += 1;
        entry.last_error = err.to_string();
        entry.transient = err.is_transient();
        entry.last_failure_at = now;
        entry.persistent = entry.consecutive_failures >= self.threshold;

        let failures = entry.consecutive_failures;
        if entry.persistent && !entry.transient {
            error!(%claim, failures, error = %err, "evaluation failing persistently");
        } else if entry.transient {
            debug!(%claim, failures, error = %err, "transient evaluation failure");
        } else {
            warn!(%claim, failures, error = %err, "evaluation failed");
        }
        entry.clone()
    }

    pub fn record_success(&self, claim: &str) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(claim);
        if let Some(record) = removed
            && record.persistent
        {
            debug!(%claim, failures = record.consecutive_failures, "evaluation recovered");
        }
    }

    pub fn get(&self, claim: &str) -> Option<FailureRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(claim)
            .cloned()
    }

    pub fn list(&self) -> Vec<FailureRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_disruption::DisruptionError;

    fn structural() -> ControllerError {
        DisruptionError::MissingNodePool {
            claim: "claim-a".to_string(),
        }
        .into()
    }

    #[test]
    fn becomes_persistent_at_threshold() {
        let diag = Diagnostics::new(3);
        assert!(!diag.record_failure("claim-a", &structural(), 1).persistent);
        assert!(!diag.record_failure("claim-a", &structural(), 2).persistent);
        let record = diag.record_failure("claim-a", &structural(), 3);
        assert!(record.persistent);
        assert!(!record.transient);
        assert_eq!(record.consecutive_failures, 3);
        assert!(record.last_error.contains("no node pool reference"));
    }

    #[test]
    fn success_clears_record() {
        let diag = Diagnostics::new(1);
        diag.record_failure("claim-a", &ControllerError::QueueFull, 1);
        assert_eq!(diag.list().len(), 1);
        assert!(diag.get("claim-a").unwrap().transient);

        diag.record_success("claim-a");
        assert!(diag.list().is_empty());
    }
}
