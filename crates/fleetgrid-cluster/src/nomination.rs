//! Nomination ledger — time-boxed reservations from the placement path.
//!
//! While a machine is nominated, in-flight workloads are expected to
//! land on it, so it must not be treated as empty. Entries expire
//! lazily: reads compare against the clock, and `sweep` drops stale
//! entries so the map does not grow without bound.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::debug;

use fleetgrid_state::ProviderId;

use crate::clock::{Clock, epoch_secs};

/// Longest reservation the ledger will hold. Longer requests are capped.
pub const MAX_NOMINATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// An active reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Nomination {
    pub provider_id: ProviderId,
    /// Unix seconds at which the reservation lapses.
    pub expires_at: u64,
}

pub struct NominationLedger {
    entries: RwLock<HashMap<ProviderId, SystemTime>>,
    clock: Arc<dyn Clock>,
}

impl NominationLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Reserve a machine for `ttl`, capped at `MAX_NOMINATION_TTL`.
    /// An existing later expiry is kept.
    pub fn nominate(&self, provider_id: &str, ttl: Duration) -> SystemTime {
        let ttl = ttl.min(MAX_NOMINATION_TTL);
        let now = self.clock.now();
        let expires = now.checked_add(ttl).unwrap_or(now);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let slot = entries.entry(provider_id.to_string()).or_insert(expires);
        if *slot < expires {
            *slot = expires;
        }
        debug!(%provider_id, ttl_secs = ttl.as_secs(), "machine nominated");
        *slot
    }

    pub fn is_nominated(&self, provider_id: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider_id)
            .is_some_and(|expires| *expires > now)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, expires| *expires > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "expired nominations swept");
        }
        removed
    }

    /// Unexpired nominations, sorted by provider id.
    pub fn active(&self) -> Vec<Nomination> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<Nomination> = entries
            .iter()
            .filter(|(_, expires)| **expires > now)
            .map(|(provider_id, expires)| Nomination {
                provider_id: provider_id.clone(),
                expires_at: epoch_secs(*expires),
            })
            .collect();
        active.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        active
    }
}
