//! Status conditions on node claims.
//!
//! A condition is a named tri-state fact with a reason, a message and
//! the time its status last changed. `ConditionSet` keeps them keyed by
//! type so that two sets built from the same facts compare equal and
//! serialize identically regardless of insertion order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Launched,
    Registered,
    Initialized,
    Ready,
    Terminating,
    Terminated,
    Drifted,
    Empty,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// Unix timestamp (seconds) of the last status change.
    pub last_transition_time: u64,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Desired outcome for a single condition type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionUpdate {
    Set {
        status: ConditionStatus,
        reason: String,
        message: String,
    },
    Clear,
}

impl ConditionUpdate {
    pub fn set_true(reason: &str, message: &str) -> Self {
        Self::Set {
            status: ConditionStatus::True,
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }
}

/// The conditions on one node claim, at most one per type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Condition>", into = "Vec<Condition>")]
pub struct ConditionSet(BTreeMap<ConditionType, Condition>);

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.0.get(&condition_type)
    }

    /// True only when the condition is present with status `True`.
    pub fn is_true(&self, condition_type: ConditionType) -> bool {
        self.get(condition_type).is_some_and(Condition::is_true)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set a condition. Returns whether anything changed.
    ///
    /// `last_transition_time` moves only when the status changes; a new
    /// reason or message on the same status is recorded in place.
    pub fn set(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: u64,
    ) -> bool {
        match self.0.get_mut(&condition_type) {
            Some(existing) if existing.status == status => {
                if existing.reason == reason && existing.message == message {
                    return false;
                }
                existing.reason = reason.to_string();
                existing.message = message.to_string();
                true
            }
            _ => {
                self.0.insert(
                    condition_type,
                    Condition {
                        condition_type,
                        status,
                        reason: reason.to_string(),
                        message: message.to_string(),
                        last_transition_time: now,
                    },
                );
                true
            }
        }
    }

    pub fn set_true(&mut self, condition_type: ConditionType, reason: &str, now: u64) -> bool {
        self.set(condition_type, ConditionStatus::True, reason, "", now)
    }

    /// Remove a condition. Returns whether it was present.
    pub fn clear(&mut self, condition_type: ConditionType) -> bool {
        self.0.remove(&condition_type).is_some()
    }

    /// Apply a desired outcome. Returns whether anything changed.
    pub fn apply(
        &mut self,
        condition_type: ConditionType,
        update: &ConditionUpdate,
        now: u64,
    ) -> bool {
        match update {
            ConditionUpdate::Set {
                status,
                reason,
                message,
            } => self.set(condition_type, *status, reason, message, now),
            ConditionUpdate::Clear => self.clear(condition_type),
        }
    }
}

impl From<Vec<Condition>> for ConditionSet {
    fn from(conditions: Vec<Condition>) -> Self {
        Self(
            conditions
                .into_iter()
                .map(|c| (c.condition_type, c))
                .collect(),
        )
    }
}

impl From<ConditionSet> for Vec<Condition> {
    fn from(set: ConditionSet) -> Self {
        set.0.into_values().collect()
    }
}
