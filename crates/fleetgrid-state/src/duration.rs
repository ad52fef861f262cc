//! Human-readable durations and disruption budgets.
//!
//! Policies are authored as text (`"30s"`, `"5m"`, `"Never"`, `"10%"`),
//! so these types parse on deserialize and reject malformed input
//! instead of silently falling back to a default.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parse a duration string like `"500ms"`, `"30s"`, `"5m"`, `"1h"`.
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 != 0 {
        format!("{millis}ms")
    } else if d.as_secs() % 3600 == 0 && d.as_secs() > 0 {
        format!("{}h", d.as_secs() / 3600)
    } else if d.as_secs() % 60 == 0 && d.as_secs() > 0 {
        format!("{}m", d.as_secs() / 60)
    } else {
        format!("{}s", d.as_secs())
    }
}

/// How long a node pool waits before an idle machine becomes a
/// confirmed removal candidate. `Never` disables emptiness checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConsolidateAfter {
    Never,
    After(Duration),
}

impl ConsolidateAfter {
    /// The configured delay, or `None` when disabled.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::After(d) => Some(*d),
        }
    }
}

impl Default for ConsolidateAfter {
    fn default() -> Self {
        Self::After(Duration::ZERO)
    }
}

impl TryFrom<String> for ConsolidateAfter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().eq_ignore_ascii_case("never") {
            return Ok(Self::Never);
        }
        parse_duration(&value)
            .map(Self::After)
            .ok_or_else(|| format!("invalid consolidateAfter: {value:?}"))
    }
}

impl From<ConsolidateAfter> for String {
    fn from(value: ConsolidateAfter) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ConsolidateAfter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::After(d) => f.write_str(&format_duration(*d)),
        }
    }
}

/// A disruption budget: the most claims of a pool that may be
/// disrupted at once, as an absolute count (`"3"`) or a share of the
/// pool (`"10%"`, rounded up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Budget {
    Count(u32),
    Percent(u8),
}

impl Budget {
    /// Number of claims this budget permits out of `total`.
    pub fn allowed(&self, total: usize) -> usize {
        match self {
            Self::Count(n) => *n as usize,
            Self::Percent(p) => (total * *p as usize).div_ceil(100),
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::Percent(10)
    }
}

impl TryFrom<String> for Budget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let v = value.trim();
        if let Some(pct) = v.strip_suffix('%') {
            match pct.parse::<u8>() {
                Ok(p) if p <= 100 => Ok(Self::Percent(p)),
                _ => Err(format!("invalid budget percentage: {value:?}")),
            }
        } else {
            v.parse::<u32>()
                .map(Self::Count)
                .map_err(|_| format!("invalid budget: {value:?}"))
        }
    }
}

impl From<Budget> for String {
    fn from(value: Budget) -> Self {
        match value {
            Budget::Count(n) => n.to_string(),
            Budget::Percent(p) => format!("{p}%"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn oversized_units_are_rejected() {
        assert_eq!(parse_duration(&format!("{}m", u64::MAX / 10)), None);
        assert_eq!(parse_duration(&format!("{}h", u64::MAX / 100)), None);
        assert!(serde_json::from_str::<ConsolidateAfter>(&format!("\"{}h\"", u64::MAX)).is_err());
    }

    #[test]
    fn consolidate_after_never_disables() {
        let never: ConsolidateAfter = serde_json::from_str("\"Never\"").unwrap();
        assert_eq!(never, ConsolidateAfter::Never);
        assert_eq!(never.delay(), None);

        let thirty: ConsolidateAfter = serde_json::from_str("\"30s\"").unwrap();
        assert_eq!(thirty.delay(), Some(Duration::from_secs(30)));
        assert_eq!(serde_json::to_string(&thirty).unwrap(), "\"30s\"");
    }

    #[test]
    fn consolidate_after_rejects_garbage() {
        assert!(serde_json::from_str::<ConsolidateAfter>("\"whenever\"").is_err());
    }

    #[test]
    fn budget_percent_rounds_up() {
        let b = Budget::try_from("10%".to_string()).unwrap();
        assert_eq!(b.allowed(0), 0);
        assert_eq!(b.allowed(5), 1);
        assert_eq!(b.allowed(20), 2);
        assert_eq!(b.allowed(21), 3);
    }

    #[test]
    fn budget_count_and_errors() {
        assert_eq!(Budget::try_from("3".to_string()).unwrap().allowed(100), 3);
        assert!(Budget::try_from("150%".to_string()).is_err());
        assert!(Budget::try_from("lots".to_string()).is_err());
    }
}
