//! Lazy time-to-live evaluation shared by the Ralph and Maestro workflows.
//!
//! Expiry is computed at read time from the last observed activity, never
//! from the activation time, so a continuously active session never expires.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::core::types::Timestamp;

pub const DEFAULT_TTL_HOURS: u32 = 12;
pub const DEFAULT_WARNING_RATIO: f64 = 0.8;

/// TTL parameters for a workflow record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlPolicy {
    pub ttl: Duration,
    /// Fraction of the TTL after which a warning is raised (0 < ratio < 1).
    pub warning_ratio: f64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(i64::from(DEFAULT_TTL_HOURS)),
            warning_ratio: DEFAULT_WARNING_RATIO,
        }
    }
}

impl TtlPolicy {
    pub fn warning_threshold(&self) -> Duration {
        let millis = self.ttl.num_milliseconds() as f64 * self.warning_ratio;
        Duration::milliseconds(millis as i64)
    }

    /// Classify a record whose last observed activity was at `last_activity`.
    pub fn evaluate(&self, last_activity: Timestamp, now: Timestamp) -> Liveness {
        let elapsed = (now - last_activity).max(Duration::zero());
        if elapsed > self.ttl {
            return Liveness::Expired {
                elapsed_secs: elapsed.num_seconds(),
            };
        }
        if elapsed > self.warning_threshold() {
            return Liveness::Warning {
                remaining_secs: (self.ttl - elapsed).num_seconds(),
            };
        }
        Liveness::Fresh
    }
}

/// Liveness of a stored workflow record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "liveness", rename_all = "snake_case")]
pub enum Liveness {
    Fresh,
    /// Past the warning threshold; activity within `remaining_secs` keeps it alive.
    Warning { remaining_secs: i64 },
    Expired { elapsed_secs: i64 },
}

impl Liveness {
    pub fn is_expired(self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixed_now;

    #[test]
    fn thirteen_hours_idle_is_expired() {
        let now = fixed_now();
        let policy = TtlPolicy::default();
        let liveness = policy.evaluate(now - Duration::hours(13), now);
        assert_eq!(
            liveness,
            Liveness::Expired {
                elapsed_secs: 13 * 3600
            }
        );
    }

    #[test]
    fn recent_activity_is_fresh() {
        let now = fixed_now();
        let policy = TtlPolicy::default();
        assert_eq!(
            policy.evaluate(now - Duration::minutes(5), now),
            Liveness::Fresh
        );
    }

    #[test]
    fn warning_carries_remaining_time() {
        let now = fixed_now();
        let policy = TtlPolicy::default();
        let liveness = policy.evaluate(now - Duration::hours(10), now);
        assert_eq!(
            liveness,
            Liveness::Warning {
                remaining_secs: 2 * 3600
            }
        );
    }

    #[test]
    fn exactly_at_ttl_is_not_expired() {
        let now = fixed_now();
        let policy = TtlPolicy::default();
        assert!(!policy.evaluate(now - Duration::hours(12), now).is_expired());
    }

    #[test]
    fn future_activity_counts_as_fresh() {
        let now = fixed_now();
        let policy = TtlPolicy::default();
        assert_eq!(
            policy.evaluate(now + Duration::minutes(1), now),
            Liveness::Fresh
        );
    }
}
