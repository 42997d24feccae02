//! Bounded retry ladder for failed agent tasks.
//!
//! The step is a function of the attempt count alone. Error signatures are
//! carried for the audit trail and never influence which step is chosen.

use serde::{Deserialize, Serialize};

use crate::core::agents::AgentRoster;
use crate::core::types::Timestamp;

/// Attempt number at which the ladder stops and waits for a human.
pub const BLOCKED_ATTEMPT: u32 = 5;

/// What to do on the next attempt of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Run the originally assigned agent.
    Original,
    /// Re-run the assigned agent with the previous error as context.
    SameWithContext,
    /// Hand the task to a different agent.
    Escalate { agent: String },
    /// Stop retrying; a human must decide.
    Blocked,
}

impl Step {
    /// Agent to run for this step, or `None` when blocked.
    pub fn agent<'a>(&'a self, assigned: &'a str) -> Option<&'a str> {
        match self {
            Self::Original | Self::SameWithContext => Some(assigned),
            Self::Escalate { agent } => Some(agent),
            Self::Blocked => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked)
    }
}

/// Step for the 1-based `attempt`.
pub fn ladder(attempt: u32, roster: &AgentRoster) -> Step {
    match attempt {
        0 | 1 => Step::Original,
        2 => Step::SameWithContext,
        3 => Step::Escalate {
            agent: roster.fast_fix.clone(),
        },
        4 => Step::Escalate {
            agent: roster.debugger.clone(),
        },
        _ => Step::Blocked,
    }
}

/// Failure history of one (task, assigned agent) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryLedger {
    pub task_id: String,
    /// Agent originally assigned to the task.
    pub agent_type: String,
    /// Failed attempts so far. Never exceeds [`BLOCKED_ATTEMPT`].
    pub attempt: u32,
    #[serde(default)]
    pub last_error_signature: Option<String>,
    pub updated_at: Timestamp,
}

impl RetryLedger {
    pub fn new(task_id: &str, agent_type: &str, now: Timestamp) -> Self {
        Self {
            task_id: task_id.to_string(),
            agent_type: agent_type.to_string(),
            attempt: 0,
            last_error_signature: None,
            updated_at: now,
        }
    }

    /// Count one failure and return the step for the next attempt.
    pub fn record_failure(
        &mut self,
        error_signature: Option<&str>,
        roster: &AgentRoster,
        now: Timestamp,
    ) -> Step {
        self.attempt = (self.attempt + 1).min(BLOCKED_ATTEMPT);
        if let Some(signature) = error_signature {
            self.last_error_signature = Some(signature.to_string());
        }
        self.updated_at = now;
        self.next_step(roster)
    }

    pub fn next_step(&self, roster: &AgentRoster) -> Step {
        ladder(self.attempt + 1, roster)
    }

    pub fn is_blocked(&self) -> bool {
        self.attempt + 1 >= BLOCKED_ATTEMPT
    }
}

/// Pick the ledger a failure report belongs to.
///
/// An exact (task, agent) match wins. A report from an escalation agent falls
/// back to any ledger of the same task, since that agent was only running
/// because the task had already failed.
pub fn attribute<'a>(
    ledgers: &'a [RetryLedger],
    task_id: &str,
    agent_type: &str,
    roster: &AgentRoster,
) -> Option<&'a RetryLedger> {
    let exact = ledgers
        .iter()
        .find(|ledger| ledger.task_id == task_id && ledger.agent_type == agent_type);
    if exact.is_some() || !roster.is_escalation_agent(agent_type) {
        return exact;
    }
    ledgers
        .iter()
        .filter(|ledger| ledger.task_id == task_id)
        .max_by_key(|ledger| ledger.attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixed_now;

    #[test]
    fn ladder_escalates_in_fixed_order() {
        let roster = AgentRoster::default();
        assert_eq!(ladder(1, &roster), Step::Original);
        assert_eq!(ladder(2, &roster), Step::SameWithContext);
        assert_eq!(
            ladder(3, &roster),
            Step::Escalate {
                agent: "spark".to_string()
            }
        );
        assert_eq!(
            ladder(4, &roster),
            Step::Escalate {
                agent: "debug-agent".to_string()
            }
        );
        assert_eq!(ladder(5, &roster), Step::Blocked);
        assert_eq!(ladder(42, &roster), Step::Blocked);
    }

    #[test]
    fn five_failures_terminate_at_blocked() {
        let roster = AgentRoster::default();
        let now = fixed_now();
        let mut ledger = RetryLedger::new("T-1", "kraken", now);
        let steps: Vec<Step> = (0..5)
            .map(|_| ledger.record_failure(Some("E0308"), &roster, now))
            .collect();
        assert_eq!(steps[0], Step::SameWithContext);
        assert!(matches!(steps[1], Step::Escalate { .. }));
        assert!(matches!(steps[2], Step::Escalate { .. }));
        assert_eq!(steps[3], Step::Blocked);
        assert_eq!(steps[4], Step::Blocked);
        assert_eq!(ledger.attempt, BLOCKED_ATTEMPT);
        assert!(ledger.is_blocked());
    }

    #[test]
    fn error_text_does_not_change_step() {
        let roster = AgentRoster::default();
        let now = fixed_now();
        let mut with_text = RetryLedger::new("T-1", "kraken", now);
        let mut without_text = RetryLedger::new("T-1", "kraken", now);
        for i in 0..3 {
            let signature = format!("panic at line {i}");
            assert_eq!(
                with_text.record_failure(Some(&signature), &roster, now),
                without_text.record_failure(None, &roster, now)
            );
        }
    }

    #[test]
    fn escalation_agent_failure_attributed_to_task_ledger() {
        let roster = AgentRoster::default();
        let now = fixed_now();
        let mut ledger = RetryLedger::new("T-1", "kraken", now);
        ledger.attempt = 2;
        let ledgers = vec![ledger];

        let found = attribute(&ledgers, "T-1", "spark", &roster).expect("attributed");
        assert_eq!(found.agent_type, "kraken");
        assert!(attribute(&ledgers, "T-1", "scribe", &roster).is_none());
        assert!(attribute(&ledgers, "T-2", "spark", &roster).is_none());
    }

    #[test]
    fn step_agent_follows_assignment() {
        assert_eq!(Step::Original.agent("kraken"), Some("kraken"));
        assert_eq!(
            Step::Escalate {
                agent: "spark".to_string()
            }
            .agent("kraken"),
            Some("spark")
        );
        assert_eq!(Step::Blocked.agent("kraken"), None);
    }
}
