//! Agent roster: which agent types implement, explore, review plans, or
//! serve as escalation targets.

use serde::{Deserialize, Serialize};

/// Enforcement class of an agent type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentClass {
    /// Heavy implementation agents; gated until the plan is approved.
    Implementation,
    /// Read-only exploration agents; never gated.
    Exploration,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentRoster {
    pub implementation: Vec<String>,
    pub exploration: Vec<String>,
    /// Agents whose successful exit writes a plan approval marker.
    pub plan_review: Vec<String>,
    /// Third retry attempt goes to this general-purpose fast-fix agent.
    pub fast_fix: String,
    /// Fourth retry attempt goes to this root-cause specialist.
    pub debugger: String,
}

impl Default for AgentRoster {
    fn default() -> Self {
        Self {
            implementation: vec!["kraken".to_string(), "spark".to_string(), "phoenix".to_string()],
            exploration: vec![
                "scout".to_string(),
                "oracle".to_string(),
                "pathfinder".to_string(),
                "explore".to_string(),
            ],
            plan_review: vec!["plan-reviewer".to_string(), "principal-reviewer".to_string()],
            fast_fix: "spark".to_string(),
            debugger: "debug-agent".to_string(),
        }
    }
}

impl AgentRoster {
    pub fn classify(&self, agent: &str) -> AgentClass {
        let agent = agent.trim();
        if contains(&self.implementation, agent) {
            AgentClass::Implementation
        } else if contains(&self.exploration, agent) {
            AgentClass::Exploration
        } else {
            AgentClass::Other
        }
    }

    pub fn is_plan_review(&self, agent: &str) -> bool {
        contains(&self.plan_review, agent.trim())
    }

    /// True if `agent` is one of the escalation targets of the retry ladder.
    pub fn is_escalation_agent(&self, agent: &str) -> bool {
        let agent = agent.trim();
        agent.eq_ignore_ascii_case(&self.fast_fix) || agent.eq_ignore_ascii_case(&self.debugger)
    }
}

fn contains(names: &[String], agent: &str) -> bool {
    names.iter().any(|name| name.eq_ignore_ascii_case(agent))
}
