//! Shared deterministic types for conductor core logic.
//!
//! These types define the wire contracts with the host action pipeline and
//! the stable records shared between core components. They must not depend
//! on I/O.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock instant used for every persisted timestamp.
pub type Timestamp = DateTime<Utc>;

/// Partition key for per-session state.
///
/// Requests without a session identifier share a single legacy partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Legacy,
    Id(String),
}

impl SessionKey {
    /// Build a key from an optional identifier; blank identifiers map to [`SessionKey::Legacy`].
    pub fn from_optional(id: Option<&str>) -> Self {
        match id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Self::Id(id.to_string()),
            None => Self::Legacy,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Self::Legacy => None,
            Self::Id(id) => Some(id.as_str()),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("<legacy>"),
            Self::Id(id) => f.write_str(id),
        }
    }
}

/// Size class of a Ralph story; selects the iteration limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSize {
    Small,
    Medium,
    Large,
}

impl TaskSize {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl FromStr for TaskSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" | "s" => Ok(Self::Small),
            "medium" | "m" => Ok(Self::Medium),
            "large" | "l" => Ok(Self::Large),
            other => Err(format!(
                "unknown task size '{other}' (expected small, medium or large)"
            )),
        }
    }
}

/// Kind of side-effecting action the host wants to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKindTag {
    InvokeAgent,
    EditFile,
}

/// Typed action: the agent type or file path travels with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    InvokeAgent(String),
    EditFile(String),
}

impl ActionKind {
    pub fn target(&self) -> &str {
        match self {
            Self::InvokeAgent(agent) => agent,
            Self::EditFile(path) => path,
        }
    }

    pub fn tag(&self) -> ActionKindTag {
        match self {
            Self::InvokeAgent(_) => ActionKindTag::InvokeAgent,
            Self::EditFile(_) => ActionKindTag::EditFile,
        }
    }
}

/// Action request raised by the host pipeline before executing a side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub action_kind: ActionKindTag,
    pub action_target: String,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl ActionRequest {
    pub fn new(session_id: Option<&str>, action: ActionKind) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            action_kind: action.tag(),
            action_target: action.target().to_string(),
            timestamp: None,
        }
    }

    pub fn session(&self) -> SessionKey {
        SessionKey::from_optional(self.session_id.as_deref())
    }

    pub fn action(&self) -> ActionKind {
        match self.action_kind {
            ActionKindTag::InvokeAgent => ActionKind::InvokeAgent(self.action_target.clone()),
            ActionKindTag::EditFile => ActionKind::EditFile(self.action_target.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// Decision-table row that produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    NoState,
    PhaseGate,
    ExplorationAgent,
    PlanGateDirectEdit,
    ConfigFileAllowlist,
    IterationLimit,
    Default,
}

impl Rule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoState => "no_state",
            Self::PhaseGate => "phase_gate",
            Self::ExplorationAgent => "exploration_agent",
            Self::PlanGateDirectEdit => "plan_gate_direct_edit",
            Self::ConfigFileAllowlist => "config_file_allowlist",
            Self::IterationLimit => "iteration_limit",
            Self::Default => "default",
        }
    }
}

/// Engine answer returned to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub rule: Rule,
}

impl Verdict {
    pub fn allow(rule: Rule) -> Self {
        Self {
            decision: Decision::Allow,
            reason: None,
            rule,
        }
    }

    pub fn deny(rule: Rule, reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
            rule,
        }
    }

    pub fn is_allow(&self) -> bool {
        self.decision == Decision::Allow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Outcome report sent by the host after an agent task ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeFeedback {
    #[serde(default)]
    pub session_id: Option<String>,
    pub task_id: String,
    pub agent_type: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub error_signature: Option<String>,
}

impl OutcomeFeedback {
    pub fn session(&self) -> SessionKey {
        SessionKey::from_optional(self.session_id.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningKind {
    FailedApproach,
    WorkingSolution,
}

/// Record handed to the external memory collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub session_id: Option<String>,
    pub kind: LearningKind,
    pub content: String,
    pub context: serde_json::Value,
}
