//! Enforcement decision table.
//!
//! Rows are evaluated in order and the first match wins:
//!
//! 1. No governing state (no live Ralph, no live Maestro, no plan marker): allow.
//! 2. Implementation agent while the Maestro plan is not approved: deny.
//! 3. Exploration agent: allow, whatever the phase.
//! 4. Direct edit of an in-scope, non-config file while a plan marker exists
//!    and Ralph is not active: deny.
//! 5. Edit of a configuration/documentation file: allow.
//! 6. Ralph over its iteration limit without a continuation: deny.
//! 7. Otherwise allow.
//!
//! Callers pass only live records; expired or unreadable state is `None`.

use serde::{Deserialize, Serialize};

use crate::core::agents::{AgentClass, AgentRoster};
use crate::core::file_class::{FileAllowlist, in_scope};
use crate::core::maestro::{MaestroState, Phase};
use crate::core::ralph::{IterationLimits, RalphState};
use crate::core::types::{ActionKind, Rule, Timestamp, Verdict};

/// Written when a plan review exits successfully; gates raw edits outside Ralph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanApprovalMarker {
    pub approved_at: Timestamp,
    /// File globs covered by the approved plan; empty covers everything.
    #[serde(default)]
    pub scope: Vec<String>,
}

/// Configuration consulted by the decision table.
#[derive(Debug, Clone, Copy)]
pub struct Policy<'a> {
    pub roster: &'a AgentRoster,
    pub files: &'a FileAllowlist,
    pub limits: &'a IterationLimits,
}

/// Current session state plus the requested action.
#[derive(Debug, Clone, Copy)]
pub struct EnforcementInput<'a> {
    pub ralph: Option<&'a RalphState>,
    pub maestro: Option<&'a MaestroState>,
    pub plan_marker: Option<&'a PlanApprovalMarker>,
    pub action: &'a ActionKind,
}

pub fn decide(input: &EnforcementInput<'_>, policy: &Policy<'_>) -> Verdict {
    if input.ralph.is_none() && input.maestro.is_none() && input.plan_marker.is_none() {
        return Verdict::allow(Rule::NoState);
    }

    match input.action {
        ActionKind::InvokeAgent(agent) => match policy.roster.classify(agent) {
            AgentClass::Implementation => {
                if let Some(maestro) = input.maestro {
                    let phase = maestro.phase();
                    if phase < Phase::Execution {
                        return Verdict::deny(
                            Rule::PhaseGate,
                            format!(
                                "phase gate: plan not approved (maestro phase: {})",
                                phase.as_str()
                            ),
                        );
                    }
                }
            }
            AgentClass::Exploration => return Verdict::allow(Rule::ExplorationAgent),
            AgentClass::Other => {}
        },
        ActionKind::EditFile(path) => {
            let config_file = policy.files.allows(path);
            if let Some(marker) = input.plan_marker {
                if input.ralph.is_none() && !config_file && in_scope(&marker.scope, path) {
                    return Verdict::deny(
                        Rule::PlanGateDirectEdit,
                        "direct edit blocked pending delegated execution",
                    );
                }
            }
            if config_file {
                return Verdict::allow(Rule::ConfigFileAllowlist);
            }
        }
    }

    if let Some(ralph) = input.ralph {
        if ralph.over_limit(policy.limits) {
            return Verdict::deny(
                Rule::IterationLimit,
                format!(
                    "iteration limit reached ({}/{}); grant a continuation to proceed",
                    ralph.iteration_count,
                    ralph.effective_limit(policy.limits)
                ),
            );
        }
    }

    Verdict::allow(Rule::Default)
}
