//! Enforcement audit trail.
//!
//! Every Deny is appended to `audit/decisions.jsonl` and remembered per
//! target in the session's `denials.json`. When a later request for the same
//! target is allowed, a `reversal` entry is logged. Detection only: the
//! decision itself is never changed here.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::types::{ActionKind, ActionKindTag, Decision, Rule, SessionKey, Timestamp, Verdict};
use crate::io::paths::RecordKind;
use crate::io::store::{RecordStore, append_jsonl};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: Timestamp,
    pub session: Option<String>,
    pub action_kind: ActionKindTag,
    pub action_target: String,
    pub decision: Decision,
    pub rule: Rule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Allowed after an earlier Deny of the same target.
    #[serde(default)]
    pub reversal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialEntry {
    pub denied_at: Timestamp,
    pub rule: Rule,
    pub reason: Option<String>,
}

/// Most recent Deny per action target for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialLog {
    #[serde(default)]
    pub targets: BTreeMap<String, DenialEntry>,
}

fn target_key(action: &ActionKind) -> String {
    match action {
        ActionKind::InvokeAgent(agent) => format!("invoke_agent:{}", agent.trim().to_ascii_lowercase()),
        ActionKind::EditFile(path) => format!("edit_file:{}", path.trim()),
    }
}

/// Record a verdict in the audit trail.
///
/// Returns true when an Allow reversed an earlier Deny for the same target.
pub fn record_verdict(
    store: &RecordStore<'_>,
    session: &SessionKey,
    action: &ActionKind,
    verdict: &Verdict,
    now: Timestamp,
) -> Result<bool> {
    let key = target_key(action);
    let mut denials: DenialLog = store.read(session, RecordKind::Denials).unwrap_or_default();

    let reversal = match verdict.decision {
        Decision::Deny => {
            denials.targets.insert(
                key,
                DenialEntry {
                    denied_at: now,
                    rule: verdict.rule,
                    reason: verdict.reason.clone(),
                },
            );
            store.write(session, RecordKind::Denials, &denials)?;
            false
        }
        Decision::Allow => {
            let Some(prior) = denials.targets.remove(&key) else {
                return Ok(false);
            };
            warn!(
                session = %session,
                target = %action.target(),
                prior_rule = prior.rule.as_str(),
                rule = verdict.rule.as_str(),
                "previously denied action is now allowed"
            );
            store.write(session, RecordKind::Denials, &denials)?;
            true
        }
    };

    let entry = AuditEntry {
        at: now,
        session: session.as_id().map(str::to_string),
        action_kind: action.tag(),
        action_target: action.target().to_string(),
        decision: verdict.decision,
        rule: verdict.rule,
        reason: verdict.reason.clone(),
        reversal,
    };
    append_jsonl(&store.paths().audit_log_path, &entry)?;
    Ok(reversal)
}
