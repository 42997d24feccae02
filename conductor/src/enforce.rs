//! Enforcement entry point for host action requests.
//!
//! `decide_request` never fails: unreadable state counts as absent, and audit
//! write failures are logged and swallowed. A governance bug must not be able
//! to brick the host's workflow.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::enforcement::{EnforcementInput, PlanApprovalMarker, decide};
use crate::core::types::{ActionRequest, SessionKey, Timestamp, Verdict};
use crate::io::audit::record_verdict;
use crate::io::paths::RecordKind;
use crate::workspace::Workspace;

/// Authorize or block one requested action.
pub fn decide_request(ws: &Workspace, request: &ActionRequest, now: Timestamp) -> Verdict {
    let session = request.session();
    let action = request.action();
    let ralph = ws.live_ralph(&session, now);
    let maestro = ws.live_maestro(&session, now);
    let plan_marker = ws.store().load_plan_marker(&session);

    let resolved = ws.policy();
    let verdict = decide(
        &EnforcementInput {
            ralph: ralph.as_ref(),
            maestro: maestro.as_ref(),
            plan_marker: plan_marker.as_ref(),
            action: &action,
        },
        &resolved.policy(),
    );
    debug!(
        session = %session,
        target = %action.target(),
        decision = ?verdict.decision,
        rule = verdict.rule.as_str(),
        "enforcement decision"
    );

    if let Err(err) = record_verdict(&ws.store(), &session, &action, &verdict, now) {
        warn!(session = %session, err = %format!("{err:#}"), "audit write failed");
    }
    verdict
}

/// Write (or supersede) the session's plan approval marker.
pub fn approve_plan(
    ws: &Workspace,
    session: &SessionKey,
    scope: Vec<String>,
    now: Timestamp,
) -> Result<PlanApprovalMarker> {
    let marker = PlanApprovalMarker {
        approved_at: now,
        scope,
    };
    ws.store()
        .write(session, RecordKind::PlanApproval, &marker)?;
    info!(session = %session, scope = ?marker.scope, "plan approval marker written");
    Ok(marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ActionKind, Decision, Rule};
    use crate::io::audit::AuditEntry;
    use crate::io::store::read_jsonl;
    use crate::orchestrator::utter;
    use crate::test_support::{TestWorkspace, fixed_now};
    use std::fs;

    fn request(session: &str, action: ActionKind) -> ActionRequest {
        ActionRequest::new(Some(session), action)
    }

    #[test]
    fn fresh_workspace_allows_everything() {
        let tw = TestWorkspace::new();
        let verdict = decide_request(
            &tw.ws,
            &request("s1", ActionKind::InvokeAgent("kraken".to_string())),
            fixed_now(),
        );
        assert_eq!(verdict, Verdict::allow(Rule::NoState));
    }

    #[test]
    fn corrupted_state_fails_open() {
        let tw = TestWorkspace::new();
        let session = SessionKey::Id("s1".to_string());
        let path = tw.ws.paths.record_path(&session, RecordKind::Maestro);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "\u{0}\u{1}garbage").expect("write garbage");
        let verdict = decide_request(
            &tw.ws,
            &request("s1", ActionKind::InvokeAgent("kraken".to_string())),
            fixed_now(),
        );
        assert_eq!(verdict.decision, Decision::Allow);
    }

    #[test]
    fn deny_is_audited() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        let session = SessionKey::Id("s1".to_string());
        utter(&tw.ws, &session, "/maestro", now).expect("activate");
        let verdict = decide_request(
            &tw.ws,
            &request("s1", ActionKind::InvokeAgent("kraken".to_string())),
            now,
        );
        assert_eq!(verdict.rule, Rule::PhaseGate);
        let entries: Vec<AuditEntry> =
            read_jsonl(&tw.ws.paths.audit_log_path).expect("read audit");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_target, "kraken");
    }

    #[test]
    fn approved_plan_gates_direct_edits() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        let session = SessionKey::Id("s1".to_string());
        approve_plan(&tw.ws, &session, Vec::new(), now).expect("approve");
        let verdict = decide_request(
            &tw.ws,
            &request("s1", ActionKind::EditFile("src/main.rs".to_string())),
            now,
        );
        assert_eq!(verdict.rule, Rule::PlanGateDirectEdit);
        let other = decide_request(
            &tw.ws,
            &request("s2", ActionKind::EditFile("src/main.rs".to_string())),
            now,
        );
        assert_eq!(other, Verdict::allow(Rule::NoState));
    }
}
