//! Ralph controller: activation, heartbeat, bounded iteration, completion.
//!
//! The record lives in `sessions/<partition>/ralph.json` only while Ralph is
//! active. Expiry is lazy: an idle record past its TTL reads as inactive and
//! is replaced by the next activation.

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::ralph::{RalphState, TickOutcome};
use crate::core::ttl::Liveness;
use crate::core::types::{SessionKey, TaskSize, Timestamp};
use crate::io::paths::RecordKind;
use crate::workspace::Workspace;

/// Operator-facing view of a session's Ralph record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RalphStatus {
    Inactive,
    Active {
        state: RalphState,
        #[serde(flatten)]
        liveness: Liveness,
        limit: u32,
    },
    Expired {
        state: RalphState,
    },
}

/// Activate Ralph for `story_id`.
///
/// Fails when a live record for a different story exists. Re-activating the
/// same story refreshes it. Consumes the session's plan approval marker.
pub fn activate(
    ws: &Workspace,
    session: &SessionKey,
    story_id: &str,
    task_size: TaskSize,
    now: Timestamp,
) -> Result<RalphState> {
    let story_id = story_id.trim();
    if story_id.is_empty() {
        bail!("story id must be non-empty");
    }
    let store = ws.store();

    let state = match ws.live_ralph(session, now) {
        Some(existing) if existing.story_id != story_id => {
            bail!(
                "ralph already active for story {} in session {session}; complete or cancel it first",
                existing.story_id
            );
        }
        Some(mut existing) => {
            debug!(session = %session, story_id, "ralph already active; refreshing");
            existing.heartbeat(now);
            existing
        }
        None => {
            store.clear_workflow_history(session)?;
            RalphState::activate(story_id, task_size, now)
        }
    };
    store.write(session, RecordKind::Ralph, &state)?;
    if store.clear(session, RecordKind::PlanApproval)? {
        debug!(session = %session, "plan approval marker consumed by ralph activation");
    }
    info!(
        session = %session,
        story_id,
        task_size = task_size.as_str(),
        "ralph activated"
    );
    Ok(state)
}

/// Refresh `last_activity`. Returns false when Ralph is not live.
pub fn heartbeat(ws: &Workspace, session: &SessionKey, now: Timestamp) -> Result<bool> {
    let Some(mut state) = ws.live_ralph(session, now) else {
        return Ok(false);
    };
    state.heartbeat(now);
    ws.store().write(session, RecordKind::Ralph, &state)?;
    Ok(true)
}

/// Count one iteration.
pub fn tick(ws: &Workspace, session: &SessionKey, now: Timestamp) -> Result<TickOutcome> {
    let Some(mut state) = ws.live_ralph(session, now) else {
        return Ok(TickOutcome::Inactive);
    };
    let outcome = state.tick(&ws.config.ralph.limits, now);
    ws.store().write(session, RecordKind::Ralph, &state)?;
    match outcome {
        TickOutcome::LimitReached { count, limit } => warn!(
            session = %session,
            story_id = %state.story_id,
            count,
            limit,
            "ralph iteration limit reached; continuation required"
        ),
        TickOutcome::Rejected { count, limit } => debug!(
            session = %session,
            count,
            limit,
            "ralph tick rejected while blocked"
        ),
        _ => {}
    }
    Ok(outcome)
}

/// Lift an iteration-limit block. Returns false when Ralph is not blocked.
pub fn grant_continuation(ws: &Workspace, session: &SessionKey, now: Timestamp) -> Result<bool> {
    let Some(mut state) = ws.live_ralph(session, now) else {
        return Ok(false);
    };
    if !state.grant_continuation(now) {
        return Ok(false);
    }
    ws.store().write(session, RecordKind::Ralph, &state)?;
    info!(
        session = %session,
        story_id = %state.story_id,
        continuations = state.continuations,
        limit = state.effective_limit(&ws.config.ralph.limits),
        "ralph continuation granted"
    );
    Ok(true)
}

/// Delete the record and the story's retry history after it finished. Idempotent.
pub fn complete(ws: &Workspace, session: &SessionKey) -> Result<bool> {
    let existed = end_story(ws, session)?;
    if existed {
        info!(session = %session, "ralph completed");
    }
    Ok(existed)
}

/// Delete the record and retry history without completing the story. Idempotent.
pub fn cancel(ws: &Workspace, session: &SessionKey) -> Result<bool> {
    let existed = end_story(ws, session)?;
    if existed {
        info!(session = %session, "ralph cancelled");
    }
    Ok(existed)
}

fn end_story(ws: &Workspace, session: &SessionKey) -> Result<bool> {
    let store = ws.store();
    let existed = store.clear(session, RecordKind::Ralph)?;
    store.clear_workflow_history(session)?;
    Ok(existed)
}

pub fn status(ws: &Workspace, session: &SessionKey, now: Timestamp) -> RalphStatus {
    let Some(state) = ws.store().load_ralph(session) else {
        return RalphStatus::Inactive;
    };
    match ws.ttl().evaluate(state.last_activity, now) {
        Liveness::Expired { .. } => RalphStatus::Expired { state },
        liveness => {
            let limit = state.effective_limit(&ws.config.ralph.limits);
            RalphStatus::Active {
                state,
                liveness,
                limit,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enforcement::PlanApprovalMarker;
    use crate::core::types::{ActionKind, ActionRequest, Outcome, OutcomeFeedback, Rule};
    use crate::enforce::decide_request;
    use crate::feedback::{list_retries, record_outcome};
    use crate::test_support::{RecordingSink, TestWorkspace, fixed_now};
    use chrono::Duration;

    fn session() -> SessionKey {
        SessionKey::Id("s1".to_string())
    }

    #[test]
    fn activate_refuses_other_story_while_live() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        activate(&tw.ws, &session(), "S-1", TaskSize::Small, now).expect("activate");
        let err = activate(&tw.ws, &session(), "S-2", TaskSize::Small, now).expect_err("refused");
        assert!(err.to_string().contains("already active for story S-1"));
    }

    #[test]
    fn activate_replaces_expired_record() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        activate(&tw.ws, &session(), "S-1", TaskSize::Small, now).expect("activate");
        let later = now + Duration::hours(13);
        let state = activate(&tw.ws, &session(), "S-2", TaskSize::Large, later).expect("replace");
        assert_eq!(state.story_id, "S-2");
        assert_eq!(state.activated_at, later);
    }

    #[test]
    fn activate_consumes_plan_marker() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        let store = tw.ws.store();
        store
            .write(
                &session(),
                RecordKind::PlanApproval,
                &PlanApprovalMarker {
                    approved_at: now,
                    scope: Vec::new(),
                },
            )
            .expect("write marker");
        activate(&tw.ws, &session(), "S-1", TaskSize::Medium, now).expect("activate");
        assert!(store.load_plan_marker(&session()).is_none());
    }

    #[test]
    fn tick_counts_until_limit_then_blocks() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        activate(&tw.ws, &session(), "S-1", TaskSize::Small, now).expect("activate");
        for _ in 0..10 {
            assert!(matches!(
                tick(&tw.ws, &session(), now).expect("tick"),
                TickOutcome::Counted { .. }
            ));
        }
        assert_eq!(
            tick(&tw.ws, &session(), now).expect("tick"),
            TickOutcome::LimitReached {
                count: 11,
                limit: 10
            }
        );
        assert!(grant_continuation(&tw.ws, &session(), now).expect("continue"));
        assert!(!grant_continuation(&tw.ws, &session(), now).expect("continue again"));
    }

    #[test]
    fn tick_without_ralph_is_inactive() {
        let tw = TestWorkspace::new();
        assert_eq!(
            tick(&tw.ws, &session(), fixed_now()).expect("tick"),
            TickOutcome::Inactive
        );
    }

    #[test]
    fn status_reports_warning_then_expiry() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        activate(&tw.ws, &session(), "S-1", TaskSize::Small, now).expect("activate");

        match status(&tw.ws, &session(), now + Duration::hours(11)) {
            RalphStatus::Active { liveness, .. } => assert_eq!(
                liveness,
                Liveness::Warning {
                    remaining_secs: 3600
                }
            ),
            other => panic!("expected active, got {other:?}"),
        }
        assert!(matches!(
            status(&tw.ws, &session(), now + Duration::hours(13)),
            RalphStatus::Expired { .. }
        ));
        assert!(!heartbeat(&tw.ws, &session(), now + Duration::hours(13)).expect("heartbeat"));
    }

    #[test]
    fn heartbeat_keeps_session_alive() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        activate(&tw.ws, &session(), "S-1", TaskSize::Small, now).expect("activate");
        assert!(heartbeat(&tw.ws, &session(), now + Duration::hours(10)).expect("heartbeat"));
        assert!(matches!(
            status(&tw.ws, &session(), now + Duration::hours(20)),
            RalphStatus::Active { .. }
        ));
    }

    #[test]
    fn cancel_is_idempotent() {
        let tw = TestWorkspace::new();
        activate(&tw.ws, &session(), "S-1", TaskSize::Small, fixed_now()).expect("activate");
        assert!(cancel(&tw.ws, &session()).expect("cancel"));
        assert!(!cancel(&tw.ws, &session()).expect("cancel again"));
        assert_eq!(status(&tw.ws, &session(), fixed_now()), RalphStatus::Inactive);
    }

    fn failure(task: &str) -> OutcomeFeedback {
        OutcomeFeedback {
            session_id: Some("s1".to_string()),
            task_id: task.to_string(),
            agent_type: "kraken".to_string(),
            outcome: Outcome::Failure,
            error_signature: Some("tests failed".to_string()),
        }
    }

    #[test]
    fn new_story_starts_with_fresh_retry_ledgers() {
        let tw = TestWorkspace::new();
        let sink = RecordingSink::default();
        let now = fixed_now();
        activate(&tw.ws, &session(), "STORY-A", TaskSize::Small, now).expect("activate a");
        for _ in 0..4 {
            record_outcome(&tw.ws, &failure("1.1"), &sink, now).expect("failure");
        }
        assert!(list_retries(&tw.ws, &session(), Some("1.1"))[0].is_blocked());

        assert!(cancel(&tw.ws, &session()).expect("cancel"));
        assert!(list_retries(&tw.ws, &session(), None).is_empty());

        activate(&tw.ws, &session(), "STORY-B", TaskSize::Small, now).expect("activate b");
        let outcome = record_outcome(&tw.ws, &failure("1.1"), &sink, now).expect("failure");
        assert!(!outcome.is_blocked());
        assert_eq!(outcome.retry.expect("advice").attempt, 2);
    }

    #[test]
    fn replacing_expired_story_drops_old_ledgers() {
        let tw = TestWorkspace::new();
        let sink = RecordingSink::default();
        let now = fixed_now();
        activate(&tw.ws, &session(), "STORY-A", TaskSize::Small, now).expect("activate a");
        record_outcome(&tw.ws, &failure("1.1"), &sink, now).expect("failure");

        let later = now + Duration::hours(13);
        activate(&tw.ws, &session(), "STORY-B", TaskSize::Small, later).expect("activate b");
        assert!(list_retries(&tw.ws, &session(), None).is_empty());
    }

    #[test]
    fn completion_forgets_earlier_denials() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        let store = tw.ws.store();
        store
            .write(
                &session(),
                RecordKind::PlanApproval,
                &PlanApprovalMarker {
                    approved_at: now,
                    scope: Vec::new(),
                },
            )
            .expect("write marker");
        let edit = ActionRequest::new(Some("s1"), ActionKind::EditFile("src/lib.rs".to_string()));
        assert_eq!(decide_request(&tw.ws, &edit, now).rule, Rule::PlanGateDirectEdit);
        assert!(store.paths().record_path(&session(), RecordKind::Denials).is_file());

        activate(&tw.ws, &session(), "S-1", TaskSize::Small, now).expect("activate");
        assert!(complete(&tw.ws, &session()).expect("complete"));
        assert!(!store.paths().record_path(&session(), RecordKind::Denials).exists());
    }
}
