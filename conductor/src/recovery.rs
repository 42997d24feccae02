//! Crash recovery: snapshot live workflows when a session ends, offer them to
//! the next session, and restore only on explicit confirmation.

use anyhow::{Result, anyhow, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::types::{SessionKey, Timestamp};
use crate::io::archive::{
    CrashRecoverySnapshot, LastKnownState, ResumeChoice, ResumeDecision, append_decision,
    append_snapshot, find_decision, find_snapshot, pending_snapshots,
};
use crate::io::paths::RecordKind;
use crate::io::prompt::render_resume_offer;
use crate::workspace::Workspace;

/// A pending snapshot presented to a starting session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeOffer {
    pub snapshot_id: String,
    pub story_id: Option<String>,
    pub captured_at: Timestamp,
    pub message: String,
}

/// Archive live Ralph/Maestro state for `session` and clear it, along with the
/// session's retry ledgers and denial log.
///
/// Returns `None` when nothing was active.
pub fn end_session(
    ws: &Workspace,
    session: &SessionKey,
    now: Timestamp,
) -> Result<Option<CrashRecoverySnapshot>> {
    let store = ws.store();
    let ralph = ws.live_ralph(session, now);
    let maestro = ws.live_maestro(session, now);
    if ralph.is_none() && maestro.is_none() {
        store.clear_workflow_history(session)?;
        return Ok(None);
    }

    let state = LastKnownState {
        ralph,
        maestro,
        plan_marker: store.load_plan_marker(session),
    };
    let snapshot = CrashRecoverySnapshot::new(&ws.paths, session, state, now);
    append_snapshot(&ws.paths, &snapshot)?;

    for kind in [RecordKind::Ralph, RecordKind::Maestro, RecordKind::PlanApproval] {
        store.clear(session, kind)?;
    }
    store.clear_workflow_history(session)?;
    info!(
        session = %session,
        snapshot_id = %snapshot.snapshot_id,
        story_id = ?snapshot.story_id,
        "session ended with active workflow; snapshot archived"
    );
    Ok(Some(snapshot))
}

/// Pending snapshots from this working context, as offers.
pub fn start_session(ws: &Workspace, session: &SessionKey) -> Result<Vec<ResumeOffer>> {
    let offers = pending_snapshots(&ws.paths)?
        .into_iter()
        .map(|snapshot| {
            let message = render_resume_offer(&snapshot).unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "resume offer render failed");
                format!("interrupted session snapshot {}", snapshot.snapshot_id)
            });
            ResumeOffer {
                snapshot_id: snapshot.snapshot_id,
                story_id: snapshot.story_id,
                captured_at: snapshot.captured_at,
                message,
            }
        })
        .collect::<Vec<_>>();
    if !offers.is_empty() {
        info!(session = %session, count = offers.len(), "resume offers pending");
    }
    Ok(offers)
}

/// Reactivate a snapshot under `session`. The iteration budget already spent is kept.
pub fn resume(
    ws: &Workspace,
    snapshot_id: &str,
    session: &SessionKey,
    now: Timestamp,
) -> Result<LastKnownState> {
    let snapshot = undecided_snapshot(ws, snapshot_id)?;
    if ws.live_ralph(session, now).is_some() || ws.live_maestro(session, now).is_some() {
        bail!("session {session} already has an active workflow; end or cancel it before resuming");
    }

    let store = ws.store();
    let mut state = snapshot.last_known_state;
    if let Some(ralph) = state.ralph.as_mut() {
        ralph.activated_at = now;
        ralph.last_activity = now;
        store.write(session, RecordKind::Ralph, ralph)?;
    }
    if let Some(maestro) = state.maestro.as_mut() {
        maestro.session_id = session.as_id().unwrap_or_default().to_string();
        maestro.activated_at = now;
        maestro.last_activity = now;
        store.write(session, RecordKind::Maestro, maestro)?;
    }
    if let Some(marker) = state.plan_marker.as_ref() {
        store.write(session, RecordKind::PlanApproval, marker)?;
    }

    record_decision(ws, snapshot_id, ResumeChoice::Resume, session, now)?;
    info!(session = %session, snapshot_id, "snapshot resumed");
    Ok(state)
}

/// Drop a snapshot without restoring anything.
pub fn discard(ws: &Workspace, snapshot_id: &str, session: &SessionKey, now: Timestamp) -> Result<()> {
    undecided_snapshot(ws, snapshot_id)?;
    record_decision(ws, snapshot_id, ResumeChoice::Discard, session, now)?;
    info!(session = %session, snapshot_id, "snapshot discarded");
    Ok(())
}

fn undecided_snapshot(ws: &Workspace, snapshot_id: &str) -> Result<CrashRecoverySnapshot> {
    let snapshot = find_snapshot(&ws.paths, snapshot_id)?
        .ok_or_else(|| anyhow!("unknown snapshot {snapshot_id}"))?;
    if let Some(decision) = find_decision(&ws.paths, snapshot_id)? {
        bail!(
            "snapshot {snapshot_id} was already {} at {}",
            match decision.choice {
                ResumeChoice::Resume => "resumed",
                ResumeChoice::Discard => "discarded",
            },
            decision.decided_at.to_rfc3339()
        );
    }
    Ok(snapshot)
}

fn record_decision(
    ws: &Workspace,
    snapshot_id: &str,
    choice: ResumeChoice,
    session: &SessionKey,
    now: Timestamp,
) -> Result<()> {
    append_decision(
        &ws.paths,
        &ResumeDecision {
            snapshot_id: snapshot_id.to_string(),
            choice,
            session: session.as_id().map(str::to_string),
            decided_at: now,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller;
    use crate::core::ralph::TickOutcome;
    use crate::core::types::{Outcome, OutcomeFeedback, TaskSize};
    use crate::feedback::{list_retries, record_outcome};
    use crate::test_support::{RecordingSink, TestWorkspace, fixed_now};
    use chrono::Duration;

    fn key(id: &str) -> SessionKey {
        SessionKey::Id(id.to_string())
    }

    #[test]
    fn idle_session_end_writes_nothing() {
        let tw = TestWorkspace::new();
        assert!(
            end_session(&tw.ws, &key("a"), fixed_now())
                .expect("end")
                .is_none()
        );
        assert!(!tw.ws.paths.snapshots_path.exists());
    }

    #[test]
    fn session_end_drops_retry_ledgers() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        controller::activate(&tw.ws, &key("a"), "S-1", TaskSize::Small, now).expect("activate");
        let report = OutcomeFeedback {
            session_id: Some("a".to_string()),
            task_id: "1.1".to_string(),
            agent_type: "kraken".to_string(),
            outcome: Outcome::Failure,
            error_signature: None,
        };
        record_outcome(&tw.ws, &report, &RecordingSink::default(), now).expect("failure");
        assert_eq!(list_retries(&tw.ws, &key("a"), None).len(), 1);

        end_session(&tw.ws, &key("a"), now).expect("end");
        assert!(list_retries(&tw.ws, &key("a"), None).is_empty());
    }

    #[test]
    fn resume_restores_iterations_with_fresh_timestamps() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        controller::activate(&tw.ws, &key("a"), "S-1", TaskSize::Small, now).expect("activate");
        for _ in 0..3 {
            controller::tick(&tw.ws, &key("a"), now).expect("tick");
        }
        let snapshot = end_session(&tw.ws, &key("a"), now)
            .expect("end")
            .expect("snapshot");
        assert!(tw.ws.store().load_ralph(&key("a")).is_none());

        let later = now + Duration::hours(1);
        let state = resume(&tw.ws, &snapshot.snapshot_id, &key("b"), later).expect("resume");
        let ralph = state.ralph.expect("ralph restored");
        assert_eq!(ralph.iteration_count, 3);
        assert_eq!(ralph.activated_at, later);
        assert_eq!(
            controller::tick(&tw.ws, &key("b"), later).expect("tick"),
            TickOutcome::Counted {
                count: 4,
                limit: 10
            }
        );
    }

    #[test]
    fn deciding_twice_is_an_error() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        controller::activate(&tw.ws, &key("a"), "S-1", TaskSize::Small, now).expect("activate");
        let snapshot = end_session(&tw.ws, &key("a"), now)
            .expect("end")
            .expect("snapshot");
        discard(&tw.ws, &snapshot.snapshot_id, &key("b"), now).expect("discard");
        let err = resume(&tw.ws, &snapshot.snapshot_id, &key("b"), now).expect_err("decided");
        assert!(err.to_string().contains("already discarded"));
        assert!(start_session(&tw.ws, &key("b")).expect("start").is_empty());
    }

    #[test]
    fn unknown_snapshot_is_an_error() {
        let tw = TestWorkspace::new();
        assert!(discard(&tw.ws, "nope", &key("b"), fixed_now()).is_err());
    }
}
