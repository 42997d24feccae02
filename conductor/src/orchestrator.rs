//! Maestro orchestration: feed user utterances through the phase machine and
//! persist the result.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::maestro::{Event, MaestroState, Next, Phase, apply_utterance, phase_of};
use crate::core::types::{SessionKey, Timestamp};
use crate::io::paths::RecordKind;
use crate::workspace::Workspace;

/// Result of processing one utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UtteranceOutcome {
    pub event: Event,
    pub phase: Phase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaestroStatus {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<MaestroState>,
}

pub fn utter(
    ws: &Workspace,
    session: &SessionKey,
    utterance: &str,
    now: Timestamp,
) -> Result<UtteranceOutcome> {
    let current = ws.live_maestro(session, now);
    let transition = apply_utterance(
        current.as_ref(),
        utterance,
        session.as_id().unwrap_or_default(),
        now,
    );
    let store = ws.store();
    let phase = match transition.next {
        Next::Keep => phase_of(current.as_ref()),
        Next::Write(state) => {
            store.write(session, RecordKind::Maestro, &state)?;
            state.phase()
        }
        Next::Delete => {
            end_pipeline(ws, session)?;
            Phase::Inactive
        }
    };
    match transition.event {
        Event::Ignored | Event::Unmatched => {
            debug!(session = %session, event = ?transition.event, phase = phase.as_str(), "utterance did not change phase");
        }
        event => info!(session = %session, event = ?event, phase = phase.as_str(), "maestro transition"),
    }
    Ok(UtteranceOutcome {
        event: transition.event,
        phase,
    })
}

pub fn status(ws: &Workspace, session: &SessionKey, now: Timestamp) -> MaestroStatus {
    let state = ws.live_maestro(session, now);
    MaestroStatus {
        phase: phase_of(state.as_ref()),
        state,
    }
}

/// Delete the record. Idempotent.
pub fn cancel(ws: &Workspace, session: &SessionKey) -> Result<bool> {
    let existed = end_pipeline(ws, session)?;
    if existed {
        info!(session = %session, "maestro cancelled");
    }
    Ok(existed)
}

/// Retry and denial history stays with a Ralph story still running in the session.
fn end_pipeline(ws: &Workspace, session: &SessionKey) -> Result<bool> {
    let store = ws.store();
    let existed = store.clear(session, RecordKind::Maestro)?;
    if store.load_ralph(session).is_none() {
        store.clear_workflow_history(session)?;
    }
    Ok(existed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller;
    use crate::core::types::{ActionKind, ActionRequest, Rule, TaskSize};
    use crate::enforce::decide_request;
    use crate::test_support::{TestWorkspace, fixed_now};
    use chrono::Duration;

    fn session() -> SessionKey {
        SessionKey::Id("s1".to_string())
    }

    #[test]
    fn full_pipeline_reaches_execution() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        let phases: Vec<Phase> = ["/maestro", "recon complete", "interview complete", "approve"]
            .iter()
            .map(|text| utter(&tw.ws, &session(), text, now).expect("utter").phase)
            .collect();
        assert_eq!(
            phases,
            vec![
                Phase::Recon,
                Phase::Interview,
                Phase::PlanApproval,
                Phase::Execution
            ]
        );
        assert_eq!(status(&tw.ws, &session(), now).phase, Phase::Execution);
    }

    #[test]
    fn incidental_yes_does_not_approve() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        for text in ["/maestro", "recon complete", "interview complete"] {
            utter(&tw.ws, &session(), text, now).expect("utter");
        }
        let outcome =
            utter(&tw.ws, &session(), "yes but implement anyway", now).expect("utter");
        assert_eq!(outcome.event, Event::Unmatched);
        assert_eq!(outcome.phase, Phase::PlanApproval);
    }

    #[test]
    fn idle_maestro_expires() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        utter(&tw.ws, &session(), "/maestro", now).expect("utter");
        let later = now + Duration::hours(13);
        assert_eq!(status(&tw.ws, &session(), later).phase, Phase::Inactive);
        let outcome = utter(&tw.ws, &session(), "/maestro", later).expect("reactivate");
        assert_eq!(outcome.event, Event::Activated);
    }

    #[test]
    fn cancel_twice_is_quiet() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        utter(&tw.ws, &session(), "/maestro", now).expect("utter");
        assert!(cancel(&tw.ws, &session()).expect("cancel"));
        assert!(!cancel(&tw.ws, &session()).expect("cancel again"));
        let outcome = utter(&tw.ws, &session(), "cancel maestro", now).expect("utter cancel");
        assert_eq!(outcome.phase, Phase::Inactive);
    }

    #[test]
    fn cancelling_pipeline_forgets_phase_gate_denials() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        let kraken = ActionRequest::new(Some("s1"), ActionKind::InvokeAgent("kraken".to_string()));
        let denials = tw.ws.paths.record_path(&session(), RecordKind::Denials);

        utter(&tw.ws, &session(), "/maestro", now).expect("utter");
        assert_eq!(decide_request(&tw.ws, &kraken, now).rule, Rule::PhaseGate);
        assert!(denials.is_file());

        utter(&tw.ws, &session(), "cancel maestro", now).expect("cancel");
        assert!(!denials.exists());
    }

    #[test]
    fn running_story_keeps_history_when_pipeline_ends() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        let kraken = ActionRequest::new(Some("s1"), ActionKind::InvokeAgent("kraken".to_string()));
        let denials = tw.ws.paths.record_path(&session(), RecordKind::Denials);

        controller::activate(&tw.ws, &session(), "S-1", TaskSize::Small, now).expect("activate");
        utter(&tw.ws, &session(), "/maestro", now).expect("utter");
        assert_eq!(decide_request(&tw.ws, &kraken, now).rule, Rule::PhaseGate);

        assert!(cancel(&tw.ws, &session()).expect("cancel"));
        assert!(denials.is_file());
    }
}
