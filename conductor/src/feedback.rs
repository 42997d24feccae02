//! Outcome feedback: what happens after an agent task ran.
//!
//! Every report is activity for the session. Failures advance the retry
//! ledger of the task; successes retire it. Plan-review successes arm the
//! direct-edit gate.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::controller;
use crate::core::retry::{BLOCKED_ATTEMPT, RetryLedger, Step, attribute};
use crate::core::types::{
    LearningKind, LearningRecord, Outcome, OutcomeFeedback, SessionKey, Timestamp,
};
use crate::enforce::approve_plan;
use crate::io::learning::{LearningSink, deliver};
use crate::io::paths::RecordKind;
use crate::io::prompt::render_retry_context;
use crate::workspace::Workspace;

/// Longest error signature kept in ledgers and learning records.
const MAX_ERROR_SIGNATURE_CHARS: usize = 2000;

/// Guidance for the next attempt of a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryAdvice {
    /// 1-based number of the next attempt.
    pub attempt: u32,
    #[serde(flatten)]
    pub step: Step,
    /// Agent to run next; `None` when blocked.
    pub agent: Option<String>,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackOutcome {
    pub task_id: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryAdvice>,
    pub plan_marker_written: bool,
    pub learning_delivered: bool,
}

impl FeedbackOutcome {
    pub fn is_blocked(&self) -> bool {
        self.retry
            .as_ref()
            .is_some_and(|advice| advice.step.is_blocked())
    }
}

pub fn record_outcome(
    ws: &Workspace,
    feedback: &OutcomeFeedback,
    sink: &dyn LearningSink,
    now: Timestamp,
) -> Result<FeedbackOutcome> {
    let session = feedback.session();
    touch_workflows(ws, &session, now)?;

    match feedback.outcome {
        Outcome::Failure => record_failure(ws, &session, feedback, sink, now),
        Outcome::Success => record_success(ws, &session, feedback, sink, now),
    }
}

fn touch_workflows(ws: &Workspace, session: &SessionKey, now: Timestamp) -> Result<()> {
    controller::heartbeat(ws, session, now)?;
    if let Some(mut maestro) = ws.live_maestro(session, now) {
        maestro.touch(now);
        ws.store().write(session, RecordKind::Maestro, &maestro)?;
    }
    Ok(())
}

fn record_failure(
    ws: &Workspace,
    session: &SessionKey,
    feedback: &OutcomeFeedback,
    sink: &dyn LearningSink,
    now: Timestamp,
) -> Result<FeedbackOutcome> {
    let store = ws.store();
    let roster = &ws.config.agents;
    let ledgers = store.list_ledgers(session);
    let mut ledger = attribute(&ledgers, &feedback.task_id, &feedback.agent_type, roster)
        .cloned()
        .unwrap_or_else(|| RetryLedger::new(&feedback.task_id, &feedback.agent_type, now));

    let signature = feedback.error_signature.as_deref().map(clip_signature);
    let step = ledger.record_failure(signature, roster, now);
    store.write_ledger(session, &ledger)?;

    if step.is_blocked() {
        warn!(
            session = %session,
            task_id = %ledger.task_id,
            agent_type = %ledger.agent_type,
            failures = ledger.attempt,
            "task blocked; human decision required"
        );
    } else {
        info!(
            session = %session,
            task_id = %ledger.task_id,
            attempt = ledger.attempt + 1,
            step = ?step,
            "task failed; retry scheduled"
        );
    }

    let context = render_retry_context(&ledger, &step).unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "retry context render failed");
        format!("retry {} of task {}", ledger.attempt + 1, ledger.task_id)
    });

    let record = LearningRecord {
        session_id: session.as_id().map(str::to_string),
        kind: LearningKind::FailedApproach,
        content: format!(
            "{} failed task {}: {}",
            feedback.agent_type,
            feedback.task_id,
            signature.unwrap_or("no error signature")
        ),
        context: json!({
            "task_id": ledger.task_id,
            "assigned_agent": ledger.agent_type,
            "reporting_agent": feedback.agent_type,
            "failures": ledger.attempt,
            "next_step": step,
        }),
    };
    let learning_delivered = deliver(sink, &record);

    let agent = step.agent(&ledger.agent_type).map(str::to_string);
    Ok(FeedbackOutcome {
        task_id: feedback.task_id.clone(),
        outcome: Outcome::Failure,
        retry: Some(RetryAdvice {
            attempt: (ledger.attempt + 1).min(BLOCKED_ATTEMPT),
            step,
            agent,
            context,
        }),
        plan_marker_written: false,
        learning_delivered,
    })
}

fn record_success(
    ws: &Workspace,
    session: &SessionKey,
    feedback: &OutcomeFeedback,
    sink: &dyn LearningSink,
    now: Timestamp,
) -> Result<FeedbackOutcome> {
    let store = ws.store();
    let task_ledgers: Vec<RetryLedger> = store
        .list_ledgers(session)
        .into_iter()
        .filter(|ledger| ledger.task_id == feedback.task_id)
        .collect();
    let failures: u32 = task_ledgers.iter().map(|ledger| ledger.attempt).sum();
    for ledger in &task_ledgers {
        store.clear_ledger(session, ledger)?;
    }

    let learning_delivered = if failures > 0 {
        info!(
            session = %session,
            task_id = %feedback.task_id,
            failures,
            "task recovered; retry ledger cleared"
        );
        let record = LearningRecord {
            session_id: session.as_id().map(str::to_string),
            kind: LearningKind::WorkingSolution,
            content: format!(
                "{} resolved task {} after {} failed attempts",
                feedback.agent_type, feedback.task_id, failures
            ),
            context: json!({
                "task_id": feedback.task_id,
                "resolving_agent": feedback.agent_type,
                "failures": failures,
            }),
        };
        deliver(sink, &record)
    } else {
        false
    };

    let plan_marker_written = if ws.config.agents.is_plan_review(&feedback.agent_type) {
        approve_plan(ws, session, Vec::new(), now)?;
        true
    } else {
        false
    };

    Ok(FeedbackOutcome {
        task_id: feedback.task_id.clone(),
        outcome: Outcome::Success,
        retry: None,
        plan_marker_written,
        learning_delivered,
    })
}

fn clip_signature(raw: &str) -> &str {
    match raw.char_indices().nth(MAX_ERROR_SIGNATURE_CHARS) {
        Some((end, _)) => &raw[..end],
        None => raw,
    }
}

/// Retry ledgers of a session, optionally restricted to one task.
pub fn list_retries(ws: &Workspace, session: &SessionKey, task_id: Option<&str>) -> Vec<RetryLedger> {
    ws.store()
        .list_ledgers(session)
        .into_iter()
        .filter(|ledger| task_id.is_none_or(|task| ledger.task_id == task))
        .collect()
}

/// Operator reset of retry ledgers (e.g. after resolving a blocked task by hand).
pub fn clear_retries(ws: &Workspace, session: &SessionKey, task_id: Option<&str>) -> Result<usize> {
    let store = ws.store();
    let mut cleared = 0;
    for ledger in list_retries(ws, session, task_id) {
        if store.clear_ledger(session, &ledger)? {
            cleared += 1;
        }
    }
    if cleared > 0 {
        info!(session = %session, task_id = ?task_id, cleared, "retry ledgers cleared");
    }
    Ok(cleared)
}
