//! Maestro phase state machine driven by user utterances.
//!
//! Transitions are a pure function of the current record and one utterance.
//! Phrase matching is deliberately narrow: a phrase that does not apply to the
//! current phase is ignored rather than reported, because it may be incidental
//! conversational text.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::Timestamp;

/// Persisted Maestro state for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaestroState {
    pub active: bool,
    pub session_id: String,
    pub recon_complete: bool,
    pub interview_complete: bool,
    pub plan_approved: bool,
    pub activated_at: Timestamp,
    pub last_activity: Timestamp,
}

impl MaestroState {
    pub fn activate(session_id: &str, now: Timestamp) -> Self {
        Self {
            active: true,
            session_id: session_id.to_string(),
            recon_complete: false,
            interview_complete: false,
            plan_approved: false,
            activated_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self, now: Timestamp) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    /// Current phase. Each completed flag moves the session on to the step it
    /// unlocks: finished recon means the interview is running, a finished
    /// interview means the plan awaits approval. Only an approved plan reaches
    /// [`Phase::Execution`], the one phase that lets implementation agents run.
    pub fn phase(&self) -> Phase {
        if !self.active {
            Phase::Inactive
        } else if self.plan_approved {
            Phase::Execution
        } else if self.interview_complete {
            Phase::PlanApproval
        } else if self.recon_complete {
            Phase::Interview
        } else {
            Phase::Recon
        }
    }
}

/// Workflow phase, ordered. Derived from the flags, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Inactive,
    Recon,
    Interview,
    PlanApproval,
    Execution,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Recon => "recon",
            Self::Interview => "interview",
            Self::PlanApproval => "plan_approval",
            Self::Execution => "execution",
        }
    }
}

/// Phase of an optional record; absence is [`Phase::Inactive`].
pub fn phase_of(state: Option<&MaestroState>) -> Phase {
    state.map_or(Phase::Inactive, MaestroState::phase)
}

/// Recognized control phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phrase {
    Cancel,
    Activate,
    ReconComplete,
    InterviewComplete,
    ApprovePlan,
}

// Order matters: the first matching row wins, so cancel must precede activate
// ("/maestro cancel" also starts with "/maestro").
static PHRASE_TABLE: LazyLock<Vec<(Phrase, Regex)>> = LazyLock::new(|| {
    [
        (
            Phrase::Cancel,
            r"(?i)^\s*(?:/maestro\s+(?:cancel|stop|off)|(?:cancel|stop|exit|abort)\s+maestro)\b",
        ),
        (
            Phrase::Activate,
            r"(?i)^\s*(?:/maestro\b|(?:start|activate|begin)\s+maestro\b|maestro\s+(?:start|on)\b)",
        ),
        (
            Phrase::ReconComplete,
            r"(?i)\brecon(?:naissance)?\s+(?:is\s+)?complete\b",
        ),
        (
            Phrase::InterviewComplete,
            r"(?i)\binterview\s+(?:is\s+)?complete\b",
        ),
        (
            Phrase::ApprovePlan,
            r"(?i)^\s*(?:y|yes|approve|approved|approve plan|plan approved|lgtm)\s*[.!]*\s*$",
        ),
    ]
    .into_iter()
    .map(|(phrase, pattern)| (phrase, Regex::new(pattern).expect("phrase pattern is valid")))
    .collect()
});

/// Match an utterance against the phrase table.
pub fn classify(utterance: &str) -> Option<Phrase> {
    PHRASE_TABLE
        .iter()
        .find(|(_, pattern)| pattern.is_match(utterance))
        .map(|(phrase, _)| *phrase)
}

/// What the caller must do with the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Keep,
    Write(MaestroState),
    Delete,
}

/// Observable effect of an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Activated,
    Cancelled,
    ReconCompleted,
    InterviewCompleted,
    PlanApproved,
    /// A control phrase that does not apply in the current phase.
    Ignored,
    /// No control phrase matched.
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Next,
    pub event: Event,
}

impl Transition {
    fn new(next: Next, event: Event) -> Self {
        Self { next, event }
    }
}

/// Compute the transition for one utterance.
///
/// Any utterance processed while Maestro is active counts as activity.
pub fn apply_utterance(
    current: Option<&MaestroState>,
    utterance: &str,
    session_id: &str,
    now: Timestamp,
) -> Transition {
    let phrase = classify(utterance);
    let Some(state) = current.filter(|state| state.active) else {
        return match phrase {
            Some(Phrase::Activate) => Transition::new(
                Next::Write(MaestroState::activate(session_id, now)),
                Event::Activated,
            ),
            Some(Phrase::Cancel) => Transition::new(Next::Delete, Event::Cancelled),
            Some(_) => Transition::new(Next::Keep, Event::Ignored),
            None => Transition::new(Next::Keep, Event::Unmatched),
        };
    };

    let mut next = state.clone();
    next.touch(now);
    let event = match phrase {
        Some(Phrase::Cancel) => return Transition::new(Next::Delete, Event::Cancelled),
        Some(Phrase::Activate) => Event::Ignored,
        Some(Phrase::ReconComplete) if !next.recon_complete => {
            next.recon_complete = true;
            Event::ReconCompleted
        }
        Some(Phrase::InterviewComplete) if next.recon_complete && !next.interview_complete => {
            next.interview_complete = true;
            Event::InterviewCompleted
        }
        Some(Phrase::ApprovePlan) if next.interview_complete && !next.plan_approved => {
            next.plan_approved = true;
            Event::PlanApproved
        }
        Some(_) => Event::Ignored,
        None => Event::Unmatched,
    };
    Transition::new(Next::Write(next), event)
}
