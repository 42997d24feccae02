//! Human-readable text handed back to the host: retry context and resume offers.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::maestro::phase_of;
use crate::core::retry::{BLOCKED_ATTEMPT, RetryLedger, Step};
use crate::io::archive::CrashRecoverySnapshot;

const RETRY_CONTEXT_TEMPLATE: &str = include_str!("templates/retry_context.md");
const RESUME_OFFER_TEMPLATE: &str = include_str!("templates/resume_offer.md");

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("retry_context", RETRY_CONTEXT_TEMPLATE)?;
        env.add_template("resume_offer", RESUME_OFFER_TEMPLATE)?;
        Ok(Self { env })
    }
}

fn step_label(step: &Step) -> &'static str {
    match step {
        Step::Original => "original agent",
        Step::SameWithContext => "same agent with error context",
        Step::Escalate { .. } => "escalation",
        Step::Blocked => "blocked",
    }
}

/// Context for the next attempt of a failed task.
pub fn render_retry_context(ledger: &RetryLedger, step: &Step) -> Result<String> {
    let engine = PromptEngine::new()?;
    let template = engine.env.get_template("retry_context")?;
    let rendered = template.render(context! {
        task_id => ledger.task_id,
        attempt => (ledger.attempt + 1).min(BLOCKED_ATTEMPT),
        failures => ledger.attempt,
        assigned => ledger.agent_type,
        agent => step.agent(&ledger.agent_type),
        step => step_label(step),
        blocked => step.is_blocked(),
        last_error => ledger.last_error_signature.as_deref().map(str::trim).filter(|s| !s.is_empty()),
    })?;
    Ok(rendered.trim().to_string())
}

/// Offer text for a pending crash snapshot.
pub fn render_resume_offer(snapshot: &CrashRecoverySnapshot) -> Result<String> {
    let engine = PromptEngine::new()?;
    let template = engine.env.get_template("resume_offer")?;
    let state = &snapshot.last_known_state;
    let maestro_phase = state
        .maestro
        .as_ref()
        .map(|maestro| phase_of(Some(maestro)).as_str());
    let rendered = template.render(context! {
        working_dir => snapshot.working_dir,
        snapshot_id => snapshot.snapshot_id,
        captured_at => snapshot.captured_at.to_rfc3339(),
        story_id => snapshot.story_id,
        iteration_count => state.ralph.as_ref().map(|ralph| ralph.iteration_count),
        task_size => state.ralph.as_ref().map(|ralph| ralph.task_size.as_str()),
        maestro_phase => maestro_phase,
    })?;
    Ok(rendered.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agents::AgentRoster;
    use crate::core::maestro::MaestroState;
    use crate::core::ralph::RalphState;
    use crate::core::types::{SessionKey, TaskSize};
    use crate::io::archive::LastKnownState;
    use crate::io::paths::StatePaths;
    use crate::test_support::fixed_now;

    #[test]
    fn retry_context_includes_previous_error() {
        let roster = AgentRoster::default();
        let mut ledger = RetryLedger::new("T-1", "kraken", fixed_now());
        let step = ledger.record_failure(Some("E0308 mismatched types"), &roster, fixed_now());
        let text = render_retry_context(&ledger, &step).expect("render");
        assert!(text.contains("Retry 2 of task `T-1`"));
        assert!(text.contains("Run `kraken`"));
        assert!(text.contains("E0308 mismatched types"));
    }

    #[test]
    fn blocked_context_asks_for_human() {
        let roster = AgentRoster::default();
        let mut ledger = RetryLedger::new("T-1", "kraken", fixed_now());
        let mut step = Step::Original;
        for _ in 0..4 {
            step = ledger.record_failure(None, &roster, fixed_now());
        }
        let text = render_retry_context(&ledger, &step).expect("render");
        assert!(text.contains("failed 4 times"));
        assert!(text.contains("**blocked**"));
        assert!(!text.contains("Previous error"));
    }

    #[test]
    fn resume_offer_names_story_and_phase() {
        let paths = StatePaths::new("/work");
        let now = fixed_now();
        let mut maestro = MaestroState::activate("s1", now);
        maestro.recon_complete = true;
        let snapshot = CrashRecoverySnapshot::new(
            &paths,
            &SessionKey::Id("s1".to_string()),
            LastKnownState {
                ralph: Some(RalphState::activate("STORY-7", TaskSize::Large, now)),
                maestro: Some(maestro),
                plan_marker: None,
            },
            now,
        );
        let text = render_resume_offer(&snapshot).expect("render");
        assert!(text.contains("Ralph story `STORY-7`"));
        assert!(text.contains("large task"));
        assert!(text.contains("Maestro phase: interview"));
        assert!(text.contains(&format!("conductor resume accept {}", snapshot.snapshot_id)));
    }
}
