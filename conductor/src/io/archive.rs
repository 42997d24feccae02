//! Append-only crash-recovery archive under `.conductor/archive/`.
//!
//! Snapshots and resume/discard decisions live in two separate logs so that
//! neither is ever rewritten. A snapshot is pending while no decision names it.

use std::collections::HashSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::enforcement::PlanApprovalMarker;
use crate::core::maestro::MaestroState;
use crate::core::ralph::RalphState;
use crate::core::types::{SessionKey, Timestamp};
use crate::io::paths::{StatePaths, partition_name, short_hash};
use crate::io::store::{append_jsonl, read_jsonl};

/// Workflow state captured when a session ended with Ralph or Maestro active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastKnownState {
    #[serde(default)]
    pub ralph: Option<RalphState>,
    #[serde(default)]
    pub maestro: Option<MaestroState>,
    #[serde(default)]
    pub plan_marker: Option<PlanApprovalMarker>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashRecoverySnapshot {
    pub snapshot_id: String,
    /// Session that was ending; `None` for the legacy partition.
    pub session: Option<String>,
    pub story_id: Option<String>,
    pub working_dir: String,
    pub captured_at: Timestamp,
    pub last_known_state: LastKnownState,
}

impl CrashRecoverySnapshot {
    pub fn new(
        paths: &StatePaths,
        session: &SessionKey,
        last_known_state: LastKnownState,
        captured_at: Timestamp,
    ) -> Self {
        let story_id = last_known_state
            .ralph
            .as_ref()
            .map(|ralph| ralph.story_id.clone());
        Self {
            snapshot_id: snapshot_id(session, captured_at),
            session: session.as_id().map(str::to_string),
            story_id,
            working_dir: paths.working_dir().display().to_string(),
            captured_at,
            last_known_state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeChoice {
    Resume,
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeDecision {
    pub snapshot_id: String,
    pub choice: ResumeChoice,
    /// Session that made the choice.
    pub session: Option<String>,
    pub decided_at: Timestamp,
}

fn snapshot_id(session: &SessionKey, captured_at: Timestamp) -> String {
    let seed = format!("{}\0{}", partition_name(session), captured_at.to_rfc3339());
    format!(
        "{}-{}",
        captured_at.format("%Y%m%dT%H%M%SZ"),
        &short_hash(seed.as_bytes())[..8]
    )
}

pub fn append_snapshot(paths: &StatePaths, snapshot: &CrashRecoverySnapshot) -> Result<()> {
    debug!(snapshot_id = %snapshot.snapshot_id, story_id = ?snapshot.story_id, "archiving crash snapshot");
    append_jsonl(&paths.snapshots_path, snapshot)
}

pub fn append_decision(paths: &StatePaths, decision: &ResumeDecision) -> Result<()> {
    debug!(snapshot_id = %decision.snapshot_id, choice = ?decision.choice, "recording resume decision");
    append_jsonl(&paths.resume_decisions_path, decision)
}

pub fn read_snapshots(paths: &StatePaths) -> Result<Vec<CrashRecoverySnapshot>> {
    read_jsonl(&paths.snapshots_path)
}

pub fn read_decisions(paths: &StatePaths) -> Result<Vec<ResumeDecision>> {
    read_jsonl(&paths.resume_decisions_path)
}

/// Snapshots from this working context that nobody has resumed or discarded yet.
pub fn pending_snapshots(paths: &StatePaths) -> Result<Vec<CrashRecoverySnapshot>> {
    let decided: HashSet<String> = read_decisions(paths)?
        .into_iter()
        .map(|decision| decision.snapshot_id)
        .collect();
    let working_dir = paths.working_dir().display().to_string();
    Ok(read_snapshots(paths)?
        .into_iter()
        .filter(|snapshot| snapshot.working_dir == working_dir)
        .filter(|snapshot| !decided.contains(&snapshot.snapshot_id))
        .collect())
}

pub fn find_decision(paths: &StatePaths, snapshot_id: &str) -> Result<Option<ResumeDecision>> {
    Ok(read_decisions(paths)?
        .into_iter()
        .find(|decision| decision.snapshot_id == snapshot_id))
}

pub fn find_snapshot(paths: &StatePaths, snapshot_id: &str) -> Result<Option<CrashRecoverySnapshot>> {
    Ok(read_snapshots(paths)?
        .into_iter()
        .find(|snapshot| snapshot.snapshot_id == snapshot_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskSize;
    use crate::test_support::fixed_now;

    fn snapshot(paths: &StatePaths, session: &str, story: &str) -> CrashRecoverySnapshot {
        let now = fixed_now();
        CrashRecoverySnapshot::new(
            paths,
            &SessionKey::Id(session.to_string()),
            LastKnownState {
                ralph: Some(RalphState::activate(story, TaskSize::Small, now)),
                maestro: None,
                plan_marker: None,
            },
            now,
        )
    }

    #[test]
    fn snapshot_ids_differ_per_session() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = StatePaths::new(temp.path());
        let a = snapshot(&paths, "a", "S-1");
        let b = snapshot(&paths, "b", "S-1");
        assert_ne!(a.snapshot_id, b.snapshot_id);
        assert!(a.snapshot_id.starts_with("20260115T120000Z-"));
        assert_eq!(a.story_id.as_deref(), Some("S-1"));
    }

    #[test]
    fn decided_snapshots_are_not_pending() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = StatePaths::new(temp.path());
        let first = snapshot(&paths, "a", "S-1");
        let second = snapshot(&paths, "b", "S-2");
        append_snapshot(&paths, &first).expect("append");
        append_snapshot(&paths, &second).expect("append");
        append_decision(
            &paths,
            &ResumeDecision {
                snapshot_id: first.snapshot_id.clone(),
                choice: ResumeChoice::Discard,
                session: None,
                decided_at: fixed_now(),
            },
        )
        .expect("decide");

        let pending = pending_snapshots(&paths).expect("pending");
        assert_eq!(pending, vec![second]);
        assert!(
            find_decision(&paths, &first.snapshot_id)
                .expect("find")
                .is_some()
        );
    }

    #[test]
    fn empty_archive_has_no_pending() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = StatePaths::new(temp.path());
        assert!(pending_snapshots(&paths).expect("pending").is_empty());
    }
}
