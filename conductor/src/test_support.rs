//! Test-only helpers: fixed clock, scratch workspaces, and a recording sink.

use std::cell::RefCell;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use crate::core::maestro::{MaestroState, Phase};
use crate::core::types::{LearningRecord, Timestamp};
use crate::io::config::ConductorConfig;
use crate::io::learning::LearningSink;
use crate::workspace::Workspace;

/// Deterministic "now" for TTL arithmetic.
pub fn fixed_now() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

/// Active Maestro record whose flags put it in `phase`.
pub fn maestro_in_phase(phase: Phase) -> MaestroState {
    let mut state = MaestroState::activate("s1", fixed_now());
    state.active = phase != Phase::Inactive;
    state.recon_complete = phase >= Phase::Interview;
    state.interview_complete = phase >= Phase::PlanApproval;
    state.plan_approved = phase >= Phase::Execution;
    state
}

/// Workspace rooted in a temporary directory that lives as long as this value.
pub struct TestWorkspace {
    _temp: TempDir,
    pub ws: Workspace,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_config(ConductorConfig::default())
    }

    pub fn with_config(config: ConductorConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::with_config(temp.path(), config);
        Self { _temp: temp, ws }
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Learning sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: RefCell<Vec<LearningRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<LearningRecord> {
        self.records.borrow().clone()
    }
}

impl LearningSink for RecordingSink {
    fn store(&self, record: &LearningRecord) -> Result<()> {
        self.records.borrow_mut().push(record.clone());
        Ok(())
    }
}
