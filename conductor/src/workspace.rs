//! A project directory governed by conductor: its state layout plus config.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::maestro::MaestroState;
use crate::core::ralph::RalphState;
use crate::core::ttl::{Liveness, TtlPolicy};
use crate::core::types::{SessionKey, Timestamp};
use crate::io::config::{ConductorConfig, ResolvedPolicy, load_config, load_config_or_default};
use crate::io::paths::StatePaths;
use crate::io::store::RecordStore;

#[derive(Debug, Clone)]
pub struct Workspace {
    pub paths: StatePaths,
    pub config: ConductorConfig,
}

impl Workspace {
    /// Open `root`, failing on an invalid config file.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let paths = StatePaths::new(root);
        let config = load_config(&paths.config_path)?;
        Ok(Self { paths, config })
    }

    /// Open `root` for a decision path: an unusable config falls back to defaults.
    pub fn open_lenient(root: impl Into<PathBuf>) -> Self {
        let paths = StatePaths::new(root);
        let config = load_config_or_default(&paths.config_path);
        Self { paths, config }
    }

    pub fn with_config(root: impl Into<PathBuf>, config: ConductorConfig) -> Self {
        Self {
            paths: StatePaths::new(root),
            config,
        }
    }

    pub fn store(&self) -> RecordStore<'_> {
        RecordStore::new(&self.paths)
    }

    pub fn ttl(&self) -> TtlPolicy {
        self.config.ttl_policy()
    }

    pub fn policy(&self) -> ResolvedPolicy {
        ResolvedPolicy::from_config(&self.config)
    }

    /// Ralph record that has not outlived its TTL.
    pub fn live_ralph(&self, session: &SessionKey, now: Timestamp) -> Option<RalphState> {
        let state = self.store().load_ralph(session)?;
        self.check_liveness("ralph", session, state.last_activity, now)
            .then_some(state)
    }

    /// Maestro record that has not outlived its TTL.
    pub fn live_maestro(&self, session: &SessionKey, now: Timestamp) -> Option<MaestroState> {
        let state = self.store().load_maestro(session)?;
        self.check_liveness("maestro", session, state.last_activity, now)
            .then_some(state)
    }

    fn check_liveness(
        &self,
        workflow: &str,
        session: &SessionKey,
        last_activity: Timestamp,
        now: Timestamp,
    ) -> bool {
        match self.ttl().evaluate(last_activity, now) {
            Liveness::Fresh => true,
            Liveness::Warning { remaining_secs } => {
                warn!(workflow, session = %session, remaining_secs, "workflow nearing TTL expiry");
                true
            }
            Liveness::Expired { elapsed_secs } => {
                debug!(workflow, session = %session, elapsed_secs, "workflow expired; treating as inactive");
                false
            }
        }
    }
}
