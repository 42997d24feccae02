//! Conductor configuration stored under `.conductor/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::agents::AgentRoster;
use crate::core::enforcement::Policy;
use crate::core::file_class::FileAllowlist;
use crate::core::ralph::IterationLimits;
use crate::core::ttl::{DEFAULT_TTL_HOURS, DEFAULT_WARNING_RATIO, TtlPolicy};

/// Conductor configuration (TOML).
///
/// Edited by humans; every field is optional and defaults to the built-in
/// policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConductorConfig {
    pub ralph: RalphConfig,
    pub agents: AgentRoster,
    pub files: FilesConfig,
    pub learning: LearningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RalphConfig {
    /// Idle hours after which a Ralph or Maestro record expires.
    pub ttl_hours: u32,
    /// Fraction of the TTL after which status reports a warning.
    pub warning_ratio: f64,
    pub limits: IterationLimits,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            ttl_hours: DEFAULT_TTL_HOURS,
            warning_ratio: DEFAULT_WARNING_RATIO,
            limits: IterationLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilesConfig {
    pub allow_extensions: Vec<String>,
    pub allow_file_names: Vec<String>,
    pub allow_dir_components: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        let FileAllowlist {
            extensions,
            file_names,
            dir_components,
        } = FileAllowlist::default();
        Self {
            allow_extensions: extensions,
            allow_file_names: file_names,
            allow_dir_components: dir_components,
        }
    }
}

impl FilesConfig {
    pub fn allowlist(&self) -> FileAllowlist {
        FileAllowlist {
            extensions: self
                .allow_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect(),
            file_names: self.allow_file_names.clone(),
            dir_components: self.allow_dir_components.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LearningConfig {
    /// Command that receives each learning record as JSON on stdin
    /// (e.g. `["memory-cli","store"]`). Empty spools to `learning/outbox.jsonl`.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10,
        }
    }
}

impl LearningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            ralph: RalphConfig::default(),
            agents: AgentRoster::default(),
            files: FilesConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ralph.ttl_hours == 0 {
            return Err(anyhow!("ralph.ttl_hours must be > 0"));
        }
        if !(self.ralph.warning_ratio > 0.0 && self.ralph.warning_ratio < 1.0) {
            return Err(anyhow!("ralph.warning_ratio must be between 0 and 1"));
        }
        let limits = &self.ralph.limits;
        if limits.small == 0 || limits.medium == 0 || limits.large == 0 {
            return Err(anyhow!("ralph.limits must all be > 0"));
        }
        if self.agents.fast_fix.trim().is_empty() {
            return Err(anyhow!("agents.fast_fix must be non-empty"));
        }
        if self.agents.debugger.trim().is_empty() {
            return Err(anyhow!("agents.debugger must be non-empty"));
        }
        if self.learning.timeout_secs == 0 {
            return Err(anyhow!("learning.timeout_secs must be > 0"));
        }
        if !self.learning.command.is_empty() && self.learning.command[0].trim().is_empty() {
            return Err(anyhow!("learning.command must start with a program name"));
        }
        Ok(())
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            ttl: chrono::Duration::hours(i64::from(self.ralph.ttl_hours)),
            warning_ratio: self.ralph.warning_ratio,
        }
    }
}

/// Resolved decision inputs, owned so a [`Policy`] can borrow from them.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub roster: AgentRoster,
    pub files: FileAllowlist,
    pub limits: IterationLimits,
}

impl ResolvedPolicy {
    pub fn from_config(cfg: &ConductorConfig) -> Self {
        Self {
            roster: cfg.agents.clone(),
            files: cfg.files.allowlist(),
            limits: cfg.ralph.limits,
        }
    }

    pub fn policy(&self) -> Policy<'_> {
        Policy {
            roster: &self.roster,
            files: &self.files,
            limits: &self.limits,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Load config for a decision path: any error falls back to defaults.
pub fn load_config_or_default(path: &Path) -> ConductorConfig {
    match load_config(path) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!(path = %path.display(), err = %format!("{err:#}"), "config unusable; using defaults");
            ConductorConfig::default()
        }
    }
}
