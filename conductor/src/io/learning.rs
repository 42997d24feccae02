//! Fire-and-forget delivery of learning records to the long-term memory store.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::core::types::LearningRecord;
use crate::io::config::LearningConfig;
use crate::io::paths::StatePaths;
use crate::io::process::run_command_with_timeout;
use crate::io::store::append_jsonl;

const SINK_OUTPUT_LIMIT_BYTES: usize = 16 * 1024;

pub trait LearningSink {
    fn store(&self, record: &LearningRecord) -> Result<()>;
}

/// Appends records to `learning/outbox.jsonl` for out-of-band pickup.
#[derive(Debug, Clone)]
pub struct SpoolSink {
    path: PathBuf,
}

impl SpoolSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LearningSink for SpoolSink {
    fn store(&self, record: &LearningRecord) -> Result<()> {
        append_jsonl(&self.path, record)
    }
}

/// Pipes each record as JSON to an external command.
#[derive(Debug, Clone)]
pub struct CommandSink {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
}

impl CommandSink {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            timeout,
        }
    }
}

impl LearningSink for CommandSink {
    fn store(&self, record: &LearningRecord) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("learning command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let payload = serde_json::to_vec(record)?;
        let output =
            run_command_with_timeout(cmd, Some(&payload), self.timeout, SINK_OUTPUT_LIMIT_BYTES)?;
        if output.timed_out {
            return Err(anyhow!(
                "learning command timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "learning command failed ({:?}): {}",
                output.status.code(),
                output.stderr_lossy()
            ));
        }
        Ok(())
    }
}

/// Sink chosen by configuration: a command if one is set, the spool otherwise.
pub fn sink_from_config(paths: &StatePaths, cfg: &LearningConfig) -> Box<dyn LearningSink> {
    if cfg.command.is_empty() {
        Box::new(SpoolSink::new(paths.outbox_path.clone()))
    } else {
        Box::new(CommandSink::new(
            cfg.command.clone(),
            paths.root.clone(),
            cfg.timeout(),
        ))
    }
}

/// Hand a record to the sink. Failures are logged and swallowed.
pub fn deliver(sink: &dyn LearningSink, record: &LearningRecord) -> bool {
    match sink.store(record) {
        Ok(()) => {
            debug!(kind = ?record.kind, "learning record delivered");
            true
        }
        Err(err) => {
            warn!(kind = ?record.kind, err = %format!("{err:#}"), "learning sink failed; record dropped");
            false
        }
    }
}
