//! Per-session record store under `.conductor/sessions/`.
//!
//! Reads fail open: a missing, unreadable, malformed or schema-violating
//! record is reported as absent with a warning, never as an error. Writes
//! are atomic for readers (temp file + rename).

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use jsonschema::{Validator, validator_for};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::enforcement::PlanApprovalMarker;
use crate::core::maestro::MaestroState;
use crate::core::ralph::RalphState;
use crate::core::retry::RetryLedger;
use crate::core::types::SessionKey;
use crate::io::paths::{RecordKind, StatePaths};

static RALPH_SCHEMA: LazyLock<Option<Validator>> = LazyLock::new(|| {
    compile_schema(
        "ralph",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/schemas/ralph.schema.json"
        )),
    )
});

static MAESTRO_SCHEMA: LazyLock<Option<Validator>> = LazyLock::new(|| {
    compile_schema(
        "maestro",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/schemas/maestro.schema.json"
        )),
    )
});

static PLAN_APPROVAL_SCHEMA: LazyLock<Option<Validator>> = LazyLock::new(|| {
    compile_schema(
        "plan_approval",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/schemas/plan_approval.schema.json"
        )),
    )
});

fn compile_schema(name: &str, raw: &str) -> Option<Validator> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(schema = name, err = %err, "embedded schema is not valid JSON");
            return None;
        }
    };
    match validator_for(&value) {
        Ok(validator) => Some(validator),
        Err(err) => {
            warn!(schema = name, err = %err, "embedded schema failed to compile");
            None
        }
    }
}

fn schema_for(kind: RecordKind) -> Option<&'static Validator> {
    match kind {
        RecordKind::Ralph => RALPH_SCHEMA.as_ref(),
        RecordKind::Maestro => MAESTRO_SCHEMA.as_ref(),
        RecordKind::PlanApproval => PLAN_APPROVAL_SCHEMA.as_ref(),
        RecordKind::Denials => None,
    }
}

/// Typed access to per-session records.
#[derive(Debug, Clone, Copy)]
pub struct RecordStore<'a> {
    paths: &'a StatePaths,
}

impl<'a> RecordStore<'a> {
    pub fn new(paths: &'a StatePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &'a StatePaths {
        self.paths
    }

    /// Read a record; any failure is reported as absence.
    pub fn read<T: DeserializeOwned>(&self, session: &SessionKey, kind: RecordKind) -> Option<T> {
        read_record_at(&self.paths.record_path(session, kind), kind)
    }

    pub fn write<T: Serialize>(&self, session: &SessionKey, kind: RecordKind, value: &T) -> Result<()> {
        let path = self.paths.record_path(session, kind);
        debug!(session = %session, record = kind.label(), path = %path.display(), "writing record");
        write_json_atomic(&path, value)
    }

    /// Remove a record. Returns whether one existed.
    pub fn clear(&self, session: &SessionKey, kind: RecordKind) -> Result<bool> {
        let path = self.paths.record_path(session, kind);
        debug!(session = %session, record = kind.label(), "clearing record");
        remove_if_exists(&path)
    }

    /// Live-or-expired Ralph record. An `active = false` record counts as absent.
    pub fn load_ralph(&self, session: &SessionKey) -> Option<RalphState> {
        self.read::<RalphState>(session, RecordKind::Ralph)
            .filter(|state| state.active)
    }

    pub fn load_maestro(&self, session: &SessionKey) -> Option<MaestroState> {
        self.read::<MaestroState>(session, RecordKind::Maestro)
            .filter(|state| state.active)
    }

    pub fn load_plan_marker(&self, session: &SessionKey) -> Option<PlanApprovalMarker> {
        self.read(session, RecordKind::PlanApproval)
    }

    pub fn write_ledger(&self, session: &SessionKey, ledger: &RetryLedger) -> Result<()> {
        let path = self
            .paths
            .retry_path(session, &ledger.task_id, &ledger.agent_type);
        debug!(
            session = %session,
            task_id = %ledger.task_id,
            agent_type = %ledger.agent_type,
            attempt = ledger.attempt,
            "writing retry ledger"
        );
        write_json_atomic(&path, ledger)
    }

    pub fn clear_ledger(&self, session: &SessionKey, ledger: &RetryLedger) -> Result<bool> {
        remove_if_exists(
            &self
                .paths
                .retry_path(session, &ledger.task_id, &ledger.agent_type),
        )
    }

    /// Drop every retry ledger and the denial log of a session. Returns the
    /// number of ledgers removed.
    pub fn clear_workflow_history(&self, session: &SessionKey) -> Result<usize> {
        let mut cleared = 0;
        for path in json_files_in(&self.paths.retry_dir(session)) {
            if remove_if_exists(&path)? {
                cleared += 1;
            }
        }
        self.clear(session, RecordKind::Denials)?;
        debug!(session = %session, ledgers = cleared, "workflow history cleared");
        Ok(cleared)
    }

    /// All readable retry ledgers of a session, ordered by task then agent.
    pub fn list_ledgers(&self, session: &SessionKey) -> Vec<RetryLedger> {
        let dir = self.paths.retry_dir(session);
        let mut ledgers: Vec<RetryLedger> = json_files_in(&dir)
            .iter()
            .filter_map(|path| read_json_at(path, None))
            .collect();
        ledgers.sort_by(|a, b| {
            (a.task_id.as_str(), a.agent_type.as_str()).cmp(&(b.task_id.as_str(), b.agent_type.as_str()))
        });
        ledgers
    }

    /// Partition directory names under `sessions/`, sorted.
    pub fn list_partitions(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.paths.sessions_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(
                    path = %self.paths.sessions_dir.display(),
                    err = %err,
                    "failed to list session partitions"
                );
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// Path of a record inside a partition named by [`Self::list_partitions`].
    pub fn partition_record_path(&self, partition: &str, kind: RecordKind) -> PathBuf {
        self.paths.sessions_dir.join(partition).join(kind.file_name())
    }
}

/// Read a record at an explicit path, validating it against the kind's schema.
pub fn read_record_at<T: DeserializeOwned>(path: &Path, kind: RecordKind) -> Option<T> {
    read_json_at(path, Some(kind))
}

fn read_json_at<T: DeserializeOwned>(path: &Path, kind: Option<RecordKind>) -> Option<T> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "state read failed; treating as absent");
            return None;
        }
    };
    let value: Value = match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "state is not valid JSON; treating as absent");
            return None;
        }
    };
    if let Some(validator) = kind.and_then(schema_for)
        && !validator.is_valid(&value)
    {
        let messages = validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        warn!(
            path = %path.display(),
            errors = %messages.join("; "),
            "state violates schema; treating as absent"
        );
        return None;
    }
    match serde_json::from_value(value) {
        Ok(record) => {
            debug!(path = %path.display(), "state loaded");
            Some(record)
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "state has unexpected shape; treating as absent");
            None
        }
    }
}

/// Atomically write pretty JSON with a trailing newline.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write via a temp file in the same directory, then rename over the target.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("state path missing file name {}", path.display()))?;
    let tmp_path = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Append one JSON value as a line. Each line is written with a single call.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("log path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut line = serde_json::to_string(value)
        .with_context(|| format!("serialize line for {}", path.display()))?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    Ok(())
}

/// Read every parseable line of a JSONL log; malformed lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(
                path = %path.display(),
                line = index + 1,
                err = %err,
                "skipping malformed log line"
            ),
        }
    }
    Ok(records)
}

pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

fn json_files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    paths
}
