//! Canonical on-disk layout under `.conductor/`.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::types::SessionKey;

const LEGACY_PARTITION: &str = "legacy";
const MAX_SAFE_ID_LEN: usize = 64;
const SHORT_HASH_LEN: usize = 16;

/// Per-session record kinds, one JSON file each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Ralph,
    Maestro,
    PlanApproval,
    Denials,
}

impl RecordKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Ralph => "ralph.json",
            Self::Maestro => "maestro.json",
            Self::PlanApproval => "plan_approval.json",
            Self::Denials => "denials.json",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ralph => "ralph",
            Self::Maestro => "maestro",
            Self::PlanApproval => "plan_approval",
            Self::Denials => "denials",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatePaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub config_path: PathBuf,
    pub sessions_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub snapshots_path: PathBuf,
    pub resume_decisions_path: PathBuf,
    pub audit_dir: PathBuf,
    pub audit_log_path: PathBuf,
    pub learning_dir: PathBuf,
    pub outbox_path: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        let archive_dir = conductor_dir.join("archive");
        let audit_dir = conductor_dir.join("audit");
        let learning_dir = conductor_dir.join("learning");
        Self {
            root: root.clone(),
            conductor_dir: conductor_dir.clone(),
            config_path: conductor_dir.join("config.toml"),
            sessions_dir: conductor_dir.join("sessions"),
            snapshots_path: archive_dir.join("crash_snapshots.jsonl"),
            resume_decisions_path: archive_dir.join("resume_decisions.jsonl"),
            archive_dir,
            audit_log_path: audit_dir.join("decisions.jsonl"),
            audit_dir,
            outbox_path: learning_dir.join("outbox.jsonl"),
            learning_dir,
        }
    }

    pub fn session_dir(&self, session: &SessionKey) -> PathBuf {
        self.sessions_dir.join(partition_name(session))
    }

    pub fn record_path(&self, session: &SessionKey, kind: RecordKind) -> PathBuf {
        self.session_dir(session).join(kind.file_name())
    }

    pub fn retry_dir(&self, session: &SessionKey) -> PathBuf {
        self.session_dir(session).join("retry")
    }

    pub fn retry_path(&self, session: &SessionKey, task_id: &str, agent_type: &str) -> PathBuf {
        self.retry_dir(session)
            .join(format!("{}.json", ledger_key(task_id, agent_type)))
    }

    /// Working context reported in crash snapshots.
    pub fn working_dir(&self) -> &Path {
        &self.root
    }
}

/// Directory name for a session partition.
///
/// Safe identifiers are kept readable; anything else is hashed so that no
/// identifier can escape the sessions directory or collide with another.
pub fn partition_name(session: &SessionKey) -> String {
    match session {
        SessionKey::Legacy => LEGACY_PARTITION.to_string(),
        SessionKey::Id(id) if is_safe_id(id) => format!("id-{id}"),
        SessionKey::Id(id) => format!("sha-{}", short_hash(id.as_bytes())),
    }
}

/// File stem for the retry ledger of a (task, agent) pair.
pub fn ledger_key(task_id: &str, agent_type: &str) -> String {
    let mut input = Vec::with_capacity(task_id.len() + agent_type.len() + 1);
    input.extend_from_slice(task_id.as_bytes());
    input.push(0);
    input.extend_from_slice(agent_type.as_bytes());
    short_hash(&input)
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SAFE_ID_LEN
        && !id.starts_with('.')
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

pub(crate) fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut encoded = hex::encode(digest);
    encoded.truncate(SHORT_HASH_LEN);
    encoded
}
