//! Explicit removal of expired workflow records across all sessions.
//!
//! Reads already treat expired records as absent; sweeping only reclaims the
//! files.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::core::maestro::MaestroState;
use crate::core::ralph::RalphState;
use crate::core::ttl::Liveness;
use crate::core::types::Timestamp;
use crate::io::paths::RecordKind;
use crate::io::store::{read_record_at, remove_if_exists};
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweptRecord {
    pub partition: String,
    pub workflow: String,
    pub idle_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub scanned: usize,
    pub removed: Vec<SweptRecord>,
}

pub fn sweep(ws: &Workspace, now: Timestamp, dry_run: bool) -> Result<SweepReport> {
    let store = ws.store();
    let ttl = ws.ttl();
    let partitions = store.list_partitions();
    let mut removed = Vec::new();

    for partition in &partitions {
        let ralph_path = store.partition_record_path(partition, RecordKind::Ralph);
        let ralph_activity = read_record_at::<RalphState>(&ralph_path, RecordKind::Ralph)
            .map(|state| state.last_activity);
        let maestro_path = store.partition_record_path(partition, RecordKind::Maestro);
        let maestro_activity = read_record_at::<MaestroState>(&maestro_path, RecordKind::Maestro)
            .map(|state| state.last_activity);

        for (kind, path, last_activity) in [
            (RecordKind::Ralph, ralph_path, ralph_activity),
            (RecordKind::Maestro, maestro_path, maestro_activity),
        ] {
            let Some(last_activity) = last_activity else {
                continue;
            };
            let Liveness::Expired { elapsed_secs } = ttl.evaluate(last_activity, now) else {
                continue;
            };
            if !dry_run {
                remove_if_exists(&path)?;
            }
            info!(
                partition = %partition,
                workflow = kind.label(),
                idle_secs = elapsed_secs,
                dry_run,
                "swept expired workflow record"
            );
            removed.push(SweptRecord {
                partition: partition.clone(),
                workflow: kind.label().to_string(),
                idle_secs: elapsed_secs,
            });
        }
    }

    Ok(SweepReport {
        dry_run,
        scanned: partitions.len(),
        removed,
    })
}
