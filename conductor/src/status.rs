//! Operator status view of one session.

use serde::Serialize;

use crate::controller::{self, RalphStatus};
use crate::core::enforcement::PlanApprovalMarker;
use crate::core::retry::{RetryLedger, Step};
use crate::core::types::{SessionKey, Timestamp};
use crate::feedback::list_retries;
use crate::io::paths::partition_name;
use crate::orchestrator::{self, MaestroStatus};
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    #[serde(flatten)]
    pub ledger: RetryLedger,
    pub next_step: Step,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session: Option<String>,
    pub partition: String,
    pub ralph: RalphStatus,
    pub maestro: MaestroStatus,
    pub plan_marker: Option<PlanApprovalMarker>,
    pub retries: Vec<RetrySummary>,
}

pub fn session_summary(ws: &Workspace, session: &SessionKey, now: Timestamp) -> SessionSummary {
    let retries = list_retries(ws, session, None)
        .into_iter()
        .map(|ledger| RetrySummary {
            next_step: ledger.next_step(&ws.config.agents),
            ledger,
        })
        .collect();
    SessionSummary {
        session: session.as_id().map(str::to_string),
        partition: partition_name(session),
        ralph: controller::status(ws, session, now),
        maestro: orchestrator::status(ws, session, now),
        plan_marker: ws.store().load_plan_marker(session),
        retries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::maestro::Phase;
    use crate::core::types::TaskSize;
    use crate::test_support::{TestWorkspace, fixed_now};

    #[test]
    fn summary_reflects_live_state() {
        let tw = TestWorkspace::new();
        let now = fixed_now();
        let session = SessionKey::Id("s1".to_string());
        controller::activate(&tw.ws, &session, "S-1", TaskSize::Medium, now).expect("activate");
        orchestrator::utter(&tw.ws, &session, "/maestro", now).expect("utter");

        let summary = session_summary(&tw.ws, &session, now);
        assert_eq!(summary.partition, "id-s1");
        assert!(matches!(summary.ralph, RalphStatus::Active { limit: 30, .. }));
        assert_eq!(summary.maestro.phase, Phase::Recon);
        assert!(summary.retries.is_empty());

        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["ralph"]["status"], "active");
        assert_eq!(json["ralph"]["liveness"], "fresh");
        assert_eq!(json["maestro"]["phase"], "recon");
    }
}
