//! What a sync pass reports back to its caller.

use serde::{Deserialize, Serialize};

use crate::ids::PassId;

/// The four synchronized entities, in the order a pass must visit them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Accounts,
    Products,
    Orders,
    LoyaltyEvents,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Products => "products",
            Self::Orders => "orders",
            Self::LoyaltyEvents => "loyalty_events",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Startup,
    Timer,
    Manual,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Timer => write!(f, "timer"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Row counts for one synchronizer within a pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub entity: EntityKind,
    pub selected: usize,
    pub synced: usize,
    pub skipped: usize,
}

impl StageReport {
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            selected: 0,
            synced: 0,
            skipped: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub pass_id: PassId,
    pub trigger: Trigger,
    pub started_at: String,
    pub duration_ms: u64,
    pub stages: Vec<StageReport>,
}

impl PassReport {
    pub fn stage(&self, entity: EntityKind) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.entity == entity)
    }

    pub fn total_synced(&self) -> usize {
        self.stages.iter().map(|s| s.synced).sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LocalDisconnected,
    GlobalDisconnected,
    AlreadyRunning,
}

/// Terminal state of a pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PassOutcome {
    Completed(PassReport),
    Aborted {
        #[serde(flatten)]
        report: PassReport,
        stage: EntityKind,
        error: String,
        /// True when the abort demoted an endpoint to `Disconnected`.
        connectivity: bool,
    },
    Skipped { reason: SkipReason },
}

impl PassOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn report(&self) -> Option<&PassReport> {
        match self {
            Self::Completed(report) | Self::Aborted { report, .. } => Some(report),
            Self::Skipped { .. } => None,
        }
    }
}

/// Connectivity snapshot served to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStatus {
    pub local_connected: bool,
    pub global_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> PassReport {
        PassReport {
            pass_id: PassId::from_raw("pass_1"),
            trigger: Trigger::Manual,
            started_at: "2026-10-19T10:00:00Z".into(),
            duration_ms: 12,
            stages: vec![
                StageReport { entity: EntityKind::Accounts, selected: 2, synced: 2, skipped: 0 },
                StageReport { entity: EntityKind::Products, selected: 3, synced: 1, skipped: 2 },
            ],
        }
    }

    #[test]
    fn totals_and_lookup() {
        let r = report();
        assert_eq!(r.total_synced(), 3);
        assert_eq!(r.stage(EntityKind::Products).unwrap().skipped, 2);
        assert!(r.stage(EntityKind::Orders).is_none());
    }

    #[test]
    fn outcome_is_tagged_by_status() {
        let json = serde_json::to_value(PassOutcome::Skipped {
            reason: SkipReason::GlobalDisconnected,
        })
        .unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "global_disconnected");

        let json = serde_json::to_value(PassOutcome::Aborted {
            report: report(),
            stage: EntityKind::Products,
            error: "connection lost".into(),
            connectivity: true,
        })
        .unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["passId"], "pass_1");
        assert_eq!(json["stage"], "products");
        assert_eq!(json["connectivity"], true);
    }

    #[test]
    fn db_status_uses_camel_case() {
        let json = serde_json::to_value(DbStatus {
            local_connected: true,
            global_connected: false,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"localConnected": true, "globalConnected": false}));
    }
}
