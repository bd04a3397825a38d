use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One increment of capital exposure in the rollout schedule.
///
/// Immutable once the plan is built. `percentage` is the share of total
/// capital committed after this stage completes, in (0, 100].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub percentage: u8,
    /// Planned capital allocation at this stage.
    pub capital: Decimal,
    /// Risk level handed to the deployment action.
    pub risk_level: u8,
}

/// Outcome of a single stage attempt.
///
/// Created once per attempt, appended to the deployment ledger, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub succeeded: bool,
    pub health_ok: bool,
    pub timestamp: DateTime<Utc>,
    pub error_detail: Option<String>,
    pub run_id: Uuid,
}

/// Why a rollout run stopped before reaching 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The capital-commit action itself failed.
    ExecutorFailure,
    /// The post-stage health verdict was unhealthy.
    HealthCheckFailure,
    /// An external stop was requested between stages.
    Cancelled,
}

/// Final result of a rollout run.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutOutcome {
    pub aborted: bool,
    pub last_stage: Option<Stage>,
    pub reason: Option<AbortReason>,
}

impl RolloutOutcome {
    pub fn completed(last_stage: Option<Stage>) -> Self {
        Self {
            aborted: false,
            last_stage,
            reason: None,
        }
    }

    pub fn aborted_at(stage: Stage, reason: AbortReason) -> Self {
        Self {
            aborted: true,
            last_stage: Some(stage),
            reason: Some(reason),
        }
    }
}
