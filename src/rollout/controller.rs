use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::health::probe::Probe;
use crate::ledger::DeploymentLedger;
use crate::models::alert::AlertEvent;
use crate::models::stage::{AbortReason, RolloutOutcome, StageResult};
use crate::rollout::executor::Executor;
use crate::rollout::plan::{stage_capital, RolloutPlan};
use crate::telemetry::alerts::AlertDispatcher;

const ALERT_SOURCE: &str = "rollout";

/// Drives a staged rollout: apply a stage, gate on health, soak, escalate.
///
/// Stages run strictly in order and a failed stage is terminal for the
/// run. The controller only stops further escalation; capital already
/// committed stays committed, and rollback is an explicit operator action.
pub struct RolloutController<E, P> {
    executor: E,
    probe: P,
    alerts: Arc<AlertDispatcher>,
    ledger: Arc<DeploymentLedger>,
    /// Soak time per percentage point after a healthy stage.
    base_wait: Duration,
    /// When false, a failed health gate warns and the rollout continues.
    gate_fatal: bool,
    /// Set externally to stop the run before the next stage starts.
    cancelled: Arc<AtomicBool>,
}

impl<E: Executor, P: Probe> RolloutController<E, P> {
    pub fn new(
        executor: E,
        probe: P,
        alerts: Arc<AlertDispatcher>,
        ledger: Arc<DeploymentLedger>,
        base_wait: Duration,
    ) -> Self {
        Self {
            executor,
            probe,
            alerts,
            ledger,
            base_wait,
            gate_fatal: true,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_gate_fatal(mut self, gate_fatal: bool) -> Self {
        self.gate_fatal = gate_fatal;
        self
    }

    /// Handle for requesting a stop between stages. A stage already
    /// running completes (or times out) before the flag is honored.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Run the plan to completion or first failure.
    ///
    /// Executor and health-gate failures are recorded, alerted, and
    /// returned as an aborted outcome; an `Err` is only raised when the
    /// ledger itself cannot be written.
    pub async fn run(&self, plan: &RolloutPlan) -> Result<RolloutOutcome> {
        let run_id = Uuid::new_v4();
        let total_capital = plan.total_capital();
        info!(
            %run_id,
            stages = plan.stages().len(),
            %total_capital,
            "starting staged rollout"
        );

        for (i, stage) in plan.stages().iter().enumerate() {
            if self.cancelled.load(Ordering::Relaxed) {
                warn!(
                    percentage = stage.percentage,
                    "stop requested, halting before next stage"
                );
                return Ok(RolloutOutcome::aborted_at(
                    stage.clone(),
                    AbortReason::Cancelled,
                ));
            }

            let effective = stage_capital(total_capital, stage.percentage);
            info!(
                percentage = stage.percentage,
                capital = %effective,
                risk_level = stage.risk_level,
                "applying stage"
            );

            if let Err(e) = self.executor.apply(effective, stage.risk_level).await {
                error!(percentage = stage.percentage, "stage failed: {e}");
                self.ledger
                    .append(&StageResult {
                        stage: stage.clone(),
                        succeeded: false,
                        health_ok: false,
                        timestamp: Utc::now(),
                        error_detail: Some(e.to_string()),
                        run_id,
                    })
                    .await?;
                self.alerts
                    .dispatch(AlertEvent::critical(
                        ALERT_SOURCE,
                        format!("stage {}% failed: {e}", stage.percentage),
                    ))
                    .await;
                return Ok(RolloutOutcome::aborted_at(
                    stage.clone(),
                    AbortReason::ExecutorFailure,
                ));
            }

            let verdict = self.probe.check().await;
            self.ledger
                .append(&StageResult {
                    stage: stage.clone(),
                    succeeded: true,
                    health_ok: verdict.healthy,
                    timestamp: Utc::now(),
                    error_detail: (!verdict.healthy)
                        .then(|| "post-stage health gate failed".to_string()),
                    run_id,
                })
                .await?;

            if !verdict.healthy {
                if self.gate_fatal {
                    error!(
                        percentage = stage.percentage,
                        "health gate failed, aborting rollout"
                    );
                    self.alerts
                        .dispatch(AlertEvent::critical(
                            ALERT_SOURCE,
                            format!("health gate failed after stage {}%", stage.percentage),
                        ))
                        .await;
                    return Ok(RolloutOutcome::aborted_at(
                        stage.clone(),
                        AbortReason::HealthCheckFailure,
                    ));
                }
                warn!(
                    percentage = stage.percentage,
                    "health gate failed, continuing (gate configured non-fatal)"
                );
                self.alerts
                    .dispatch(AlertEvent::warning(
                        ALERT_SOURCE,
                        format!("health gate failed after stage {}%", stage.percentage),
                    ))
                    .await;
            }

            // Soak proportional to the stage size; small stages validate
            // quickly, larger stages get longer under observation.
            if i + 1 < plan.stages().len() {
                let soak = self.base_wait * u32::from(stage.percentage);
                info!(
                    percentage = stage.percentage,
                    soak_secs = soak.as_secs(),
                    "stage healthy, soaking before escalation"
                );
                tokio::time::sleep(soak).await;
            }
        }

        info!(%run_id, "rollout completed at 100%");
        Ok(RolloutOutcome::completed(plan.stages().last().cloned()))
    }
}
