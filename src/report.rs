use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::ledger::DeploymentLedger;
use crate::models::stage::StageResult;

/// Rollout summary derived from the deployment ledger.
#[derive(Debug, Serialize)]
pub struct RolloutReport {
    pub generated_at: DateTime<Utc>,
    pub attempts: usize,
    pub successes: usize,
    pub executor_failures: usize,
    pub health_failures: usize,
    /// Highest percentage that completed with a healthy gate.
    pub committed_percentage: u8,
    pub last_result: Option<StageResult>,
}

pub async fn build_report(ledger: &DeploymentLedger) -> Result<RolloutReport> {
    let entries = ledger.load_all().await?;

    let successes = entries
        .iter()
        .filter(|r| r.succeeded && r.health_ok)
        .count();
    let executor_failures = entries.iter().filter(|r| !r.succeeded).count();
    let health_failures = entries
        .iter()
        .filter(|r| r.succeeded && !r.health_ok)
        .count();
    let committed_percentage = entries
        .iter()
        .filter(|r| r.succeeded && r.health_ok)
        .map(|r| r.stage.percentage)
        .max()
        .unwrap_or(0);

    Ok(RolloutReport {
        generated_at: Utc::now(),
        attempts: entries.len(),
        successes,
        executor_failures,
        health_failures,
        committed_percentage,
        last_result: entries.into_iter().last(),
    })
}

/// Write the report as pretty JSON, creating parent directories.
pub fn write_report(report: &RolloutReport, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating report directory {}", dir.display()))?;
        }
    }
    let body = serde_json::to_string_pretty(report).context("serializing rollout report")?;
    std::fs::write(path, body)
        .with_context(|| format!("writing rollout report to {}", path.display()))?;
    info!(path = %path.display(), "rollout report written");
    Ok(())
}
