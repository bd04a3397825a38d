use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::stage::StageResult;

/// Append-only record of every stage attempt, one JSON document per line.
///
/// The file is the sole source of truth for what happened: entries are
/// appended under a lock, synced to disk, and never rewritten, so a
/// restarted controller can read the last record and decide where a new
/// run should pick up.
pub struct DeploymentLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DeploymentLedger {
    /// Open a ledger at the given path, creating parent directories.
    /// The file itself is created on first append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating ledger directory {}", dir.display()))?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Append one stage result. Appends are serialized; concurrent writers
    /// cannot interleave lines.
    pub async fn append(&self, result: &StageResult) -> Result<()> {
        let line = serde_json::to_string(result).context("serializing stage result")?;

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening ledger {}", self.path.display()))?;
        writeln!(file, "{line}").context("appending to ledger")?;
        file.sync_all().context("syncing ledger to disk")?;

        debug!(
            percentage = result.stage.percentage,
            succeeded = result.succeeded,
            health_ok = result.health_ok,
            "ledger entry appended"
        );
        Ok(())
    }

    /// All recorded results, oldest first.
    pub async fn load_all(&self) -> Result<Vec<StageResult>> {
        let _guard = self.write_lock.lock().await;
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)
            .with_context(|| format!("opening ledger {}", self.path.display()))?;
        let mut results = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("reading ledger")?;
            if line.trim().is_empty() {
                continue;
            }
            let result: StageResult = serde_json::from_str(&line)
                .with_context(|| format!("ledger line {} is corrupt", n + 1))?;
            results.push(result);
        }
        Ok(results)
    }

    /// The most recent recorded result, if any.
    pub async fn load_latest(&self) -> Result<Option<StageResult>> {
        Ok(self.load_all().await?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stage::Stage;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn result_for(percentage: u8, succeeded: bool, run_id: Uuid) -> StageResult {
        StageResult {
            stage: Stage {
                percentage,
                capital: dec!(1000) * rust_decimal::Decimal::from(u32::from(percentage))
                    / dec!(100),
                risk_level: 1,
            },
            succeeded,
            health_ok: succeeded,
            timestamp: Utc::now(),
            error_detail: (!succeeded).then(|| "executor rejected stage".to_string()),
            run_id,
        }
    }

    #[tokio::test]
    async fn test_append_then_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DeploymentLedger::open(dir.path().join("deployments.jsonl")).unwrap();
        let run_id = Uuid::new_v4();

        let written = result_for(25, false, run_id);
        ledger.append(&written).await.unwrap();

        let latest = ledger.load_latest().await.unwrap().unwrap();
        assert_eq!(latest, written);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.jsonl");
        let run_id = Uuid::new_v4();

        let written = result_for(25, false, run_id);
        {
            let ledger = DeploymentLedger::open(&path).unwrap();
            ledger.append(&result_for(5, true, run_id)).await.unwrap();
            ledger.append(&written).await.unwrap();
        }

        // A fresh instance on the same path sees the same records.
        let reopened = DeploymentLedger::open(&path).unwrap();
        let latest = reopened.load_latest().await.unwrap().unwrap();
        assert_eq!(latest, written);
        assert_eq!(reopened.load_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_appends_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DeploymentLedger::open(dir.path().join("deployments.jsonl")).unwrap();
        let run_id = Uuid::new_v4();

        for pct in [5u8, 25, 50, 100] {
            ledger.append(&result_for(pct, true, run_id)).await.unwrap();
        }

        let all = ledger.load_all().await.unwrap();
        let percentages: Vec<u8> = all.iter().map(|r| r.stage.percentage).collect();
        assert_eq!(percentages, vec![5, 25, 50, 100]);
    }

    #[tokio::test]
    async fn test_empty_ledger_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DeploymentLedger::open(dir.path().join("deployments.jsonl")).unwrap();
        assert!(ledger.load_latest().await.unwrap().is_none());
    }
}
