use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("deployment action timed out after {0:?}")]
    Timeout(Duration),
    #[error("deployment action rejected the stage: {detail}")]
    Rejected { detail: String },
    #[error("deployment action could not run: {detail}")]
    Unknown { detail: String },
}

/// Seam between the rollout controller and the capital-commit action.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn apply(&self, capital: Decimal, risk_level: u8) -> Result<(), ExecutorError>;
}

/// Applies one stage by invoking the configured external deployment command.
///
/// The command receives `--capital <amount> --risk-level <level>` appended
/// to its configured arguments. Exit 0 means the capital was committed;
/// any other exit reports stderr as the diagnostic. The call is bounded by
/// the configured timeout and the child is killed on expiry.
pub struct StageExecutor {
    command: Vec<String>,
    timeout: Duration,
}

impl StageExecutor {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl Executor for StageExecutor {
    async fn apply(&self, capital: Decimal, risk_level: u8) -> Result<(), ExecutorError> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            ExecutorError::Unknown {
                detail: "executor command is empty".to_string(),
            }
        })?;

        debug!(%program, %capital, risk_level, "invoking deployment action");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--capital")
            .arg(capital.to_string())
            .arg("--risk-level")
            .arg(risk_level.to_string())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => return Err(ExecutorError::Timeout(self.timeout)),
            Ok(Err(e)) => {
                return Err(ExecutorError::Unknown {
                    detail: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        };
        Err(ExecutorError::Rejected { detail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into(), "stage".into()]
    }

    #[tokio::test]
    async fn test_successful_action() {
        let executor = StageExecutor::new(sh("exit 0"), Duration::from_secs(5));
        assert!(executor.apply(dec!(5000), 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejection_carries_stderr() {
        let executor = StageExecutor::new(
            sh("echo allocation refused >&2; exit 3"),
            Duration::from_secs(5),
        );
        let err = executor.apply(dec!(5000), 1).await.unwrap_err();
        match err {
            ExecutorError::Rejected { detail } => assert_eq!(detail, "allocation refused"),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_action() {
        let executor = StageExecutor::new(sh("sleep 10"), Duration::from_millis(50));
        let err = executor.apply(dec!(5000), 1).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_empty_command_is_unknown() {
        let executor = StageExecutor::new(Vec::new(), Duration::from_secs(1));
        let err = executor.apply(dec!(5000), 1).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Unknown { .. }));
    }

    #[tokio::test]
    async fn test_receives_capital_argument() {
        // $1 = --capital, $2 = amount
        let executor = StageExecutor::new(
            sh(r#"[ "$1" = "--capital" ] && [ "$2" = "5000" ]"#),
            Duration::from_secs(5),
        );
        assert!(executor.apply(dec!(5000), 1).await.is_ok());
    }
}
