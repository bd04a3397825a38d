use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{error, info};

use crate::config::OptimizationConfig;

#[derive(Debug)]
pub struct OptimizationOutcome {
    pub passed: bool,
    /// Where the step was told to write the tuned configuration.
    pub artifact: PathBuf,
    pub detail: Option<String>,
}

/// Drive the external parameter-optimization step.
///
/// The step is a black box: it receives the run parameters as a JSON
/// document on its command line, writes the tuned configuration artifact
/// itself, and reports pass/fail through its exit code. A spawn failure or
/// timeout is an error; a clean non-zero exit is a failed outcome.
pub async fn run_optimization(config: &OptimizationConfig) -> Result<OptimizationOutcome> {
    let (program, args) = config
        .command
        .split_first()
        .context("optimization command is empty")?;

    let params = serde_json::json!({
        "iterations": config.iterations,
        "risk_level": config.risk_level,
        "param_ranges": config.param_ranges,
        "artifact": config.artifact_path,
    });

    info!(
        %program,
        iterations = config.iterations,
        risk_level = config.risk_level,
        "starting optimization step"
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .arg("--params")
        .arg(params.to_string())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(
        Duration::from_secs(config.timeout_secs),
        cmd.output(),
    )
    .await
    {
        Err(_) => bail!(
            "optimization step timed out after {}s",
            config.timeout_secs
        ),
        Ok(result) => result.context("failed to spawn optimization step")?,
    };

    let artifact = PathBuf::from(&config.artifact_path);
    if output.status.success() {
        info!(artifact = %artifact.display(), "optimization step passed");
        return Ok(OptimizationOutcome {
            passed: true,
            artifact,
            detail: None,
        });
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let detail = if stderr.is_empty() {
        output.status.to_string()
    } else {
        stderr
    };
    error!("optimization step failed: {detail}");
    Ok(OptimizationOutcome {
        passed: false,
        artifact,
        detail: Some(detail),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(command: &[&str], timeout_secs: u64) -> OptimizationConfig {
        OptimizationConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout_secs,
            ..OptimizationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_passing_step() {
        let config = config_with(&["sh", "-c", "exit 0", "opt"], 10);
        let outcome = run_optimization(&config).await.unwrap();
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn test_failing_step_carries_stderr() {
        let config = config_with(&["sh", "-c", "echo no convergence >&2; exit 1", "opt"], 10);
        let outcome = run_optimization(&config).await.unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.detail.as_deref(), Some("no convergence"));
    }

    #[tokio::test]
    async fn test_step_receives_params_json() {
        // $1 = --params, $2 = the JSON document.
        let config = config_with(
            &["sh", "-c", r#"echo "$2" | grep -q '"iterations":100'"#, "opt"],
            10,
        );
        let outcome = run_optimization(&config).await.unwrap();
        assert!(outcome.passed);
    }
}
