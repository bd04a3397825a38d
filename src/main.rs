use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn};

use capramp::audit;
use capramp::config::Config;
use capramp::health::probe::HealthProbe;
use capramp::ledger::DeploymentLedger;
use capramp::optimize;
use capramp::report;
use capramp::rollout::controller::RolloutController;
use capramp::rollout::executor::StageExecutor;
use capramp::rollout::plan::RolloutPlan;
use capramp::telemetry::alerts::AlertDispatcher;

#[derive(Parser)]
#[command(
    name = "capramp",
    version,
    about = "Staged capital rollout for trading strategy deployments"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, default_value = "config/capramp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create working directories and bring up the metrics stack.
    Setup,
    /// Run the configuration security audit.
    Audit {
        /// Where to write the JSON report.
        #[arg(long, default_value = "reports/security_audit.json")]
        output: PathBuf,
    },
    /// Run the external parameter-optimization step.
    Optimize,
    /// Run the staged rollout.
    Rollout {
        /// Total capital to commit across all stages.
        #[arg(long)]
        capital: Decimal,
    },
    /// Summarize the deployment ledger.
    Report {
        /// Optional path for a JSON copy of the report.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    config.validate()?;

    match cli.command {
        Cmd::Setup => run_setup(&config).await,
        Cmd::Audit { output } => run_audit(&config, &cli.config, &output),
        Cmd::Optimize => run_optimize(&config).await,
        Cmd::Rollout { capital } => run_rollout(&config, capital).await,
        Cmd::Report { output } => run_report(&config, output.as_deref()).await,
    }
}

async fn run_setup(config: &Config) -> Result<()> {
    for dir in &config.setup.directories {
        std::fs::create_dir_all(dir).with_context(|| format!("creating directory {dir}"))?;
        info!(%dir, "directory ready");
    }
    if let Some(parent) = std::path::Path::new(&config.ledger.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let Some((program, args)) = config.setup.stack_command.split_first() else {
        info!("no stack command configured, setup done");
        return Ok(());
    };

    info!(%program, "bringing up metrics stack");
    let status = tokio::time::timeout(
        Duration::from_secs(config.setup.timeout_secs),
        tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .status(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("stack bring-up timed out after {}s", config.setup.timeout_secs))?
    .context("failed to run stack command")?;

    if !status.success() {
        bail!("stack bring-up failed with {status}");
    }
    info!("setup complete");
    Ok(())
}

fn run_audit(config: &Config, config_path: &std::path::Path, output: &std::path::Path) -> Result<()> {
    let report = audit::run_audit(config, Some(config_path));
    audit::write_report(&report, output)?;
    if !report.passed {
        let critical = report
            .findings
            .iter()
            .filter(|f| f.severity == capramp::models::alert::Severity::Critical)
            .count();
        bail!("security audit failed with {critical} critical finding(s)");
    }
    Ok(())
}

async fn run_optimize(config: &Config) -> Result<()> {
    let outcome = optimize::run_optimization(&config.optimization).await?;
    if !outcome.passed {
        bail!(
            "optimization step failed: {}",
            outcome.detail.unwrap_or_else(|| "no detail".into())
        );
    }
    info!(artifact = %outcome.artifact.display(), "optimization complete");
    Ok(())
}

async fn run_rollout(config: &Config, capital: Decimal) -> Result<()> {
    let plan = RolloutPlan::build(&config.schedule(), capital)?;

    let alerts = Arc::new(AlertDispatcher::new(config.alerts.clone()));
    let ledger = Arc::new(DeploymentLedger::open(&config.ledger.path)?);

    if let Some(last) = ledger.load_latest().await? {
        info!(
            percentage = last.stage.percentage,
            succeeded = last.succeeded,
            "previous ledger entry found; this run starts a fresh escalation"
        );
    }

    let executor = StageExecutor::new(
        config.rollout.executor_command.clone(),
        Duration::from_secs(config.rollout.executor_timeout_secs),
    );
    let probe = HealthProbe::new(
        config.health.endpoints.clone(),
        Duration::from_secs(config.health.timeout_secs),
        config.health.retry_attempts,
        Duration::from_secs(config.health.retry_delay_secs),
    );

    let controller = RolloutController::new(
        executor,
        probe,
        alerts,
        ledger,
        Duration::from_secs(config.rollout.base_wait_secs),
    )
    .with_gate_fatal(config.health.gate_fatal);

    // Ctrl-C requests a stop between stages; an in-flight stage runs to
    // completion or timeout first.
    let cancel = controller.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested, rollout will halt before the next stage");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let outcome = controller.run(&plan).await?;
    if outcome.aborted {
        let percentage = outcome.last_stage.map(|s| s.percentage).unwrap_or(0);
        let reason = outcome
            .reason
            .map(|r| format!("{r:?}"))
            .unwrap_or_else(|| "unknown".into());
        bail!("rollout aborted at {percentage}% ({reason})");
    }
    info!("rollout committed 100% of capital");
    Ok(())
}

async fn run_report(config: &Config, output: Option<&std::path::Path>) -> Result<()> {
    let ledger = DeploymentLedger::open(&config.ledger.path)?;
    let report = report::build_report(&ledger).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(path) = output {
        report::write_report(&report, path)?;
    }
    Ok(())
}
