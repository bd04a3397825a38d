use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::alert::Severity;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rollout: RolloutConfig,
    pub health: HealthConfig,
    pub alerts: AlertConfig,
    pub optimization: OptimizationConfig,
    pub setup: SetupConfig,
    pub ledger: LedgerConfig,
}

/// One entry of the stage schedule as written in the config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageSpec {
    pub percentage: u8,
    pub risk_level: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Ordered escalation schedule; must end at 100.
    pub stages: Vec<StageSpec>,
    /// Soak time per percentage point after a healthy stage.
    pub base_wait_secs: u64,
    /// External deployment command; receives --capital and --risk-level.
    pub executor_command: Vec<String>,
    pub executor_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Readiness endpoints that must all answer 2xx.
    pub endpoints: Vec<String>,
    /// Per-attempt timeout.
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    /// When false a failed health gate raises a warning and the rollout
    /// continues instead of aborting.
    pub gate_fatal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Chat,
    Email,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub critical: Vec<ChannelKind>,
    pub warning: Vec<ChannelKind>,
    pub info: Vec<ChannelKind>,
}

impl RoutingConfig {
    pub fn channels_for(&self, severity: Severity) -> &[ChannelKind] {
        match severity {
            Severity::Critical => &self.critical,
            Severity::Warning => &self.warning,
            Severity::Info => &self.info,
        }
    }
}

/// Minimum spacing between two dispatched alerts of the same severity.
/// Lower severities wait longer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub critical_secs: f64,
    pub warning_secs: f64,
    pub info_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// HTTP mail gateway used for the email channel.
    pub email_gateway_url: Option<String>,
    pub email_recipients: Vec<String>,
    pub routing: RoutingConfig,
    pub cooldown: CooldownConfig,
}

impl AlertConfig {
    pub fn cooldown_window(&self, severity: Severity) -> Duration {
        let secs = match severity {
            Severity::Critical => self.cooldown.critical_secs,
            Severity::Warning => self.cooldown.warning_secs,
            Severity::Info => self.cooldown.info_secs,
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// External optimization step; pass/fail via exit code.
    pub command: Vec<String>,
    pub iterations: u32,
    pub risk_level: u8,
    /// Parameter name to [low, high] search range.
    pub param_ranges: HashMap<String, (f64, f64)>,
    /// Where the step writes the tuned configuration artifact.
    pub artifact_path: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    pub directories: Vec<String>,
    /// Brings up the metrics stack; empty disables the step.
    pub stack_command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: String,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                StageSpec { percentage: 5, risk_level: 1 },
                StageSpec { percentage: 25, risk_level: 2 },
                StageSpec { percentage: 50, risk_level: 2 },
                StageSpec { percentage: 100, risk_level: 3 },
            ],
            base_wait_secs: 6,
            executor_command: vec!["scripts/deploy_strategy.sh".into()],
            executor_timeout_secs: 120,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "http://localhost:3000/api/health".into(),
                "http://localhost:8086/health".into(),
            ],
            timeout_secs: 2,
            retry_attempts: 3,
            retry_delay_secs: 1,
            gate_fatal: true,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            critical: vec![ChannelKind::Chat, ChannelKind::Email],
            warning: vec![ChannelKind::Chat],
            info: vec![ChannelKind::Chat],
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            critical_secs: 300.0,
            warning_secs: 900.0,
            info_secs: 1800.0,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            email_gateway_url: None,
            email_recipients: Vec::new(),
            routing: RoutingConfig::default(),
            cooldown: CooldownConfig::default(),
        }
    }
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        let mut param_ranges = HashMap::new();
        param_ranges.insert("ema_short".to_string(), (10.0, 30.0));
        param_ranges.insert("ema_long".to_string(), (40.0, 60.0));
        param_ranges.insert("rsi_period".to_string(), (10.0, 20.0));
        param_ranges.insert("atr_multiplier".to_string(), (1.0, 3.0));
        Self {
            command: vec!["scripts/run_optimization.sh".into()],
            iterations: 100,
            risk_level: 2,
            param_ranges,
            artifact_path: "reports/optimized_params.json".into(),
            timeout_secs: 3600,
        }
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            directories: vec!["logs".into(), "reports".into()],
            stack_command: vec![
                "docker".into(),
                "compose".into(),
                "-f".into(),
                "monitoring/docker-compose.yml".into(),
                "up".into(),
                "-d".into(),
            ],
            timeout_secs: 180,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: "ledger/deployments.jsonl".into(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment overrides.
    ///
    /// A missing file falls back to defaults. Secrets come from the
    /// environment (.env is read if present):
    ///   TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID for the chat channel
    ///   EMAIL_GATEWAY_URL, EMAIL_RECIPIENTS for the email channel (comma-separated)
    ///   LEDGER_PATH to override the ledger file location
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        let _ = dotenv::dotenv();

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Self::default()
        };

        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() && token != "your_bot_token" {
                config.alerts.telegram_bot_token = Some(token);
            }
        }
        if let Ok(chat) = std::env::var("TELEGRAM_CHAT_ID") {
            if !chat.is_empty() && chat != "your_chat_id" {
                config.alerts.telegram_chat_id = Some(chat);
            }
        }
        if let Ok(gateway) = std::env::var("EMAIL_GATEWAY_URL") {
            if !gateway.is_empty() {
                config.alerts.email_gateway_url = Some(gateway);
            }
        }
        if let Ok(recipients) = std::env::var("EMAIL_RECIPIENTS") {
            let parsed: Vec<String> = recipients
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.alerts.email_recipients = parsed;
            }
        }
        if let Ok(path) = std::env::var("LEDGER_PATH") {
            if !path.is_empty() {
                config.ledger.path = path;
            }
        }

        Ok(config)
    }

    /// Stage schedule as (percentage, risk_level) pairs for plan building.
    pub fn schedule(&self) -> Vec<(u8, u8)> {
        self.rollout
            .stages
            .iter()
            .map(|s| (s.percentage, s.risk_level))
            .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.rollout.stages.is_empty(),
            "rollout.stages must not be empty"
        );
        anyhow::ensure!(
            !self.rollout.executor_command.is_empty(),
            "rollout.executor_command must not be empty"
        );
        anyhow::ensure!(
            self.rollout.executor_timeout_secs > 0,
            "rollout.executor_timeout_secs must be positive"
        );
        anyhow::ensure!(
            !self.health.endpoints.is_empty(),
            "health.endpoints must list at least one endpoint"
        );
        for endpoint in &self.health.endpoints {
            url::Url::parse(endpoint)
                .map_err(|e| anyhow::anyhow!("invalid health endpoint {endpoint}: {e}"))?;
        }
        anyhow::ensure!(
            self.health.timeout_secs > 0,
            "health.timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.health.retry_attempts >= 1,
            "health.retry_attempts must be at least 1"
        );
        anyhow::ensure!(
            !self.ledger.path.is_empty(),
            "ledger.path must not be empty"
        );
        for (name, (low, high)) in &self.optimization.param_ranges {
            anyhow::ensure!(
                low <= high,
                "optimization.param_ranges.{name}: low bound {low} exceeds high bound {high}"
            );
        }
        Ok(())
    }
}
