use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::alert::Severity;

#[derive(Debug, Serialize)]
pub struct AuditFinding {
    pub check: String,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub timestamp: DateTime<Utc>,
    pub findings: Vec<AuditFinding>,
    /// False when any critical finding is present.
    pub passed: bool,
}

/// Configuration-hygiene audit run before capital goes live.
///
/// Catches placeholder secrets, loose file permissions on the config file,
/// and health endpoints that would leave the deployment blind. Warnings do
/// not fail the audit; critical findings do.
pub fn run_audit(config: &Config, config_path: Option<&Path>) -> AuditReport {
    let mut findings = Vec::new();

    check_secrets(config, &mut findings);
    check_endpoints(config, &mut findings);
    check_commands(config, &mut findings);
    if let Some(path) = config_path {
        check_file_permissions(path, &mut findings);
    }

    let passed = !findings
        .iter()
        .any(|f| f.severity == Severity::Critical);

    for finding in &findings {
        warn!(
            check = %finding.check,
            severity = %finding.severity,
            "{}",
            finding.detail
        );
    }
    if passed {
        info!(findings = findings.len(), "security audit passed");
    }

    AuditReport {
        timestamp: Utc::now(),
        findings,
        passed,
    }
}

fn check_secrets(config: &Config, findings: &mut Vec<AuditFinding>) {
    let placeholders = ["your_bot_token", "your_chat_id", "changeme", "xxx"];
    let suspect = |value: &str| {
        value.is_empty() || placeholders.iter().any(|p| value.eq_ignore_ascii_case(p))
    };

    if let Some(token) = &config.alerts.telegram_bot_token {
        if suspect(token) {
            findings.push(AuditFinding {
                check: "alerts.telegram_bot_token".into(),
                severity: Severity::Critical,
                detail: "telegram bot token is a placeholder; alerts would silently fail".into(),
            });
        }
    }
    if config.alerts.email_gateway_url.is_some() && config.alerts.email_recipients.is_empty() {
        findings.push(AuditFinding {
            check: "alerts.email_recipients".into(),
            severity: Severity::Warning,
            detail: "email gateway configured but no recipients listed".into(),
        });
    }
}

fn check_endpoints(config: &Config, findings: &mut Vec<AuditFinding>) {
    for endpoint in &config.health.endpoints {
        let Ok(parsed) = url::Url::parse(endpoint) else {
            findings.push(AuditFinding {
                check: "health.endpoints".into(),
                severity: Severity::Critical,
                detail: format!("endpoint {endpoint} is not a valid URL"),
            });
            continue;
        };
        let loopback = matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
        if parsed.scheme() == "http" && !loopback {
            findings.push(AuditFinding {
                check: "health.endpoints".into(),
                severity: Severity::Warning,
                detail: format!("endpoint {endpoint} uses plaintext HTTP off the local host"),
            });
        }
    }
}

fn check_commands(config: &Config, findings: &mut Vec<AuditFinding>) {
    if config.rollout.executor_command.is_empty() {
        findings.push(AuditFinding {
            check: "rollout.executor_command".into(),
            severity: Severity::Critical,
            detail: "no deployment command configured; rollout cannot commit capital".into(),
        });
    }
}

#[cfg(unix)]
fn check_file_permissions(path: &Path, findings: &mut Vec<AuditFinding>) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return; // No config file on disk, nothing to check.
    };
    let mode = metadata.permissions().mode();
    if mode & 0o077 != 0 {
        findings.push(AuditFinding {
            check: "config.permissions".into(),
            severity: Severity::Warning,
            detail: format!(
                "{} is group/world accessible (mode {:o}); restrict to the operator",
                path.display(),
                mode & 0o777
            ),
        });
    }
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path, _findings: &mut Vec<AuditFinding>) {}

/// Write the audit report as pretty JSON, creating parent directories.
pub fn write_report(report: &AuditReport, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating report directory {}", dir.display()))?;
        }
    }
    let body = serde_json::to_string_pretty(report).context("serializing audit report")?;
    std::fs::write(path, body)
        .with_context(|| format!("writing audit report to {}", path.display()))?;
    info!(path = %path.display(), "audit report written");
    Ok(())
}
