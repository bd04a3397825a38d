use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A single alert, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub severity: Severity,
    pub message: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(severity: Severity, source: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            source: source.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn critical(source: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, source, message)
    }

    pub fn warning(source: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, source, message)
    }

    pub fn info(source: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, source, message)
    }
}
