use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Aggregate health verdict across all configured endpoints.
///
/// Produced by the health probe and consumed immediately by the rollout
/// controller; not persisted.
#[derive(Debug, Clone)]
pub struct HealthVerdict {
    pub healthy: bool,
    /// Per-endpoint response time in milliseconds, for endpoints that answered.
    pub metrics: HashMap<String, f64>,
    pub checked_at: DateTime<Utc>,
}

impl HealthVerdict {
    pub fn healthy_now() -> Self {
        Self {
            healthy: true,
            metrics: HashMap::new(),
            checked_at: Utc::now(),
        }
    }
}
