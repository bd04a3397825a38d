use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::Result;
use dashmap::DashMap;
use tracing::{debug, error, info};

use crate::config::{AlertConfig, ChannelKind};
use crate::models::alert::{AlertEvent, Severity};

/// Routes alert events to notification channels by severity, suppressing
/// repeats of the same severity inside a per-severity cooldown window.
///
/// Delivery is best-effort: a channel failure is logged and never reaches
/// the caller, and one channel failing does not stop the others. Safe to
/// call from concurrent sources.
pub struct AlertDispatcher {
    config: AlertConfig,
    http: reqwest::Client,
    /// severity -> when an alert of that severity last went out
    cooldowns: DashMap<Severity, Instant>,
    dispatched: AtomicU64,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            cooldowns: DashMap::new(),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Events that passed the cooldown gate since startup.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Route an event to its configured channels. Suppressed events are
    /// dropped, not queued.
    pub async fn dispatch(&self, event: AlertEvent) {
        if !self.pass_cooldown(event.severity) {
            debug!(severity = %event.severity, "alert suppressed by cooldown");
            return;
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        info!("ALERT [{}] {}: {}", event.severity, event.source, event.message);

        for channel in self.config.routing.channels_for(event.severity) {
            let sent = match channel {
                ChannelKind::Chat => self.send_chat(&event).await,
                ChannelKind::Email => self.send_email(&event).await,
            };
            if let Err(e) = sent {
                error!(channel = ?channel, "alert delivery failed: {e}");
            }
        }
    }

    /// Per-severity check-then-update. The dashmap entry holds its shard
    /// lock across both steps, so two concurrent callers cannot both pass
    /// within one window.
    fn pass_cooldown(&self, severity: Severity) -> bool {
        let window = self.config.cooldown_window(severity);
        match self.cooldowns.entry(severity) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().elapsed() < window {
                    false
                } else {
                    entry.insert(Instant::now());
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                true
            }
        }
    }

    /// Send to the Telegram chat channel.
    async fn send_chat(&self, event: &AlertEvent) -> Result<()> {
        let (Some(token), Some(chat_id)) = (
            &self.config.telegram_bot_token,
            &self.config.telegram_chat_id,
        ) else {
            return Ok(()); // Not configured
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": format!("[{}] {}: {}", event.severity, event.source, event.message),
            "parse_mode": "Markdown"
        });

        self.http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Send to the email recipients through the HTTP mail gateway.
    async fn send_email(&self, event: &AlertEvent) -> Result<()> {
        let Some(gateway) = &self.config.email_gateway_url else {
            return Ok(());
        };
        if self.config.email_recipients.is_empty() {
            return Ok(());
        }

        let body = serde_json::json!({
            "to": self.config.email_recipients,
            "subject": format!("[{}] rollout alert from {}", event.severity, event.source),
            "body": format!("{}\n\nraised at {}", event.message, event.created_at),
        });

        self.http
            .post(gateway)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CooldownConfig;
    use std::sync::Arc;
    use std::time::Duration;

    /// Dispatcher with no channels configured and short windows, so tests
    /// exercise only the gate.
    fn dispatcher(window_secs: f64) -> AlertDispatcher {
        let config = AlertConfig {
            cooldown: CooldownConfig {
                critical_secs: window_secs,
                warning_secs: window_secs,
                info_secs: window_secs,
            },
            ..AlertConfig::default()
        };
        AlertDispatcher::new(config)
    }

    #[tokio::test]
    async fn test_second_alert_within_window_is_suppressed() {
        let dispatcher = dispatcher(10.0);
        dispatcher
            .dispatch(AlertEvent::critical("rollout", "stage failed"))
            .await;
        dispatcher
            .dispatch(AlertEvent::critical("rollout", "stage failed again"))
            .await;
        assert_eq!(dispatcher.dispatched_count(), 1);
    }

    #[tokio::test]
    async fn test_alert_after_window_sends_again() {
        let dispatcher = dispatcher(0.05);
        dispatcher
            .dispatch(AlertEvent::critical("rollout", "first"))
            .await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        dispatcher
            .dispatch(AlertEvent::critical("rollout", "second"))
            .await;
        assert_eq!(dispatcher.dispatched_count(), 2);
    }

    #[tokio::test]
    async fn test_severities_cool_down_independently() {
        let dispatcher = dispatcher(10.0);
        dispatcher
            .dispatch(AlertEvent::critical("rollout", "critical"))
            .await;
        dispatcher
            .dispatch(AlertEvent::warning("monitor", "warning"))
            .await;
        assert_eq!(dispatcher.dispatched_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_sources_send_exactly_once() {
        let dispatcher = Arc::new(dispatcher(10.0));
        let mut handles = Vec::new();
        for i in 0..16 {
            let d = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                d.dispatch(AlertEvent::critical("monitor", format!("spike {i}")))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(dispatcher.dispatched_count(), 1);
    }

    #[test]
    fn test_default_routing_fans_critical_out_to_both_channels() {
        let config = AlertConfig::default();
        assert_eq!(
            config.routing.channels_for(Severity::Critical),
            &[ChannelKind::Chat, ChannelKind::Email]
        );
        assert_eq!(
            config.routing.channels_for(Severity::Warning),
            &[ChannelKind::Chat]
        );
    }
}
