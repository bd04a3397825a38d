use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::models::health::HealthVerdict;

/// Seam between the rollout controller and the health gate.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> HealthVerdict;
}

/// Probes the configured readiness endpoints over HTTP.
///
/// Every endpoint must answer 2xx within the per-attempt timeout for the
/// aggregate verdict to be healthy. Each endpoint gets a small fixed number
/// of attempts with a fixed delay between them. An unreachable endpoint is
/// an unhealthy verdict, never an error.
pub struct HealthProbe {
    endpoints: Vec<String>,
    client: reqwest::Client,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl HealthProbe {
    pub fn new(
        endpoints: Vec<String>,
        timeout: Duration,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            endpoints,
            client: reqwest::Client::new(),
            timeout,
            retry_attempts: retry_attempts.max(1),
            retry_delay,
        }
    }

    /// Probe a single endpoint, retrying up to the configured attempt count.
    /// Returns the response time in milliseconds when the endpoint answered.
    async fn probe_endpoint(&self, url: &str) -> (bool, Option<f64>) {
        for attempt in 1..=self.retry_attempts {
            let started = std::time::Instant::now();
            match self.client.get(url).timeout(self.timeout).send().await {
                Ok(response) if response.status().is_success() => {
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    debug!(url, attempt, elapsed_ms, "endpoint healthy");
                    return (true, Some(elapsed_ms));
                }
                Ok(response) => {
                    debug!(url, attempt, status = %response.status(), "endpoint not ready");
                }
                Err(e) => {
                    debug!(url, attempt, "endpoint unreachable: {e}");
                }
            }
            if attempt < self.retry_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        (false, None)
    }
}

#[async_trait]
impl Probe for HealthProbe {
    async fn check(&self) -> HealthVerdict {
        // All endpoints in parallel; results joined before the verdict.
        let checks = join_all(self.endpoints.iter().map(|url| async move {
            let (ok, elapsed_ms) = self.probe_endpoint(url).await;
            (url.clone(), ok, elapsed_ms)
        }))
        .await;

        let mut metrics = HashMap::new();
        let mut healthy = true;
        for (url, ok, elapsed_ms) in checks {
            if let Some(ms) = elapsed_ms {
                metrics.insert(url.clone(), ms);
            }
            if !ok {
                warn!(%url, "health endpoint failed all attempts");
                healthy = false;
            }
        }

        HealthVerdict {
            healthy,
            metrics,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Minimal HTTP endpoint answering every request with the given status line.
    async fn spawn_endpoint(status_line: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {status_line}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok"
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}/health")
    }

    /// A URL that refuses connections (the listener is bound, then dropped).
    async fn dead_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/health")
    }

    fn probe(endpoints: Vec<String>) -> HealthProbe {
        HealthProbe::new(
            endpoints,
            Duration::from_millis(500),
            2,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_all_endpoints_healthy() {
        let a = spawn_endpoint("200 OK").await;
        let b = spawn_endpoint("204 No Content").await;

        let verdict = probe(vec![a.clone(), b.clone()]).check().await;
        assert!(verdict.healthy);
        assert!(verdict.metrics.contains_key(&a));
        assert!(verdict.metrics.contains_key(&b));
    }

    #[tokio::test]
    async fn test_one_unhealthy_endpoint_fails_aggregate() {
        let good = spawn_endpoint("200 OK").await;
        let bad = spawn_endpoint("503 Service Unavailable").await;

        let verdict = probe(vec![good, bad]).check().await;
        assert!(!verdict.healthy);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unhealthy_not_an_error() {
        let good = spawn_endpoint("200 OK").await;
        let dead = dead_endpoint().await;

        let started = std::time::Instant::now();
        let verdict = probe(vec![good, dead]).check().await;
        assert!(!verdict.healthy);
        // Bounded: retries are capped, not open-ended.
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_no_endpoints_is_vacuously_healthy() {
        let verdict = probe(Vec::new()).check().await;
        assert!(verdict.healthy);
        assert!(verdict.metrics.is_empty());
    }
}
