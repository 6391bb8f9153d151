use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{SmokeCheckResult, SmokeRunner, join_url};
use crate::config::SmokeCheck;

/// Smoke checks over HTTP with `reqwest`.
pub struct HttpSmokeRunner {
    client: reqwest::Client,
    reachability_attempts: u32,
    reachability_delay: Duration,
}

impl HttpSmokeRunner {
    pub fn new(reachability_attempts: u32, reachability_delay: Duration, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            reachability_attempts,
            reachability_delay,
        }
    }

    async fn check_one(&self, base_url: &str, check: &SmokeCheck) -> SmokeCheckResult {
        let url = join_url(base_url, &check.endpoint);
        let started = Instant::now();
        let response = self.client.get(&url).send().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, error) = match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let error = (status != check.expected_status)
                    .then(|| format!("expected {}, got {}", check.expected_status, status));
                (Some(status), error)
            }
            Err(e) => (None, Some(format!("request failed: {}", e))),
        };

        SmokeCheckResult {
            endpoint: check.endpoint.clone(),
            url,
            expected_status: check.expected_status,
            status,
            passed: error.is_none(),
            error,
            duration_ms,
        }
    }
}

#[async_trait]
impl SmokeRunner for HttpSmokeRunner {
    async fn wait_until_reachable(&self, base_url: &str) -> bool {
        for attempt in 1..=self.reachability_attempts.max(1) {
            match self.client.get(base_url).send().await {
                Ok(resp) if !resp.status().is_server_error() => {
                    debug!(attempt, status = resp.status().as_u16(), "Deploy URL reachable");
                    return true;
                }
                Ok(resp) => debug!(attempt, status = resp.status().as_u16(), "Deploy URL not ready"),
                Err(e) => debug!(attempt, error = %e, "Deploy URL not reachable yet"),
            }
            if attempt < self.reachability_attempts {
                tokio::time::sleep(self.reachability_delay).await;
            }
        }
        warn!(url = base_url, attempts = self.reachability_attempts, "Deploy URL never became reachable");
        false
    }

    async fn run_checks(&self, base_url: &str, checks: &[SmokeCheck]) -> Vec<SmokeCheckResult> {
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            let result = self.check_one(base_url, check).await;
            info!(
                endpoint = %result.endpoint,
                passed = result.passed,
                status = ?result.status,
                "Smoke check"
            );
            results.push(result);
        }
        results
    }
}
