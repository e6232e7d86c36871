use super::check::ReadinessCheck;
use super::probe::{ProbeResult, Prober};
use crate::error::{ConfigurationError, ReadinessError};
use crate::graph::ServiceStatus;
use crate::orchestrator::Cancellation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

/// Probe schedule, declared under `readiness:` at the top of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_total_wait_secs: u64,

    /// Per-attempt timeout; falls back to `SHIPYARD_PROBE_TIMEOUT` when unset
    pub probe_timeout_ms: Option<u64>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            backoff: Backoff::Exponential,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            max_total_wait_secs: 300,
            probe_timeout_ms: None,
        }
    }
}

impl PollSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidSetting {
                field: "readiness.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigurationError::InvalidSetting {
                field: "readiness.max_delay_ms".to_string(),
                message: format!(
                    "must not be below initial_delay_ms ({})",
                    self.initial_delay_ms
                ),
            });
        }
        if self.probe_timeout_ms == Some(0) {
            return Err(ConfigurationError::InvalidSetting {
                field: "readiness.probe_timeout_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn max_total_wait(&self) -> Duration {
        Duration::from_secs(self.max_total_wait_secs)
    }

    /// Wait after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay_ms;
        let millis = match self.backoff {
            Backoff::Fixed => initial,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(32);
                initial
                    .saturating_mul(1u64 << shift)
                    .min(self.max_delay_ms)
            }
        };
        Duration::from_millis(millis)
    }
}

/// Raw result of polling one service, before its dependencies are considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub service: String,
    pub healthy: bool,
    pub attempts: u32,
    pub elapsed: Duration,
    pub last_error: Option<String>,

    /// Whether the launcher reported the process running
    pub running: bool,
}

impl PollReport {
    /// Report for a service without a probe: ready exactly when it is running.
    pub fn liveness(service: &str, running: bool) -> Self {
        Self {
            service: service.to_string(),
            healthy: running,
            attempts: 0,
            elapsed: Duration::ZERO,
            last_error: None,
            running,
        }
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessOutcome {
    pub service: String,
    pub status: ServiceStatus,
    pub attempts: u32,
    pub elapsed_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ReadinessOutcome {
    /// Held back because `dependency` never became healthy.
    pub fn not_started(service: &str, dependency: &str) -> Self {
        Self {
            service: service.to_string(),
            status: ServiceStatus::Degraded,
            attempts: 0,
            elapsed_ms: 0,
            last_error: Some(format!(
                "not started: dependency '{}' is not healthy",
                dependency
            )),
        }
    }

    pub fn start_failed(error: &ReadinessError) -> Self {
        let service = match error {
            ReadinessError::Exhausted { service, .. } | ReadinessError::StartFailed { service, .. } => {
                service.clone()
            }
        };
        Self {
            service,
            status: ServiceStatus::Failed,
            attempts: 0,
            elapsed_ms: 0,
            last_error: Some(error.to_string()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }

    pub fn error(&self) -> Option<ReadinessError> {
        if self.is_healthy() {
            return None;
        }
        Some(ReadinessError::Exhausted {
            service: self.service.clone(),
            attempts: self.attempts,
            last_error: self.last_error.clone(),
        })
    }
}

/// Final status of a polled service given the statuses of its direct dependencies.
///
/// Dependencies must already be classified, so callers walk the graph in
/// build order and degradation propagates transitively. A service whose own
/// process is gone is `failed` regardless of its dependencies.
pub fn classify(report: &PollReport, dependencies: &[ServiceStatus]) -> ReadinessOutcome {
    let status = if report.healthy {
        ServiceStatus::Healthy
    } else if !report.running {
        ServiceStatus::Failed
    } else if dependencies.iter().any(|s| *s != ServiceStatus::Healthy) {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Failed
    };

    let last_error = match (report.healthy, report.running, &report.last_error) {
        (true, _, _) => None,
        (false, true, detail) => detail.clone(),
        (false, false, Some(detail)) => Some(format!("{} (process is not running)", detail)),
        (false, false, None) => Some("process is not running".to_string()),
    };

    ReadinessOutcome {
        service: report.service.clone(),
        status,
        attempts: report.attempts,
        elapsed_ms: report.elapsed.as_millis() as u64,
        last_error,
    }
}

pub struct ReadinessPoller {
    prober: Arc<dyn Prober>,
    settings: PollSettings,
    probe_timeout: Duration,
    cancel: Cancellation,
}

impl ReadinessPoller {
    pub fn new(
        prober: Arc<dyn Prober>,
        settings: PollSettings,
        default_probe_timeout: Duration,
        cancel: Cancellation,
    ) -> Self {
        let probe_timeout = settings
            .probe_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_probe_timeout);
        Self {
            prober,
            settings,
            probe_timeout,
            cancel,
        }
    }

    /// Probes until the first success or until attempts or total wait run out.
    pub async fn poll(&self, service: &str, check: &ReadinessCheck) -> PollReport {
        let start = Instant::now();

        if matches!(check, ReadinessCheck::None) {
            debug!(service, "No readiness check declared");
            return PollReport {
                service: service.to_string(),
                healthy: true,
                attempts: 0,
                elapsed: start.elapsed(),
                last_error: None,
                running: true,
            };
        }

        let budget = self.settings.max_total_wait();
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.settings.max_attempts && !self.cancel.is_cancelled() {
            attempts += 1;
            let result = match tokio::time::timeout(
                self.probe_timeout,
                self.prober.probe(check, self.probe_timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => ProbeResult::unhealthy(format!(
                    "probe timed out after {}ms",
                    self.probe_timeout.as_millis()
                )),
            };

            if result.healthy {
                info!(service, attempts, elapsed_ms = start.elapsed().as_millis() as u64, "Service ready");
                return PollReport {
                    service: service.to_string(),
                    healthy: true,
                    attempts,
                    elapsed: start.elapsed(),
                    last_error: None,
                    running: true,
                };
            }

            debug!(service, attempt = attempts, check = %check, error = ?result.diagnostic, "Probe failed");
            last_error = result.diagnostic;

            if attempts >= self.settings.max_attempts {
                break;
            }
            let delay = self.settings.delay(attempts);
            if start.elapsed() + delay > budget {
                debug!(service, attempts, "Readiness wait budget exhausted");
                break;
            }
            tokio::time::sleep(delay).await;
        }

        warn!(service, attempts, error = ?last_error, "Service did not become ready");
        PollReport {
            service: service.to_string(),
            healthy: false,
            attempts,
            elapsed: start.elapsed(),
            last_error,
            running: true,
        }
    }
}
