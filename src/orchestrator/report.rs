use super::state::{RunState, Verdict};
use crate::build::BuildReport;
use crate::cache::DecisionReason;
use crate::error::{FailureCategory, OrchestrationError};
use crate::graph::ServiceStatus;
use crate::readiness::ReadinessOutcome;
use crate::verify::VerificationResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub service: String,
    pub use_cache: bool,
    pub reason: DecisionReason,
}

/// Everything a run decided and observed, in build order.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub target: String,
    pub state: RunState,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<FailureCategory>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Service, artifact path or variable the failure is attributed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending: Option<String>,

    pub build_order: Vec<String>,
    pub verification: Vec<VerificationResult>,
    pub cache: Vec<CacheEntry>,
    pub builds: Vec<BuildReport>,
    pub readiness: Vec<ReadinessOutcome>,
    pub services: BTreeMap<String, ServiceStatus>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,

    #[serde(skip)]
    pub failure: Option<OrchestrationError>,
}

impl RunReport {
    pub fn new(target: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            target: target.to_string(),
            state: RunState::Resolving,
            success: false,
            category: None,
            error: None,
            offending: None,
            build_order: Vec::new(),
            verification: Vec::new(),
            cache: Vec::new(),
            builds: Vec::new(),
            readiness: Vec::new(),
            services: BTreeMap::new(),
            started_at: Utc::now(),
            duration_ms: 0,
            failure: None,
        }
    }

    pub(crate) fn finish(&mut self, result: Result<(), OrchestrationError>, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
        match result {
            Ok(()) => {
                self.success = true;
                self.state = RunState::Done(Verdict::Success);
            }
            Err(e) => {
                self.success = false;
                self.state = RunState::Done(Verdict::Failure);
                self.category = Some(e.category());
                self.error = Some(e.to_string());
                self.offending = e.offending();
                self.failure = Some(e);
            }
        }
    }

    /// Number of services the build backend actually ran for.
    pub fn builds_invoked(&self) -> usize {
        self.builds.iter().filter(|b| b.invoked).count()
    }

    pub fn build(&self, service: &str) -> Option<&BuildReport> {
        self.builds.iter().find(|b| b.service == service)
    }

    pub fn outcome(&self, service: &str) -> Option<&ReadinessOutcome> {
        self.readiness.iter().find(|o| o.service == service)
    }

    pub fn status(&self, service: &str) -> Option<ServiceStatus> {
        self.services.get(service).copied()
    }

    pub fn exit_code(&self) -> i32 {
        match (self.success, self.category) {
            (true, _) => 0,
            (false, Some(category)) => category.exit_code(),
            (false, None) => FailureCategory::Internal.exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;

    #[test]
    fn test_success_report() {
        let mut report = RunReport::new("docker-dev");
        report.finish(Ok(()), Duration::from_millis(1500));

        assert!(report.success);
        assert_eq!(report.state, RunState::Done(Verdict::Success));
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.duration_ms, 1500);
        assert!(report.category.is_none());
    }

    #[test]
    fn test_failure_report_carries_category() {
        let mut report = RunReport::new("docker-prod");
        let err = OrchestrationError::Build(BuildError::Timeout {
            service: "frontend".to_string(),
            seconds: 1800,
        });
        report.finish(Err(err), Duration::from_secs(1));

        assert!(!report.success);
        assert_eq!(report.category, Some(FailureCategory::Build));
        assert_eq!(report.offending.as_deref(), Some("frontend"));
        assert_eq!(report.exit_code(), 4);
        assert!(report.failure.is_some());
    }

    #[test]
    fn test_serializes_without_internal_error() {
        let mut report = RunReport::new("local");
        report.finish(
            Err(OrchestrationError::Readiness {
                services: vec!["backend".to_string()],
            }),
            Duration::ZERO,
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["category"], "readiness");
        assert_eq!(json["state"]["done"], "failure");
        assert!(json.get("failure").is_none());
        assert_eq!(json["run_id"].as_str().unwrap().len(), 36);
    }
}
