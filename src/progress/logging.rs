//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use crate::graph::ServiceStatus;
use tracing::{debug, error, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { target, services } => {
                info!(target_env = %target, services, "Starting deployment");
            }
            ProgressEvent::StateEntered { state } => {
                debug!(state = %state, "Entering state");
            }
            ProgressEvent::StateComplete { state, duration } => {
                info!(
                    state = %state,
                    duration_ms = duration.as_millis(),
                    "State complete"
                );
            }
            ProgressEvent::VerificationComplete { checked, missing } => {
                if *missing > 0 {
                    warn!(checked, missing, "Artifact verification found missing artifacts");
                } else {
                    info!(checked, "All required artifacts present");
                }
            }
            ProgressEvent::CacheEvaluated {
                service,
                use_cache,
                reason,
            } => {
                debug!(service = %service, use_cache, reason = %reason, "Cache evaluated");
            }
            ProgressEvent::BuildStarted {
                service,
                index,
                total,
            } => {
                info!(
                    service = %service,
                    progress = %format!("{}/{}", index, total),
                    "Building service"
                );
            }
            ProgressEvent::BuildComplete {
                service,
                status,
                invoked,
                attempts,
                duration,
            } => {
                if *status == ServiceStatus::Built {
                    info!(
                        service = %service,
                        invoked,
                        attempts,
                        duration_ms = duration.as_millis(),
                        "Build complete"
                    );
                } else {
                    warn!(service = %service, status = %status, attempts, "Build did not complete");
                }
            }
            ProgressEvent::ServiceStarted { service } => {
                debug!(service = %service, "Service start requested");
            }
            ProgressEvent::ServiceStartFailed { service, error } => {
                warn!(service = %service, error = %error, "Service failed to start");
            }
            ProgressEvent::ReadinessResolved {
                service,
                status,
                attempts,
            } => match status {
                ServiceStatus::Healthy => info!(service = %service, attempts, "Service healthy"),
                _ => warn!(service = %service, status = %status, attempts, "Service not healthy"),
            },
            ProgressEvent::RunComplete { success, duration } => {
                info!(
                    success,
                    duration_ms = duration.as_millis(),
                    "Deployment run finished"
                );
            }
            ProgressEvent::Failed { error: message } => {
                error!(error = %message, "Deployment failed");
            }
        }
    }
}
