//! Progress handler trait and events

use crate::cache::DecisionReason;
use crate::graph::ServiceStatus;
use crate::orchestrator::RunState;
use std::time::Duration;

/// Events emitted while a deployment run advances
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Run started for a target
    RunStarted { target: String, services: usize },

    /// Orchestrator entered a state
    StateEntered { state: RunState },

    /// Orchestrator left a state without failing
    StateComplete { state: RunState, duration: Duration },

    /// Artifact verification finished
    VerificationComplete { checked: usize, missing: usize },

    /// Cache decision made for one service
    CacheEvaluated {
        service: String,
        use_cache: bool,
        reason: DecisionReason,
    },

    BuildStarted {
        service: String,
        index: usize,
        total: usize,
    },

    BuildComplete {
        service: String,
        status: ServiceStatus,
        invoked: bool,
        attempts: u32,
        duration: Duration,
    },

    /// Service handed to the launcher
    ServiceStarted { service: String },

    ServiceStartFailed { service: String, error: String },

    /// Final readiness classification of one service
    ReadinessResolved {
        service: String,
        status: ServiceStatus,
        attempts: u32,
    },

    /// Run reached `Done`
    RunComplete { success: bool, duration: Duration },

    /// Run failed fatally
    Failed { error: String },
}

/// Trait for handling progress events during a run
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
