//! Readiness polling
//!
//! - [`check`]: per-service probe descriptors from the manifest
//! - [`probe`]: one probe attempt against a running service
//! - [`poller`]: retry schedule and healthy/degraded/failed classification

pub mod check;
pub mod poller;
pub mod probe;

pub use check::ReadinessCheck;
pub use poller::{classify, Backoff, PollReport, PollSettings, ReadinessOutcome, ReadinessPoller};
pub use probe::{ProbeResult, Prober, SystemProber};
