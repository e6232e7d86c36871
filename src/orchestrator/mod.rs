//! Deployment run state machine
//!
//! `Resolving -> Verifying -> Invalidating -> Building -> Starting ->
//! PollingReady -> Done`. Resolving, Verifying and Building fail fast;
//! Starting and PollingReady carry on past individual service failures and
//! report them together.

mod cancel;
mod report;
mod run;
mod state;

pub use cancel::Cancellation;
pub use report::{CacheEntry, RunReport};
pub use run::{Orchestrator, RunOptions, StartupPolicy};
pub use state::{RunState, Verdict};
