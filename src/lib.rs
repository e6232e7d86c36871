//! shipyard - target-aware deployment orchestrator for multi-service stacks
//!
//! A run takes a stack manifest and a target name and walks it through a fixed
//! pipeline: resolve the target into a deployment profile, verify required
//! artifacts, decide per service whether the build cache can be reused, build
//! images in dependency order, start services and poll them until ready.
//!
//! # Core Concepts
//!
//! - **Deployment profile**: the resolved registry, image references, variables
//!   and compose/manifest files for one target, shared read-only by every stage
//! - **Service graph**: services and their `depends_on` edges; build and start
//!   order is a topological sort that breaks ties by declaration order
//! - **Build cache state**: a fingerprint of each service's build context,
//!   recorded after its last successful build
//! - **Readiness**: bounded polling of each service's health check, classified
//!   as healthy, degraded (a dependency is not healthy) or failed
//!
//! # Example Usage
//!
//! ```ignore
//! use shipyard::{Orchestrator, RunOptions, ShipyardConfig, StackManifest};
//! use std::path::Path;
//!
//! async fn deploy() -> anyhow::Result<i32> {
//!     let manifest = StackManifest::load(Path::new("shipyard.yaml"))?;
//!     let options = RunOptions {
//!         target: "docker-dev".to_string(),
//!         ..Default::default()
//!     };
//!
//!     let report = Orchestrator::new(ShipyardConfig::default())
//!         .run(&manifest, &options)
//!         .await;
//!     println!("built {} service(s)", report.builds_invoked());
//!     Ok(report.exit_code())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`profile`]: target names and profile resolution
//! - [`verify`]: required artifact checks
//! - [`cache`]: context fingerprints and cache decisions
//! - [`graph`]: service dependency graph
//! - [`build`]: build backends and the retrying build driver
//! - [`launch`]: starting services per target
//! - [`readiness`]: health probes and the readiness poller
//! - [`orchestrator`]: the run state machine and its report

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod launch;
pub mod manifest;
pub mod orchestrator;
pub mod profile;
pub mod progress;
pub mod readiness;
pub mod util;
pub mod verify;

pub use config::{ConfigError, ShipyardConfig};
pub use error::{
    BuildError, ConfigurationError, FailureCategory, OrchestrationError, ReadinessError,
    VerificationError,
};
pub use graph::{ServiceGraph, ServiceNode, ServiceStatus};
pub use manifest::StackManifest;
pub use orchestrator::{Cancellation, Orchestrator, RunOptions, RunReport, RunState, StartupPolicy};
pub use profile::{DeploymentProfile, ProfileOverrides, Target, TargetResolver};
pub use util::{init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_shipyard() {
        assert_eq!(NAME, "shipyard");
    }
}
