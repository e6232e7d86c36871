//! Runtime configuration for shipyard
//!
//! Settings are loaded from environment variables with defaults. The stack
//! itself (services, targets, readiness schedule) lives in the manifest; this
//! covers how shipyard runs on the current machine.
//!
//! # Environment Variables
//!
//! - `SHIPYARD_STATE_DIR`: Directory for persisted build cache state - default: ".shipyard"
//! - `SHIPYARD_MANIFEST`: Stack manifest path - default: "shipyard.yaml"
//! - `SHIPYARD_MAX_WORKERS`: Concurrent builds and probes per wave - default: "4"
//! - `SHIPYARD_BUILD_TIMEOUT`: Per-attempt build timeout in seconds - default: "1800"
//! - `SHIPYARD_PROBE_TIMEOUT`: Per-attempt probe timeout in seconds - default: "5"
//! - `SHIPYARD_LOG_LEVEL`: Logging level - default: "info"
//! - `SHIPYARD_DOCKER`: Docker CLI program - default: "docker"
//! - `SHIPYARD_KUBECTL`: kubectl program - default: "kubectl"
//!
//! # Example
//!
//! ```no_run
//! use shipyard::ShipyardConfig;
//!
//! let config = ShipyardConfig::default();
//! config.validate().expect("Invalid configuration");
//! println!("{}", config);
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_STATE_DIR: &str = ".shipyard";
const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_DOCKER: &str = "docker";
const DEFAULT_KUBECTL: &str = "kubectl";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone)]
pub struct ShipyardConfig {
    /// Root of persisted state; cache records live under `<state_dir>/cache`
    pub state_dir: PathBuf,

    pub manifest: PathBuf,

    /// Upper bound on concurrent builds within a dependency wave and concurrent probes
    pub max_workers: usize,

    pub build_timeout_secs: u64,
    pub probe_timeout_secs: u64,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    pub docker_program: String,
    pub kubectl_program: String,
}

impl Default for ShipyardConfig {
    /// Loads from `SHIPYARD_*` environment variables, falling back to defaults
    fn default() -> Self {
        let state_dir = env::var("SHIPYARD_STATE_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

        let manifest = env::var("SHIPYARD_MANIFEST")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(crate::manifest::DEFAULT_MANIFEST_FILE));

        let max_workers = env::var("SHIPYARD_MAX_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_WORKERS);

        let build_timeout_secs = env::var("SHIPYARD_BUILD_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS);

        let probe_timeout_secs = env::var("SHIPYARD_PROBE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS);

        let log_level = env::var("SHIPYARD_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        let docker_program =
            env::var("SHIPYARD_DOCKER").unwrap_or_else(|_| DEFAULT_DOCKER.to_string());
        let kubectl_program =
            env::var("SHIPYARD_KUBECTL").unwrap_or_else(|_| DEFAULT_KUBECTL.to_string());

        Self {
            state_dir,
            manifest,
            max_workers,
            build_timeout_secs,
            probe_timeout_secs,
            log_level,
            docker_program,
            kubectl_program,
        }
    }
}

impl ShipyardConfig {
    /// Checks numeric ranges and the log level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "Max workers must be at least 1".to_string(),
            ));
        }
        if self.max_workers > 64 {
            return Err(ConfigError::ValidationFailed(
                "Max workers cannot exceed 64".to_string(),
            ));
        }

        if self.build_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Build timeout must be at least 1 second".to_string(),
            ));
        }
        if self.build_timeout_secs > 24 * 3600 {
            return Err(ConfigError::ValidationFailed(
                "Build timeout cannot exceed 24 hours".to_string(),
            ));
        }

        if self.probe_timeout_secs == 0 || self.probe_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Probe timeout must be between 1 second and 10 minutes".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    /// State directory; a relative one lives next to the manifest.
    pub fn state_path(&self, manifest_root: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            manifest_root.join(&self.state_dir)
        }
    }

    pub fn cache_dir(&self, manifest_root: &Path) -> PathBuf {
        self.state_path(manifest_root).join("cache")
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl fmt::Display for ShipyardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Shipyard Configuration:")?;
        writeln!(f, "  State Dir: {}", self.state_dir.display())?;
        writeln!(f, "  Manifest: {}", self.manifest.display())?;
        writeln!(f, "  Max Workers: {}", self.max_workers)?;
        writeln!(f, "  Build Timeout: {}s", self.build_timeout_secs)?;
        writeln!(f, "  Probe Timeout: {}s", self.probe_timeout_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        writeln!(f, "  Docker: {}", self.docker_program)?;
        writeln!(f, "  Kubectl: {}", self.kubectl_program)?;
        Ok(())
    }
}
