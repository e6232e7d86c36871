//! Error taxonomy for orchestration runs
//!
//! Each component reports its own typed error. [`OrchestrationError`] is the
//! aggregate the orchestrator and CLI work with, and [`FailureCategory`] maps it
//! to a process exit code so calling automation can branch on the failure class.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Static configuration problems. Always fatal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error(
        "Unknown target '{target}'. Valid targets: local, docker-dev, docker-prod, kubernetes, cloud-vm{}",
        suggestion_suffix(.suggestion)
    )]
    UnknownTarget {
        target: String,
        suggestion: Option<String>,
    },

    #[error("Target '{target}' requires variable {variable} but it has no override and no default")]
    MissingRequiredVariable { target: String, variable: String },

    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("Service '{service}' depends on unknown service '{missing}'")]
    UnknownDependency { service: String, missing: String },

    #[error("Unknown service '{service}'{}", suggestion_suffix(.suggestion))]
    UnknownService {
        service: String,
        suggestion: Option<String>,
    },

    #[error("Service '{service}' is declared more than once")]
    DuplicateService { service: String },

    #[error("Service '{service}' has no command for the local target")]
    MissingLocalCommand { service: String },

    #[error("Invalid manifest {}: {message}", .path.display())]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Invalid setting {field}: {message}")]
    InvalidSetting { field: String, message: String },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{}'?)", s))
        .unwrap_or_default()
}

/// Required artifacts that are absent before any build is attempted.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Missing required artifact: {}", .path.display())]
    MissingArtifact { path: PathBuf },

    #[error("Failed to derive {} from {}: {source}", .path.display(), .from.display())]
    DeriveFailed {
        path: PathBuf,
        from: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VerificationError {
    pub fn path(&self) -> &PathBuf {
        match self {
            VerificationError::MissingArtifact { path } => path,
            VerificationError::DeriveFailed { path, .. } => path,
        }
    }
}

/// Fingerprinting or cache store failures.
///
/// Never fatal: an unverifiable cache is treated as invalid.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to read build context {}: {message}", .path.display())]
    UnreadableContext { path: PathBuf, message: String },

    #[error("Failed to access cache record {}: {source}", .path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache record {}: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },
}

/// External build backend failures, attributed to one service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Build of '{service}' failed{}: {}", exit_suffix(.exit_code), last_lines(.output))]
    Failed {
        service: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Build of '{service}' timed out after {seconds}s")]
    Timeout { service: String, seconds: u64 },

    #[error("Failed to launch build backend for '{service}': {message}")]
    Spawn { service: String, message: String },

    #[error("Build of '{service}' skipped: dependency '{dependency}' failed to build")]
    DependencyFailed { service: String, dependency: String },
}

impl BuildError {
    pub fn service(&self) -> &str {
        match self {
            BuildError::Failed { service, .. }
            | BuildError::Timeout { service, .. }
            | BuildError::Spawn { service, .. }
            | BuildError::DependencyFailed { service, .. } => service,
        }
    }
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" with exit code {}", c))
        .unwrap_or_default()
}

fn last_lines(output: &str) -> String {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}

/// A service that never became ready. Never aborts other services' polling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("Service '{service}' did not become ready after {attempts} attempt(s){}", .last_error.as_ref().map(|e| format!(": {}", e)).unwrap_or_default())]
    Exhausted {
        service: String,
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("Failed to start '{service}': {message}")]
    StartFailed { service: String, message: String },
}

/// Aggregate error of an orchestration run.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("{} service(s) not ready: {}", .services.len(), .services.join(", "))]
    Readiness { services: Vec<String> },

    #[error("Run cancelled during {state}")]
    Cancelled { state: String },
}

impl OrchestrationError {
    pub fn category(&self) -> FailureCategory {
        match self {
            OrchestrationError::Configuration(_) => FailureCategory::Configuration,
            OrchestrationError::Verification(_) => FailureCategory::Verification,
            OrchestrationError::Build(_) => FailureCategory::Build,
            OrchestrationError::Readiness { .. } => FailureCategory::Readiness,
            OrchestrationError::Cancelled { .. } => FailureCategory::Cancelled,
        }
    }

    /// The service, artifact, or variable the failure is attributed to.
    pub fn offending(&self) -> Option<String> {
        match self {
            OrchestrationError::Configuration(e) => match e {
                ConfigurationError::UnknownTarget { target, .. } => Some(target.clone()),
                ConfigurationError::MissingRequiredVariable { variable, .. } => {
                    Some(variable.clone())
                }
                ConfigurationError::DependencyCycle { path } => path.first().cloned(),
                ConfigurationError::UnknownDependency { missing, .. } => Some(missing.clone()),
                ConfigurationError::UnknownService { service, .. }
                | ConfigurationError::DuplicateService { service }
                | ConfigurationError::MissingLocalCommand { service } => Some(service.clone()),
                ConfigurationError::InvalidManifest { path, .. } => {
                    Some(path.display().to_string())
                }
                ConfigurationError::InvalidSetting { field, .. } => Some(field.clone()),
            },
            OrchestrationError::Verification(e) => Some(e.path().display().to_string()),
            OrchestrationError::Build(e) => Some(e.service().to_string()),
            OrchestrationError::Readiness { services } => Some(services.join(",")),
            OrchestrationError::Cancelled { .. } => None,
        }
    }
}

/// Failure class of a run, one exit code each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Configuration,
    Verification,
    Build,
    Readiness,
    Cancelled,
    Internal,
}

impl FailureCategory {
    pub fn exit_code(self) -> i32 {
        match self {
            FailureCategory::Internal => 1,
            FailureCategory::Configuration => 2,
            FailureCategory::Verification => 3,
            FailureCategory::Build => 4,
            FailureCategory::Readiness => 5,
            FailureCategory::Cancelled => 130,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCategory::Configuration => "configuration",
            FailureCategory::Verification => "verification",
            FailureCategory::Build => "build",
            FailureCategory::Readiness => "readiness",
            FailureCategory::Cancelled => "cancelled",
            FailureCategory::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}
