//! Build backend interface and implementations
//!
//! The orchestrator treats the backend as an opaque capability: given a
//! context, image reference, build args and a use-cache flag it returns an
//! exit status and the combined log.

use crate::error::BuildError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub service: String,
    pub context: PathBuf,
    pub image: String,
    pub build_args: BTreeMap<String, String>,
    pub use_cache: bool,

    /// Build command for backends that run a command instead of an image build
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub exit_code: Option<i32>,
    pub log: String,
}

impl BuildOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Runs one build. `Err` only when the backend could not be run at all.
    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput, BuildError>;

    /// Whether the image produced by an earlier build is still available.
    async fn image_exists(&self, image: &str) -> bool;
}

/// `docker build` through the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCliBackend {
    program: String,
    timeout: Duration,
}

impl DockerCliBackend {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec!["build".to_string(), "-t".to_string(), request.image.clone()];
        if !request.use_cache {
            args.push("--no-cache".to_string());
        }
        for (key, value) in &request.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(request.context.display().to_string());
        args
    }
}

#[async_trait]
impl BuildBackend for DockerCliBackend {
    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput, BuildError> {
        let args = Self::build_args(request);
        debug!(service = %request.service, command = %format!("{} {}", self.program, args.join(" ")), "Invoking build backend");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .env("DOCKER_BUILDKIT", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        run_with_timeout(command, &request.service, self.timeout).await
    }

    async fn image_exists(&self, image: &str) -> bool {
        let status = Command::new(&self.program)
            .args(["image", "inspect", image])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        matches!(status, Ok(s) if s.success())
    }
}

/// Runs the service's `build_command` inside its context, for bare local processes.
#[derive(Debug, Clone)]
pub struct LocalCommandBackend {
    timeout: Duration,
}

impl LocalCommandBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl BuildBackend for LocalCommandBackend {
    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput, BuildError> {
        let Some((program, args)) = request.command.as_ref().and_then(|c| c.split_first()) else {
            debug!(service = %request.service, "No build command, nothing to build");
            return Ok(BuildOutput {
                exit_code: Some(0),
                log: String::new(),
            });
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&request.context)
            .envs(&request.build_args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        run_with_timeout(command, &request.service, self.timeout).await
    }

    async fn image_exists(&self, _image: &str) -> bool {
        true
    }
}

async fn run_with_timeout(
    mut command: Command,
    service: &str,
    timeout: Duration,
) -> Result<BuildOutput, BuildError> {
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| BuildError::Timeout {
            service: service.to_string(),
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| BuildError::Spawn {
            service: service.to_string(),
            message: e.to_string(),
        })?;

    let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
    log.push_str(&String::from_utf8_lossy(&output.stderr));
    trace!(service, bytes = log.len(), "Captured build output");

    Ok(BuildOutput {
        exit_code: output.status.code(),
        log,
    })
}
