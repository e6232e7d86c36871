//! Service start interface
//!
//! Starting a service is delegated to whatever runs it on the target: docker
//! compose, kubectl, or a plain child process for `local`. Launchers only
//! start and observe; readiness is judged by the poller.

use crate::config::ShipyardConfig;
use crate::error::ReadinessError;
use crate::graph::ServiceNode;
use crate::profile::{DeploymentProfile, LaunchMode};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    async fn start(&self, profile: &DeploymentProfile, node: &ServiceNode)
        -> Result<(), ReadinessError>;

    /// Best-effort liveness query, used for diagnostics after polling gives up.
    async fn is_running(&self, profile: &DeploymentProfile, node: &ServiceNode) -> bool;
}

pub fn launcher_for(mode: LaunchMode, config: &ShipyardConfig) -> Arc<dyn ServiceLauncher> {
    match mode {
        LaunchMode::Process => Arc::new(ProcessLauncher::new()),
        LaunchMode::Compose => Arc::new(ComposeLauncher::new(&config.docker_program)),
        LaunchMode::Kubectl => Arc::new(KubectlLauncher::new(&config.kubectl_program)),
    }
}

fn start_failed(node: &ServiceNode, message: impl Into<String>) -> ReadinessError {
    ReadinessError::StartFailed {
        service: node.id.clone(),
        message: message.into(),
    }
}

async fn run_checked(mut command: Command, node: &ServiceNode) -> Result<String, ReadinessError> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| start_failed(node, e.to_string()))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr
            .lines()
            .filter(|l| !l.trim().is_empty())
            .last()
            .unwrap_or("no output")
            .trim()
            .to_string();
        Err(start_failed(
            node,
            format!("exited with {:?}: {}", output.status.code(), detail),
        ))
    }
}

/// `docker compose up -d <service>` against the profile's compose files.
#[derive(Debug, Clone)]
pub struct ComposeLauncher {
    program: String,
}

impl ComposeLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn base_args(profile: &DeploymentProfile) -> Vec<String> {
        let mut args = vec!["compose".to_string()];
        for file in &profile.files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        args
    }

    pub fn up_args(profile: &DeploymentProfile, service: &str) -> Vec<String> {
        let mut args = Self::base_args(profile);
        args.extend(["up", "-d", "--no-build", "--no-deps", service].map(String::from));
        args
    }

    fn command(&self, profile: &DeploymentProfile, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .current_dir(&profile.root)
            .envs(profile.launch_env());
        command
    }
}

#[async_trait]
impl ServiceLauncher for ComposeLauncher {
    async fn start(
        &self,
        profile: &DeploymentProfile,
        node: &ServiceNode,
    ) -> Result<(), ReadinessError> {
        let args = Self::up_args(profile, &node.id);
        debug!(service = %node.id, command = %format!("{} {}", self.program, args.join(" ")), "Starting service");
        run_checked(self.command(profile, &args), node).await?;
        info!(service = %node.id, "Service started");
        Ok(())
    }

    async fn is_running(&self, profile: &DeploymentProfile, node: &ServiceNode) -> bool {
        let mut args = Self::base_args(profile);
        args.extend(["ps", "--status", "running", "-q", node.id.as_str()].map(String::from));
        match run_checked(self.command(profile, &args), node).await {
            Ok(stdout) => !stdout.trim().is_empty(),
            Err(_) => false,
        }
    }
}

/// Applies the profile's manifests once, then restarts each service's deployment.
pub struct KubectlLauncher {
    program: String,
    applied: OnceCell<()>,
}

impl KubectlLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            applied: OnceCell::new(),
        }
    }

    pub fn apply_args(profile: &DeploymentProfile) -> Vec<String> {
        let mut args = vec!["apply".to_string()];
        for file in &profile.files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        args
    }

    fn command(&self, profile: &DeploymentProfile, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .current_dir(&profile.root)
            .envs(profile.launch_env());
        command
    }
}

#[async_trait]
impl ServiceLauncher for KubectlLauncher {
    async fn start(
        &self,
        profile: &DeploymentProfile,
        node: &ServiceNode,
    ) -> Result<(), ReadinessError> {
        self.applied
            .get_or_try_init(|| async {
                let args = Self::apply_args(profile);
                info!(files = profile.files.len(), "Applying kubernetes manifests");
                run_checked(self.command(profile, &args), node).await.map(|_| ())
            })
            .await?;

        let args = vec![
            "rollout".to_string(),
            "restart".to_string(),
            format!("deployment/{}", node.id),
        ];
        run_checked(self.command(profile, &args), node).await?;
        info!(service = %node.id, "Rollout started");
        Ok(())
    }

    async fn is_running(&self, profile: &DeploymentProfile, node: &ServiceNode) -> bool {
        let args = vec![
            "get".to_string(),
            format!("deployment/{}", node.id),
            "-o".to_string(),
            "jsonpath={.status.availableReplicas}".to_string(),
        ];
        match run_checked(self.command(profile, &args), node).await {
            Ok(stdout) => stdout.trim().parse::<u32>().map(|n| n > 0).unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Runs each service's `command` as a detached child process in its context.
#[derive(Default)]
pub struct ProcessLauncher {
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceLauncher for ProcessLauncher {
    async fn start(
        &self,
        profile: &DeploymentProfile,
        node: &ServiceNode,
    ) -> Result<(), ReadinessError> {
        let Some((program, args)) = node.command.as_ref().and_then(|c| c.split_first()) else {
            return Err(start_failed(node, "no command declared"));
        };

        let cwd = profile
            .context(&node.id)
            .cloned()
            .unwrap_or_else(|| node.context.clone());

        let child = Command::new(program)
            .args(args)
            .current_dir(&cwd)
            .envs(profile.launch_env())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| start_failed(node, format!("failed to spawn {}: {}", program, e)))?;

        info!(service = %node.id, pid = child.id(), "Process started");
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node.id.clone(), child);
        Ok(())
    }

    async fn is_running(&self, _profile: &DeploymentProfile, node: &ServiceNode) -> bool {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        match children.get_mut(&node.id) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Target;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn profile(files: &[&str]) -> DeploymentProfile {
        DeploymentProfile {
            target: Target::DockerDev,
            root: PathBuf::from("/srv/stack"),
            registry: None,
            files: files.iter().map(PathBuf::from).collect(),
            contexts: BTreeMap::new(),
            images: BTreeMap::from([("backend".to_string(), "backend:latest".to_string())]),
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_compose_up_args() {
        let profile = profile(&["docker-compose.yml", "docker-compose.dev.yml"]);
        assert_eq!(
            ComposeLauncher::up_args(&profile, "backend"),
            vec![
                "compose",
                "-f",
                "docker-compose.yml",
                "-f",
                "docker-compose.dev.yml",
                "up",
                "-d",
                "--no-build",
                "--no-deps",
                "backend",
            ]
        );
    }

    #[test]
    fn test_kubectl_apply_args() {
        let profile = profile(&["k8s"]);
        assert_eq!(KubectlLauncher::apply_args(&profile), vec!["apply", "-f", "k8s"]);
    }

    #[tokio::test]
    async fn test_process_launcher_requires_command() {
        let node = ServiceNode::new("backend", "/srv/stack/backend", &[]);
        let err = ProcessLauncher::new()
            .start(&profile(&[]), &node)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::StartFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_launcher_tracks_child() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut node = ServiceNode::new("worker", dir.path(), &[]);
        node.command = Some(vec!["sleep".to_string(), "5".to_string()]);

        let launcher = ProcessLauncher::new();
        let profile = profile(&[]);
        launcher.start(&profile, &node).await.unwrap();
        assert!(launcher.is_running(&profile, &node).await);

        if let Some(child) = launcher.children.lock().unwrap().get_mut("worker") {
            child.start_kill().unwrap();
        };
    }

    #[tokio::test]
    async fn test_unknown_service_not_running() {
        let node = ServiceNode::new("ghost", "/nowhere", &[]);
        assert!(!ProcessLauncher::new().is_running(&profile(&[]), &node).await);
    }
}
