//! Shared fixtures for orchestrator and CLI tests: an on-disk stack in a temp
//! directory plus scripted build, launch and probe backends.

#![allow(dead_code)]

use async_trait::async_trait;
use shipyard::build::{BuildBackend, BuildOutput, BuildRequest};
use shipyard::graph::ServiceNode;
use shipyard::launch::ServiceLauncher;
use shipyard::profile::DeploymentProfile;
use shipyard::readiness::{ProbeResult, Prober, ReadinessCheck};
use shipyard::{BuildError, Orchestrator, ReadinessError, ShipyardConfig, StackManifest};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const FOUR_SERVICE_STACK: &str = r#"
tag: v1
readiness:
  max_attempts: 2
  backoff: fixed
  initial_delay_ms: 1
  max_delay_ms: 1
services:
  - name: database
    context: database
    readiness:
      tcp: { host: database, port: 5432 }
  - name: backend
    context: backend
    depends_on: [database]
    readiness:
      tcp: { host: backend, port: 8000 }
    artifacts:
      - path: requirements.txt
  - name: frontend
    context: frontend
    depends_on: [backend]
    readiness:
      tcp: { host: frontend, port: 3000 }
    artifacts:
      - path: nginx.conf
        derive_from: shared/nginx.conf
  - name: cache
    context: cache
    readiness:
      tcp: { host: cache, port: 6379 }
targets:
  docker-prod:
    registry: registry.example.com/stack
    env:
      DATABASE_URL: { required: true }
"#;

/// A stack laid out on disk: `shipyard.yaml`, one context per service and a
/// `shared/` directory holding derivable sources.
pub struct StackFixture {
    dir: TempDir,
}

impl StackFixture {
    pub fn new(manifest: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(dir.path().join("shipyard.yaml"), manifest).expect("Failed to write manifest");
        Self { dir }
    }

    /// The four-service stack with every context and artifact in place.
    pub fn four_services() -> Self {
        let fixture = Self::new(FOUR_SERVICE_STACK);
        for service in ["database", "backend", "frontend", "cache"] {
            fixture.write(
                &format!("{}/Dockerfile", service),
                &format!("FROM alpine\nLABEL service={}\n", service),
            );
        }
        fixture.write("backend/requirements.txt", "fastapi==0.110\n");
        fixture.write("shared/nginx.conf", "server { listen 80; }\n");
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root().join("shipyard.yaml")
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(path, content).expect("Failed to write fixture file");
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.root().join(relative)).expect("Failed to remove fixture file");
    }

    pub fn manifest(&self) -> StackManifest {
        StackManifest::load(&self.manifest_path()).expect("Failed to load manifest")
    }

    pub fn config(&self) -> ShipyardConfig {
        ShipyardConfig {
            state_dir: self.root().join(".shipyard"),
            manifest: self.manifest_path(),
            max_workers: 4,
            build_timeout_secs: 30,
            probe_timeout_secs: 1,
            log_level: "debug".to_string(),
            docker_program: "docker".to_string(),
            kubectl_program: "kubectl".to_string(),
        }
    }

    pub fn orchestrator(
        &self,
        backend: &Arc<RecordingBackend>,
        launcher: &Arc<ScriptedLauncher>,
        prober: &Arc<ScriptedProber>,
    ) -> Orchestrator {
        Orchestrator::new(self.config())
            .with_backend(backend.clone())
            .with_launcher(launcher.clone())
            .with_prober(prober.clone())
    }
}

/// Build backend that records every invocation and remembers produced images.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BuildRequest>>,
    images: Mutex<HashSet<String>>,
    scripted: Mutex<HashMap<String, VecDeque<BuildOutput>>>,
    delay: Option<Duration>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Queue an output for the next build of `service`; unscripted builds succeed.
    pub fn script(&self, service: &str, exit_code: i32, log: &str) {
        self.scripted
            .lock()
            .unwrap()
            .entry(service.to_string())
            .or_default()
            .push_back(BuildOutput {
                exit_code: Some(exit_code),
                log: log.to_string(),
            });
    }

    pub fn invocations(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn invocations_for(&self, service: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.service == service)
            .count()
    }

    pub fn built_services(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.service.clone())
            .collect()
    }

    pub fn last_request(&self, service: &str) -> Option<BuildRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.service == service)
            .cloned()
    }

    pub fn forget_images(&self) {
        self.images.lock().unwrap().clear();
    }
}

#[async_trait]
impl BuildBackend for RecordingBackend {
    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput, BuildError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let output = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&request.service)
            .and_then(VecDeque::pop_front)
            .unwrap_or(BuildOutput {
                exit_code: Some(0),
                log: "built".to_string(),
            });

        if output.success() {
            self.images.lock().unwrap().insert(request.image.clone());
        }
        Ok(output)
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.images.lock().unwrap().contains(image)
    }
}

/// Launcher that records start order and can be told to fail or report a
/// service as not running.
#[derive(Default)]
pub struct ScriptedLauncher {
    started: Mutex<Vec<String>>,
    fail_start: Mutex<HashSet<String>>,
    not_running: Mutex<HashSet<String>>,
}

impl ScriptedLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_start(&self, service: &str) {
        self.fail_start.lock().unwrap().insert(service.to_string());
    }

    pub fn mark_not_running(&self, service: &str) {
        self.not_running.lock().unwrap().insert(service.to_string());
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceLauncher for ScriptedLauncher {
    async fn start(
        &self,
        _profile: &DeploymentProfile,
        node: &ServiceNode,
    ) -> Result<(), ReadinessError> {
        if self.fail_start.lock().unwrap().contains(&node.id) {
            return Err(ReadinessError::StartFailed {
                service: node.id.clone(),
                message: "container exited with code 1".to_string(),
            });
        }
        self.started.lock().unwrap().push(node.id.clone());
        Ok(())
    }

    async fn is_running(&self, _profile: &DeploymentProfile, node: &ServiceNode) -> bool {
        !self.not_running.lock().unwrap().contains(&node.id)
    }
}

/// Prober keyed by the TCP host of each check. Hosts marked unhealthy never
/// pass; everything else passes on the first attempt.
#[derive(Default)]
pub struct ScriptedProber {
    unhealthy: Mutex<HashSet<String>>,
    probes: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unhealthy(&self, host: &str) {
        self.unhealthy.lock().unwrap().insert(host.to_string());
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, check: &ReadinessCheck, _timeout: Duration) -> ProbeResult {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match check {
            ReadinessCheck::Tcp { host, port } if self.unhealthy.lock().unwrap().contains(host) => {
                ProbeResult::unhealthy(format!("connection refused: {}:{}", host, port))
            }
            _ => ProbeResult::healthy(),
        }
    }
}

/// Path to the compiled `shipyard` binary.
pub fn shipyard_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_shipyard"))
}
