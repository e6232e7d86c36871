use super::cancel::Cancellation;
use super::report::{CacheEntry, RunReport};
use super::state::{RunState, Verdict};
use crate::build::{
    BuildBackend, BuildDriver, BuildReport, BuildRequest, DockerCliBackend, LocalCommandBackend,
    TransientMatcher,
};
use crate::cache::{BuildCacheState, BuildCacheStore, CacheDecision, CacheInvalidator};
use crate::config::ShipyardConfig;
use crate::error::{BuildError, OrchestrationError};
use crate::graph::{ServiceGraph, ServiceNode, ServiceStatus};
use crate::launch::{launcher_for, ServiceLauncher};
use crate::manifest::StackManifest;
use crate::profile::{DeploymentProfile, LaunchMode, ProfileOverrides, TargetResolver};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::readiness::{
    classify, PollReport, Prober, ReadinessCheck, ReadinessOutcome, ReadinessPoller, SystemProber,
};
use crate::verify::{ArtifactRequirement, ArtifactVerifier};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// When a service may be started relative to its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Start everything in order, then poll all services concurrently
    #[default]
    Started,
    /// Start wave by wave, only once every dependency is healthy
    Healthy,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub target: String,
    pub overrides: ProfileOverrides,
    pub force_rebuild: bool,
    pub skip_verification: bool,

    /// Limit the run to these services and their dependencies
    pub services: Vec<String>,

    /// Stop after Building
    pub build_only: bool,

    pub startup_policy: StartupPolicy,
}

/// Sequences one deployment run: resolve, verify, invalidate, build, start, poll.
pub struct Orchestrator {
    config: ShipyardConfig,
    backend: Option<Arc<dyn BuildBackend>>,
    launcher: Option<Arc<dyn ServiceLauncher>>,
    prober: Arc<dyn Prober>,
    store: Option<BuildCacheStore>,
    progress: Arc<dyn ProgressHandler>,
    cancel: Cancellation,
}

impl Orchestrator {
    /// Backend, launcher and cache location are picked per run from the
    /// target and manifest unless set explicitly.
    pub fn new(config: ShipyardConfig) -> Self {
        Self {
            config,
            backend: None,
            launcher: None,
            prober: Arc::new(SystemProber::new()),
            store: None,
            progress: Arc::new(NoOpHandler),
            cancel: Cancellation::new(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn BuildBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ServiceLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_store(mut self, store: BuildCacheStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    /// Runs to `Done`. Failures are reported in the returned report, never as a panic or `Err`.
    pub async fn run(&self, manifest: &StackManifest, options: &RunOptions) -> RunReport {
        let start = Instant::now();
        let mut report = RunReport::new(&options.target);
        let mut tracker = StateTracker::new(self.progress.as_ref());

        let result = self.execute(manifest, options, &mut report, &mut tracker).await;

        let verdict = if result.is_ok() {
            Verdict::Success
        } else {
            Verdict::Failure
        };
        tracker.advance(RunState::Done(verdict));

        if let Err(e) = &result {
            self.progress.on_progress(&ProgressEvent::Failed {
                error: e.to_string(),
            });
        }
        report.finish(result, start.elapsed());
        self.progress.on_progress(&ProgressEvent::RunComplete {
            success: report.success,
            duration: start.elapsed(),
        });
        report
    }

    fn checkpoint(&self, state: RunState) -> Result<(), OrchestrationError> {
        if self.cancel.is_cancelled() {
            warn!(state = %state, "Run cancelled");
            return Err(OrchestrationError::Cancelled {
                state: state.to_string(),
            });
        }
        Ok(())
    }

    async fn execute(
        &self,
        manifest: &StackManifest,
        options: &RunOptions,
        report: &mut RunReport,
        tracker: &mut StateTracker<'_>,
    ) -> Result<(), OrchestrationError> {
        // Resolving
        tracker.advance(RunState::Resolving);
        let transient = TransientMatcher::from_patterns(manifest.transient_failures.as_deref())?;
        manifest.readiness.validate()?;

        let profile = TargetResolver::new(manifest).resolve(&options.target, &options.overrides)?;
        report.target = profile.target.to_string();

        let full = manifest.service_graph()?;
        let mut graph = if options.services.is_empty() {
            full
        } else {
            full.closure(&options.services)?
        };
        if !options.build_only {
            profile.ensure_launchable(&graph)?;
        }
        let order: Vec<String> = graph.order().into_iter().map(String::from).collect();
        report.build_order = order.clone();
        snapshot(&graph, report);

        self.progress.on_progress(&ProgressEvent::RunStarted {
            target: report.target.clone(),
            services: graph.len(),
        });
        self.checkpoint(RunState::Resolving)?;

        // Verifying
        tracker.advance(RunState::Verifying);
        if options.skip_verification {
            warn!("Artifact verification skipped; builds may fail on missing files");
        } else {
            let requirements = ArtifactRequirement::collect(manifest, &profile, &graph);
            let verification = ArtifactVerifier::new(requirements).verify();
            self.progress.on_progress(&ProgressEvent::VerificationComplete {
                checked: verification.results.len(),
                missing: verification.failures.len(),
            });
            report.verification = verification.results.clone();
            if let Some(err) = verification.into_error() {
                return Err(err.into());
            }
        }
        self.checkpoint(RunState::Verifying)?;

        // Invalidating
        tracker.advance(RunState::Invalidating);
        let store = self
            .store
            .clone()
            .unwrap_or_else(|| BuildCacheStore::new(self.config.cache_dir(&manifest.root)));
        let decisions = self.invalidate(&graph, &order, &profile, &store, options, report);
        self.checkpoint(RunState::Invalidating)?;

        // Building
        tracker.advance(RunState::Building);
        let backend = self.backend.clone().unwrap_or_else(|| self.default_backend(&profile));
        let driver = BuildDriver::new(backend, transient);
        self.build_all(&driver, &mut graph, &profile, &decisions, &store, report)
            .await?;

        if options.build_only {
            info!("Build-only run, services not started");
            return Ok(());
        }

        // Starting / PollingReady
        tracker.advance(RunState::Starting);
        let launcher = self
            .launcher
            .clone()
            .unwrap_or_else(|| launcher_for(profile.target.launch_mode(), &self.config));
        let poller = ReadinessPoller::new(
            self.prober.clone(),
            manifest.readiness.clone(),
            self.config.probe_timeout(),
            self.cancel.clone(),
        );

        let outcomes = match options.startup_policy {
            StartupPolicy::Started => {
                self.start_then_poll(&graph, &order, &profile, launcher.as_ref(), &poller, tracker)
                    .await?
            }
            StartupPolicy::Healthy => {
                self.start_when_healthy(&graph, &profile, launcher.as_ref(), &poller, tracker)
                    .await?
            }
        };

        for outcome in &outcomes {
            graph.set_status(&outcome.service, outcome.status);
        }
        report.readiness = outcomes;
        snapshot(&graph, report);
        self.checkpoint(RunState::PollingReady)?;

        let not_ready: Vec<String> = report
            .readiness
            .iter()
            .filter(|o| !o.is_healthy())
            .map(|o| o.service.clone())
            .collect();
        if !not_ready.is_empty() {
            return Err(OrchestrationError::Readiness {
                services: not_ready,
            });
        }

        Ok(())
    }

    fn default_backend(&self, profile: &DeploymentProfile) -> Arc<dyn BuildBackend> {
        match profile.target.launch_mode() {
            LaunchMode::Process => Arc::new(LocalCommandBackend::new(self.config.build_timeout())),
            LaunchMode::Compose | LaunchMode::Kubectl => Arc::new(DockerCliBackend::new(
                &self.config.docker_program,
                self.config.build_timeout(),
            )),
        }
    }

    fn invalidate(
        &self,
        graph: &ServiceGraph,
        order: &[String],
        profile: &DeploymentProfile,
        store: &BuildCacheStore,
        options: &RunOptions,
        report: &mut RunReport,
    ) -> HashMap<String, CacheDecision> {
        let invalidator = CacheInvalidator::new(options.force_rebuild)
            .excluding(self.config.state_path(&profile.root))
            .excluding(store.dir());
        let mut decisions = HashMap::new();

        for id in order {
            let Some(node) = graph.node(id) else {
                continue;
            };
            let image = profile.image(id).unwrap_or(id.as_str());
            let stored = match store.load(id) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(service = %id, error = %e, "Ignoring unreadable cache record");
                    None
                }
            };

            let decision = invalidator.evaluate(node, image, stored.as_ref());
            self.progress.on_progress(&ProgressEvent::CacheEvaluated {
                service: id.clone(),
                use_cache: decision.use_cache,
                reason: decision.reason,
            });
            report.cache.push(CacheEntry {
                service: id.clone(),
                use_cache: decision.use_cache,
                reason: decision.reason,
            });
            decisions.insert(id.clone(), decision);
        }

        decisions
    }

    /// Builds wave by wave. Dependents of a failed build are skipped; unrelated
    /// services keep building. Fails with the first real build error in order.
    async fn build_all(
        &self,
        driver: &BuildDriver,
        graph: &mut ServiceGraph,
        profile: &DeploymentProfile,
        decisions: &HashMap<String, CacheDecision>,
        store: &BuildCacheStore,
        report: &mut RunReport,
    ) -> Result<(), OrchestrationError> {
        let levels: Vec<Vec<String>> = graph
            .levels()
            .into_iter()
            .map(|wave| wave.into_iter().map(String::from).collect())
            .collect();
        let total = graph.len();
        let mut index = 0;
        let mut reports: Vec<BuildReport> = Vec::new();

        for wave in levels {
            self.checkpoint(RunState::Building)?;

            let mut batch: Vec<(BuildRequest, bool)> = Vec::new();
            for id in &wave {
                let Some(node) = graph.node(id) else {
                    continue;
                };

                if let Some(dep) = failed_dependency(graph, node) {
                    warn!(service = %id, dependency = %dep, "Skipping build, dependency failed");
                    reports.push(BuildReport::skipped(id, &dep));
                    graph.set_status(id, ServiceStatus::Failed);
                    continue;
                }

                let decision = decisions.get(id);
                let use_cache = decision.map(|d| d.use_cache).unwrap_or(false);
                batch.push((
                    BuildRequest {
                        service: id.clone(),
                        context: node.context.clone(),
                        image: profile.image(id).unwrap_or(id.as_str()).to_string(),
                        build_args: node.build_args.clone(),
                        use_cache,
                        command: node.build_command.clone(),
                    },
                    use_cache,
                ));
            }

            for (request, _) in &batch {
                index += 1;
                graph.set_status(&request.service, ServiceStatus::Building);
                self.progress.on_progress(&ProgressEvent::BuildStarted {
                    service: request.service.clone(),
                    index,
                    total,
                });
            }

            let results: Vec<BuildReport> = stream::iter(batch.iter())
                .map(|(request, skip_if_present)| driver.build(request, *skip_if_present))
                .buffered(self.config.max_workers.max(1))
                .collect()
                .await;

            for result in results {
                self.progress.on_progress(&ProgressEvent::BuildComplete {
                    service: result.service.clone(),
                    status: result.status,
                    invoked: result.invoked,
                    attempts: result.attempts,
                    duration: std::time::Duration::from_millis(result.duration_ms),
                });
                graph.set_status(&result.service, result.status);

                let produced = result.invoked || result.shared_with.is_some();
                if result.succeeded() && produced {
                    persist(store, &result.service, decisions.get(&result.service));
                }
                reports.push(result);
            }
        }

        reports.sort_by_key(|r| {
            report
                .build_order
                .iter()
                .position(|id| id == &r.service)
                .unwrap_or(usize::MAX)
        });
        let failure = first_failure(&reports);
        report.builds = reports;
        snapshot(graph, report);

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn start_then_poll(
        &self,
        graph: &ServiceGraph,
        order: &[String],
        profile: &DeploymentProfile,
        launcher: &dyn ServiceLauncher,
        poller: &ReadinessPoller,
        tracker: &mut StateTracker<'_>,
    ) -> Result<Vec<ReadinessOutcome>, OrchestrationError> {
        let mut settled: HashMap<String, ReadinessOutcome> = HashMap::new();
        let mut started: Vec<(String, ReadinessCheck)> = Vec::new();

        for id in order {
            self.checkpoint(RunState::Starting)?;
            let Some(node) = graph.node(id) else {
                continue;
            };

            // Only services that were never started are settled this early
            if let Some(dep) = node.dependencies.iter().find(|d| settled.contains_key(*d)) {
                settled.insert(id.clone(), ReadinessOutcome::not_started(id, dep));
                continue;
            }

            match self.start_one(profile, node, launcher).await {
                Ok(()) => started.push((id.clone(), node.readiness.clone())),
                Err(outcome) => {
                    settled.insert(id.clone(), outcome);
                }
            }
        }

        tracker.advance(RunState::PollingReady);
        let polled = self
            .poll_many(graph, &started, profile, launcher, poller)
            .await;
        Ok(self.settle(graph, order, polled, settled))
    }

    async fn start_when_healthy(
        &self,
        graph: &ServiceGraph,
        profile: &DeploymentProfile,
        launcher: &dyn ServiceLauncher,
        poller: &ReadinessPoller,
        tracker: &mut StateTracker<'_>,
    ) -> Result<Vec<ReadinessOutcome>, OrchestrationError> {
        let mut outcomes: Vec<ReadinessOutcome> = Vec::new();
        let mut statuses: HashMap<String, ServiceStatus> = HashMap::new();

        for wave in graph.levels() {
            self.checkpoint(tracker.state())?;
            let mut settled: HashMap<String, ReadinessOutcome> = HashMap::new();
            let mut started: Vec<(String, ReadinessCheck)> = Vec::new();

            for id in &wave {
                let Some(node) = graph.node(id) else {
                    continue;
                };
                let blocked = node
                    .dependencies
                    .iter()
                    .find(|d| statuses.get(*d) != Some(&ServiceStatus::Healthy));
                if let Some(dep) = blocked {
                    info!(service = %id, dependency = %dep, "Not starting, dependency not healthy");
                    settled.insert(id.to_string(), ReadinessOutcome::not_started(id, dep));
                    continue;
                }

                match self.start_one(profile, node, launcher).await {
                    Ok(()) => started.push((id.to_string(), node.readiness.clone())),
                    Err(outcome) => {
                        settled.insert(id.to_string(), outcome);
                    }
                }
            }

            if tracker.state() == RunState::Starting {
                tracker.advance(RunState::PollingReady);
            }
            let polled = self
                .poll_many(graph, &started, profile, launcher, poller)
                .await;
            let wave_order: Vec<String> = wave.iter().map(|id| id.to_string()).collect();
            let wave_outcomes =
                self.settle_with(graph, &wave_order, polled, settled, &mut statuses);
            outcomes.extend(wave_outcomes);
        }

        if tracker.state() == RunState::Starting {
            tracker.advance(RunState::PollingReady);
        }
        Ok(outcomes)
    }

    async fn start_one(
        &self,
        profile: &DeploymentProfile,
        node: &ServiceNode,
        launcher: &dyn ServiceLauncher,
    ) -> Result<(), ReadinessOutcome> {
        match launcher.start(profile, node).await {
            Ok(()) => {
                self.progress.on_progress(&ProgressEvent::ServiceStarted {
                    service: node.id.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.progress.on_progress(&ProgressEvent::ServiceStartFailed {
                    service: node.id.clone(),
                    error: e.to_string(),
                });
                Err(ReadinessOutcome::start_failed(&e))
            }
        }
    }

    async fn poll_many(
        &self,
        graph: &ServiceGraph,
        started: &[(String, ReadinessCheck)],
        profile: &DeploymentProfile,
        launcher: &dyn ServiceLauncher,
        poller: &ReadinessPoller,
    ) -> HashMap<String, PollReport> {
        stream::iter(
            started
                .iter()
                .filter_map(|(id, check)| graph.node(id).map(|node| (node, check))),
        )
        .map(|(node, check)| poll_one(node, check, profile, launcher, poller))
        .buffer_unordered(self.config.max_workers.max(1))
        .map(|report| (report.service.clone(), report))
        .collect()
        .await
    }

    fn settle(
        &self,
        graph: &ServiceGraph,
        order: &[String],
        polled: HashMap<String, PollReport>,
        settled: HashMap<String, ReadinessOutcome>,
    ) -> Vec<ReadinessOutcome> {
        let mut statuses = HashMap::new();
        self.settle_with(graph, order, polled, settled, &mut statuses)
    }

    /// Classifies in graph order so every dependency is final before its dependents.
    fn settle_with(
        &self,
        graph: &ServiceGraph,
        order: &[String],
        mut polled: HashMap<String, PollReport>,
        mut settled: HashMap<String, ReadinessOutcome>,
        statuses: &mut HashMap<String, ServiceStatus>,
    ) -> Vec<ReadinessOutcome> {
        let mut outcomes = Vec::new();

        for id in order {
            let Some(node) = graph.node(id) else {
                continue;
            };

            let outcome = match (settled.remove(id), polled.remove(id)) {
                (Some(outcome), _) => outcome,
                (None, Some(poll)) => {
                    let deps: Vec<ServiceStatus> = node
                        .dependencies
                        .iter()
                        .map(|d| statuses.get(d).copied().unwrap_or(ServiceStatus::Failed))
                        .collect();
                    classify(&poll, &deps)
                }
                (None, None) => continue,
            };

            match outcome.error() {
                Some(err) => warn!(service = %id, status = %outcome.status, "{}", err),
                None => debug!(service = %id, status = %outcome.status, "Readiness classified"),
            }
            self.progress.on_progress(&ProgressEvent::ReadinessResolved {
                service: id.clone(),
                status: outcome.status,
                attempts: outcome.attempts,
            });
            statuses.insert(id.clone(), outcome.status);
            outcomes.push(outcome);
        }

        outcomes
    }
}

/// Liveness is queried before probing; a service without a probe is judged on
/// liveness alone.
async fn poll_one(
    node: &ServiceNode,
    check: &ReadinessCheck,
    profile: &DeploymentProfile,
    launcher: &dyn ServiceLauncher,
    poller: &ReadinessPoller,
) -> PollReport {
    let running = launcher.is_running(profile, node).await;
    if matches!(check, ReadinessCheck::None) {
        debug!(service = %node.id, running, "No readiness check declared");
        return PollReport::liveness(&node.id, running);
    }

    let report = poller.poll(&node.id, check).await;
    if report.healthy {
        return report;
    }
    // The process may have exited while it was being probed
    let running = running && launcher.is_running(profile, node).await;
    report.with_running(running)
}

struct StateTracker<'a> {
    progress: &'a dyn ProgressHandler,
    state: Option<RunState>,
    since: Instant,
}

impl<'a> StateTracker<'a> {
    fn new(progress: &'a dyn ProgressHandler) -> Self {
        Self {
            progress,
            state: None,
            since: Instant::now(),
        }
    }

    fn state(&self) -> RunState {
        self.state.unwrap_or(RunState::Resolving)
    }

    fn advance(&mut self, next: RunState) {
        if let Some(current) = self.state {
            if !current.can_transition_to(next) {
                warn!(from = %current, to = %next, "Ignoring invalid state transition");
                return;
            }
            if !next.is_terminal() {
                self.progress.on_progress(&ProgressEvent::StateComplete {
                    state: current,
                    duration: self.since.elapsed(),
                });
            }
        }
        debug!(state = %next, "Run state");
        self.state = Some(next);
        self.since = Instant::now();
        self.progress
            .on_progress(&ProgressEvent::StateEntered { state: next });
    }
}

fn snapshot(graph: &ServiceGraph, report: &mut RunReport) {
    report.services = graph.nodes().map(|n| (n.id.clone(), n.status)).collect();
}

fn failed_dependency(graph: &ServiceGraph, node: &ServiceNode) -> Option<String> {
    node.dependencies
        .iter()
        .find(|d| graph.status(d) == Some(ServiceStatus::Failed))
        .cloned()
}

fn first_failure(reports: &[BuildReport]) -> Option<BuildError> {
    let failures: Vec<&BuildError> = reports.iter().filter_map(|r| r.failure.as_ref()).collect();
    failures
        .iter()
        .find(|e| !matches!(e, BuildError::DependencyFailed { .. }))
        .or(failures.first())
        .map(|e| (*e).clone())
}

fn persist(store: &BuildCacheStore, service: &str, decision: Option<&CacheDecision>) {
    let Some(fingerprint) = decision.and_then(|d| d.fingerprint.clone()) else {
        debug!(service, "No fingerprint to persist");
        return;
    };

    let state = BuildCacheState {
        service: service.to_string(),
        fingerprint,
        last_built_at: Utc::now(),
    };
    if let Err(e) = store.save(&state) {
        warn!(service, error = %e, "Failed to persist build cache state");
    }
}
