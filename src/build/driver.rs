use super::backend::{BuildBackend, BuildOutput, BuildRequest};
use crate::error::{BuildError, ConfigurationError};
use crate::graph::ServiceStatus;
use regex::RegexSet;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

/// Signatures of network fetch failures that are worth one automatic retry.
pub const DEFAULT_TRANSIENT_PATTERNS: &[&str] = &[
    r"network\s+timeout",
    r"ETIMEDOUT",
    r"ESOCKETTIMEDOUT",
    r"ECONNRESET",
    r"i/o timeout",
    r"TLS handshake timeout",
    r"connection reset by peer",
    r"temporary failure in name resolution",
    r"could not resolve host",
    r"unexpected EOF",
    r"503 Service Unavailable",
];

#[derive(Debug, Clone)]
pub struct TransientMatcher {
    set: RegexSet,
}

impl TransientMatcher {
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| format!("(?i){}", p.as_ref()))
            .collect();
        let set = RegexSet::new(&patterns).map_err(|e| ConfigurationError::InvalidSetting {
            field: "transient_failures".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { set })
    }

    /// Manifest-declared patterns replace the defaults entirely.
    pub fn from_patterns(patterns: Option<&[String]>) -> Result<Self, ConfigurationError> {
        match patterns {
            Some(patterns) => Self::new(patterns),
            None => Self::new(DEFAULT_TRANSIENT_PATTERNS.iter().copied()),
        }
    }

    pub fn matches(&self, log: &str) -> bool {
        self.set.is_match(log)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub service: String,
    pub status: ServiceStatus,

    /// Whether the build backend ran for this service in this run
    pub invoked: bool,

    pub use_cache: bool,
    pub attempts: u32,
    pub duration_ms: u64,

    /// Service whose identical build this one reused, when the context was shared
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip)]
    pub failure: Option<BuildError>,
}

impl BuildReport {
    pub fn skipped(service: &str, dependency: &str) -> Self {
        let failure = BuildError::DependencyFailed {
            service: service.to_string(),
            dependency: dependency.to_string(),
        };
        Self {
            service: service.to_string(),
            status: ServiceStatus::Failed,
            invoked: false,
            use_cache: false,
            attempts: 0,
            duration_ms: 0,
            shared_with: None,
            error: Some(failure.to_string()),
            failure: Some(failure),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ServiceStatus::Built
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BuildKey {
    context: PathBuf,
    image: String,
    build_args: BTreeMap<String, String>,
}

type ContextSlot = Arc<tokio::sync::Mutex<HashMap<BuildKey, BuildReport>>>;

/// Drives the external build backend for one service at a time.
///
/// Builds of the same context path never overlap, and an identical request
/// (same context, image and args) is only built once per driver.
pub struct BuildDriver {
    backend: Arc<dyn BuildBackend>,
    transient: TransientMatcher,
    contexts: Mutex<HashMap<PathBuf, ContextSlot>>,
}

impl BuildDriver {
    pub fn new(backend: Arc<dyn BuildBackend>, transient: TransientMatcher) -> Self {
        Self {
            backend,
            transient,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, context: &Path) -> ContextSlot {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.entry(context.to_path_buf()).or_default().clone()
    }

    /// Builds one service. When `skip_if_present` is set and the backend still
    /// has the image, nothing is invoked.
    pub async fn build(&self, request: &BuildRequest, skip_if_present: bool) -> BuildReport {
        let start = Instant::now();
        let slot = self.slot(&request.context);
        let mut finished = slot.lock().await;

        let key = BuildKey {
            context: request.context.clone(),
            image: request.image.clone(),
            build_args: request.build_args.clone(),
        };

        if let Some(previous) = finished.get(&key) {
            info!(service = %request.service, shared_with = %previous.service, "Reusing build of shared context");
            let mut report = previous.clone();
            report.shared_with = Some(previous.service.clone());
            report.service = request.service.clone();
            report.invoked = false;
            report.attempts = 0;
            report.duration_ms = 0;
            return report;
        }

        if skip_if_present && self.backend.image_exists(&request.image).await {
            info!(service = %request.service, image = %request.image, "Build cache valid, skipping build");
            let report = BuildReport {
                service: request.service.clone(),
                status: ServiceStatus::Built,
                invoked: false,
                use_cache: true,
                attempts: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                shared_with: None,
                error: None,
                failure: None,
            };
            finished.insert(key, report.clone());
            return report;
        }

        let (attempts, result) = self.build_with_retry(request).await;
        let report = BuildReport {
            service: request.service.clone(),
            status: if result.is_ok() {
                ServiceStatus::Built
            } else {
                ServiceStatus::Failed
            },
            invoked: true,
            use_cache: request.use_cache,
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
            shared_with: None,
            error: result.as_ref().err().map(|e| e.to_string()),
            failure: result.err(),
        };

        finished.insert(key, report.clone());
        report
    }

    async fn build_with_retry(&self, request: &BuildRequest) -> (u32, Result<(), BuildError>) {
        let mut attempt = 1;
        loop {
            info!(service = %request.service, attempt, use_cache = request.use_cache, "Building");
            let output = match self.backend.build(request).await {
                Ok(output) => output,
                Err(e) => return (attempt, Err(e)),
            };

            if output.success() {
                info!(service = %request.service, attempt, "Build succeeded");
                return (attempt, Ok(()));
            }

            if attempt == 1 && self.transient.matches(&output.log) {
                warn!(
                    service = %request.service,
                    exit_code = ?output.exit_code,
                    "Build failed with a transient network error, retrying once"
                );
                attempt += 1;
                continue;
            }

            return (attempt, Err(failure(request, output)));
        }
    }
}

fn failure(request: &BuildRequest, output: BuildOutput) -> BuildError {
    BuildError::Failed {
        service: request.service.clone(),
        exit_code: output.exit_code,
        output: output.log,
    }
}
