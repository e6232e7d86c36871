//! Artifact verification
//!
//! Confirms every file a build depends on is present and non-empty before any
//! build is attempted. Artifacts declared with `derive_from` are copied from
//! their canonical source once when absent (e.g. a shared `nginx.conf` that
//! has to live inside the frontend build context) and then re-checked.

use crate::error::VerificationError;
use crate::graph::ServiceGraph;
use crate::manifest::StackManifest;
use crate::profile::DeploymentProfile;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRequirement {
    pub service: String,
    pub path: PathBuf,
    pub derive_from: Option<PathBuf>,
    pub is_dir: bool,
}

impl ArtifactRequirement {
    pub fn file(service: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            service: service.to_string(),
            path: path.into(),
            derive_from: None,
            is_dir: false,
        }
    }

    pub fn derivable(service: &str, path: impl Into<PathBuf>, from: impl Into<PathBuf>) -> Self {
        Self {
            derive_from: Some(from.into()),
            ..Self::file(service, path)
        }
    }

    pub fn directory(service: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            is_dir: true,
            ..Self::file(service, path)
        }
    }

    /// Context directories plus declared artifacts for every service in `graph`.
    pub fn collect(
        manifest: &StackManifest,
        profile: &DeploymentProfile,
        graph: &ServiceGraph,
    ) -> Vec<Self> {
        let mut requirements = Vec::new();
        for id in graph.order() {
            let Some(context) = profile.context(id) else {
                continue;
            };
            requirements.push(Self::directory(id, context));

            if let Some(decl) = manifest.service(id) {
                for artifact in &decl.artifacts {
                    let path = context.join(&artifact.path);
                    requirements.push(match &artifact.derive_from {
                        Some(from) => Self::derivable(id, path, manifest.resolve_path(from)),
                        None => Self::file(id, path),
                    });
                }
            }
        }
        requirements
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub service: String,
    pub path: PathBuf,
    pub expected_present: bool,
    pub actual_present: bool,
    pub derived: bool,
}

#[derive(Debug, Default)]
pub struct VerificationReport {
    pub results: Vec<VerificationResult>,
    pub failures: Vec<VerificationError>,
}

impl VerificationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The first failure in declaration order, if any.
    pub fn into_error(self) -> Option<VerificationError> {
        self.failures.into_iter().next()
    }
}

pub struct ArtifactVerifier {
    requirements: Vec<ArtifactRequirement>,
}

impl ArtifactVerifier {
    pub fn new(requirements: Vec<ArtifactRequirement>) -> Self {
        Self { requirements }
    }

    pub fn verify(&self) -> VerificationReport {
        let mut report = VerificationReport::default();

        for req in &self.requirements {
            let mut present = is_present(&req.path, req.is_dir);
            let mut derived = false;

            if !present {
                if let Some(from) = &req.derive_from {
                    if is_present(from, false) {
                        match derive(&req.path, from) {
                            Ok(()) => {
                                info!(
                                    artifact = %req.path.display(),
                                    source = %from.display(),
                                    "Derived missing artifact"
                                );
                                derived = true;
                                present = is_present(&req.path, false);
                            }
                            Err(source) => {
                                warn!(artifact = %req.path.display(), error = %source, "Failed to derive artifact");
                                report.failures.push(VerificationError::DeriveFailed {
                                    path: req.path.clone(),
                                    from: from.clone(),
                                    source,
                                });
                                report.results.push(result(req, false, false));
                                continue;
                            }
                        }
                    } else {
                        debug!(source = %from.display(), "Derivation source is missing too");
                    }
                }
            }

            if !present {
                warn!(service = %req.service, artifact = %req.path.display(), "Missing required artifact");
                report.failures.push(VerificationError::MissingArtifact {
                    path: req.path.clone(),
                });
            }

            report.results.push(result(req, present, derived));
        }

        info!(
            checked = report.results.len(),
            missing = report.failures.len(),
            "Artifact verification complete"
        );
        report
    }
}

fn result(req: &ArtifactRequirement, present: bool, derived: bool) -> VerificationResult {
    VerificationResult {
        service: req.service.clone(),
        path: req.path.clone(),
        expected_present: true,
        actual_present: present,
        derived,
    }
}

fn is_present(path: &Path, is_dir: bool) -> bool {
    match fs::metadata(path) {
        Ok(meta) if is_dir => {
            meta.is_dir()
                && fs::read_dir(path)
                    .map(|mut entries| entries.next().is_some())
                    .unwrap_or(false)
        }
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

fn derive(path: &Path, from: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, path).map(|_| ())
}
