//! Stack manifest: the static description of a deployable stack
//!
//! The manifest (`shipyard.yaml` by default) declares every service, its build
//! context, dependencies, readiness check and required artifacts, plus
//! per-target overrides. Paths are relative to the directory holding the
//! manifest.
//!
//! ```yaml
//! tag: latest
//! services:
//!   - name: database
//!     context: services/database
//!     readiness:
//!       tcp: { host: localhost, port: 5432 }
//!   - name: backend
//!     context: backend
//!     depends_on: [database]
//!     artifacts:
//!       - path: requirements.txt
//!   - name: frontend
//!     context: frontend
//!     depends_on: [backend]
//!     artifacts:
//!       - path: yarn.lock
//!       - path: nginx.conf
//!         derive_from: nginx/nginx.conf
//! targets:
//!   docker-prod:
//!     registry: registry.example.com/stack
//!     env:
//!       DATABASE_URL: { required: true }
//!       LOG_LEVEL: info
//! ```

use crate::error::ConfigurationError;
use crate::graph::{ServiceGraph, ServiceNode, ServiceStatus};
use crate::profile::Target;
use crate::readiness::{PollSettings, ReadinessCheck};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_MANIFEST_FILE: &str = "shipyard.yaml";
const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackManifest {
    /// Directory the manifest was loaded from; all relative paths resolve here
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default = "default_tag")]
    pub tag: String,

    pub services: Vec<ServiceDecl>,

    #[serde(default)]
    pub targets: BTreeMap<String, TargetDecl>,

    /// Regexes matched against build output to recognise transient failures
    #[serde(default)]
    pub transient_failures: Option<Vec<String>>,

    #[serde(default)]
    pub readiness: PollSettings,
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDecl {
    pub name: String,
    pub context: PathBuf,

    /// Image name without registry or tag; defaults to the service name
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub build_args: BTreeMap<String, String>,

    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub readiness: ReadinessCheck,

    #[serde(default)]
    pub artifacts: Vec<ArtifactDecl>,

    /// Command run inside the context to build for the local target
    #[serde(default)]
    pub build_command: Option<Vec<String>>,

    /// Command that runs the service for the local target
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactDecl {
    /// Path relative to the service's build context
    pub path: PathBuf,

    /// Canonical source relative to the manifest root, copied in when absent
    #[serde(default)]
    pub derive_from: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetDecl {
    #[serde(default)]
    pub registry: Option<String>,

    /// Compose files or manifest directories, relative to the manifest root
    #[serde(default)]
    pub files: Option<Vec<PathBuf>>,

    #[serde(default)]
    pub env: BTreeMap<String, VariableDecl>,
}

/// A variable binding: either a plain default value or a full declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum VariableDecl {
    Value(String),
    Spec {
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        required: bool,
    },
}

impl VariableDecl {
    pub fn default_value(&self) -> Option<&str> {
        match self {
            VariableDecl::Value(v) => Some(v),
            VariableDecl::Spec { default, .. } => default.as_deref(),
        }
    }

    pub fn is_required(&self) -> bool {
        match self {
            VariableDecl::Value(_) => false,
            VariableDecl::Spec { required, .. } => *required,
        }
    }
}

impl StackManifest {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigurationError::InvalidManifest {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        debug!(manifest = %path.display(), "Loading stack manifest");
        Self::from_yaml_str(&content, root).map_err(|e| match e {
            ConfigurationError::InvalidManifest { message, .. } => {
                ConfigurationError::InvalidManifest {
                    path: path.to_path_buf(),
                    message,
                }
            }
            other => other,
        })
    }

    pub fn from_yaml_str(content: &str, root: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
        let root = root.into();
        let mut manifest: StackManifest =
            serde_yaml::from_str(content).map_err(|e| ConfigurationError::InvalidManifest {
                path: root.join(DEFAULT_MANIFEST_FILE),
                message: e.to_string(),
            })?;
        manifest.root = root;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(ConfigurationError::InvalidManifest {
                    path: self.root.join(DEFAULT_MANIFEST_FILE),
                    message: "service name cannot be empty".to_string(),
                });
            }
            if !seen.insert(service.name.as_str()) {
                return Err(ConfigurationError::DuplicateService {
                    service: service.name.clone(),
                });
            }
        }

        for key in self.targets.keys() {
            key.parse::<Target>()?;
        }

        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDecl> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn target(&self, target: Target) -> Option<&TargetDecl> {
        self.targets.get(target.as_str())
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Builds the validated service graph in declaration order.
    pub fn service_graph(&self) -> Result<ServiceGraph, ConfigurationError> {
        let nodes = self
            .services
            .iter()
            .map(|s| ServiceNode {
                id: s.name.clone(),
                context: self.resolve_path(&s.context),
                dependencies: s.depends_on.clone(),
                build_args: s.build_args.clone(),
                readiness: s.readiness.clone(),
                build_command: s.build_command.clone(),
                command: s.command.clone(),
                status: ServiceStatus::Unbuilt,
            })
            .collect();
        ServiceGraph::new(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
tag: "1.2"
services:
  - name: database
    context: services/database
    readiness:
      tcp: { host: localhost, port: 5432 }
  - name: backend
    context: backend
    depends_on: [database]
    build_args:
      PYTHON_VERSION: "3.11"
    artifacts:
      - path: requirements.txt
  - name: frontend
    context: frontend
    depends_on: [backend]
    artifacts:
      - path: nginx.conf
        derive_from: nginx/nginx.conf
targets:
  docker-prod:
    registry: registry.example.com/stack
    env:
      DATABASE_URL: { required: true }
      LOG_LEVEL: info
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = StackManifest::from_yaml_str(MANIFEST, "/srv/stack").unwrap();
        assert_eq!(manifest.tag, "1.2");
        assert_eq!(manifest.services.len(), 3);
        assert_eq!(manifest.root, PathBuf::from("/srv/stack"));

        let frontend = manifest.service("frontend").unwrap();
        assert_eq!(
            frontend.artifacts[0].derive_from,
            Some(PathBuf::from("nginx/nginx.conf"))
        );

        let prod = manifest.target(Target::DockerProd).unwrap();
        assert!(prod.env["DATABASE_URL"].is_required());
        assert_eq!(prod.env["LOG_LEVEL"].default_value(), Some("info"));
    }

    #[test]
    fn test_nested_readiness_checks() {
        let yaml = r#"
services:
  - name: db
    context: db
    readiness:
      tcp: { host: localhost, port: 5432 }
  - name: api
    context: api
    readiness:
      http: { url: "http://localhost:8000/health", expected_status: 204 }
  - name: worker
    context: worker
    readiness:
      command: { program: pg_isready, args: ["-h", "db"] }
  - name: sidecar
    context: sidecar
    readiness: none
  - name: batch
    context: batch
"#;
        let manifest = StackManifest::from_yaml_str(yaml, "/srv").unwrap();
        assert_eq!(
            manifest.service("db").unwrap().readiness,
            ReadinessCheck::Tcp {
                host: "localhost".to_string(),
                port: 5432,
            }
        );
        assert_eq!(
            manifest.service("api").unwrap().readiness,
            ReadinessCheck::Http {
                url: "http://localhost:8000/health".to_string(),
                expected_status: Some(204),
            }
        );
        assert_eq!(
            manifest.service("worker").unwrap().readiness.to_string(),
            "exec pg_isready -h db"
        );
        assert_eq!(manifest.service("sidecar").unwrap().readiness, ReadinessCheck::None);
        assert_eq!(manifest.service("batch").unwrap().readiness, ReadinessCheck::None);

        let graph = manifest.service_graph().unwrap();
        assert!(matches!(
            graph.node("db").unwrap().readiness,
            ReadinessCheck::Tcp { port: 5432, .. }
        ));
    }

    #[test]
    fn test_service_graph_resolves_contexts() {
        let manifest = StackManifest::from_yaml_str(MANIFEST, "/srv/stack").unwrap();
        let graph = manifest.service_graph().unwrap();
        assert_eq!(
            graph.node("backend").unwrap().context,
            PathBuf::from("/srv/stack/backend")
        );
        assert_eq!(graph.order(), vec!["database", "backend", "frontend"]);
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let yaml = "services:\n  - { name: api, context: a }\n  - { name: api, context: b }\n";
        let err = StackManifest::from_yaml_str(yaml, ".").unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DuplicateService {
                service: "api".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_target_key_rejected() {
        let yaml = "services: []\ntargets:\n  staging: {}\n";
        let err = StackManifest::from_yaml_str(yaml, ".").unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownTarget { .. }));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = StackManifest::from_yaml_str("services: [", ".").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidManifest { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = StackManifest::load(Path::new("/nonexistent/shipyard.yaml")).unwrap_err();
        match err {
            ConfigurationError::InvalidManifest { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/shipyard.yaml"));
            }
            other => panic!("Expected InvalidManifest, got {:?}", other),
        }
    }
}
