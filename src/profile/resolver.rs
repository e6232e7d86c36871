use super::target::Target;
use crate::error::ConfigurationError;
use crate::graph::ServiceGraph;
use crate::manifest::StackManifest;
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};

/// Caller-supplied values that take precedence over manifest defaults.
#[derive(Debug, Clone, Default)]
pub struct ProfileOverrides {
    pub registry: Option<String>,
    pub env: BTreeMap<String, String>,

    /// Fill declared variables from the process environment when not overridden
    pub inherit_process_env: bool,
}

/// Everything a run needs to know about its target, resolved once.
///
/// There is no mutating API; components share it by reference.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentProfile {
    pub target: Target,
    pub root: PathBuf,
    pub registry: Option<String>,
    pub files: Vec<PathBuf>,
    pub contexts: BTreeMap<String, PathBuf>,
    pub images: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

impl DeploymentProfile {
    pub fn context(&self, service: &str) -> Option<&PathBuf> {
        self.contexts.get(service)
    }

    pub fn image(&self, service: &str) -> Option<&str> {
        self.images.get(service).map(String::as_str)
    }

    /// Local runs start services as plain processes, so every service in
    /// `graph` needs a `command`. Other targets start from their own files.
    pub fn ensure_launchable(&self, graph: &ServiceGraph) -> Result<(), ConfigurationError> {
        if self.target != Target::Local {
            return Ok(());
        }
        match graph.nodes().find(|node| node.command.is_none()) {
            Some(node) => Err(ConfigurationError::MissingLocalCommand {
                service: node.id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Variables handed to the start interface: declared env plus one
    /// `<SERVICE>_IMAGE` per service so manifests can reference built images.
    pub fn launch_env(&self) -> BTreeMap<String, String> {
        let mut vars = self.env.clone();
        for (service, image) in &self.images {
            let key = format!(
                "{}_IMAGE",
                service.to_uppercase().replace(['-', '.'], "_")
            );
            vars.entry(key).or_insert_with(|| image.clone());
        }
        vars
    }
}

pub struct TargetResolver<'a> {
    manifest: &'a StackManifest,
}

impl<'a> TargetResolver<'a> {
    pub fn new(manifest: &'a StackManifest) -> Self {
        Self { manifest }
    }

    pub fn resolve(
        &self,
        target: &str,
        overrides: &ProfileOverrides,
    ) -> Result<DeploymentProfile, ConfigurationError> {
        let target: Target = target.parse()?;
        let decl = self.manifest.target(target).cloned().unwrap_or_default();

        let registry = overrides
            .registry
            .clone()
            .or(decl.registry.clone())
            .or_else(|| target.default_registry().map(str::to_string))
            .map(|r| r.trim_end_matches('/').to_string())
            .filter(|r| !r.is_empty());

        let files = decl
            .files
            .clone()
            .unwrap_or_else(|| target.default_files())
            .iter()
            .map(|f| self.manifest.resolve_path(f))
            .collect();

        let mut bound = BTreeMap::new();
        for (name, var) in &decl.env {
            let value = overrides
                .env
                .get(name)
                .cloned()
                .or_else(|| {
                    if overrides.inherit_process_env {
                        env::var(name).ok()
                    } else {
                        None
                    }
                })
                .or_else(|| var.default_value().map(str::to_string));

            match value {
                Some(v) => {
                    bound.insert(name.clone(), v);
                }
                None if var.is_required() => {
                    return Err(ConfigurationError::MissingRequiredVariable {
                        target: target.to_string(),
                        variable: name.clone(),
                    });
                }
                None => debug!(variable = %name, "Optional variable left unset"),
            }
        }

        // Overrides for variables the target does not declare are still passed through
        for (name, value) in &overrides.env {
            bound.entry(name.clone()).or_insert_with(|| value.clone());
        }

        let mut contexts = BTreeMap::new();
        let mut images = BTreeMap::new();
        for service in &self.manifest.services {
            contexts.insert(
                service.name.clone(),
                self.manifest.resolve_path(&service.context),
            );

            let name = service.image.as_deref().unwrap_or(&service.name);
            let image = match &registry {
                Some(registry) => format!("{}/{}:{}", registry, name, self.manifest.tag),
                None => format!("{}:{}", name, self.manifest.tag),
            };
            images.insert(service.name.clone(), image);
        }

        info!(
            target = %target,
            registry = registry.as_deref().unwrap_or("<none>"),
            services = contexts.len(),
            variables = bound.len(),
            "Resolved deployment profile"
        );

        Ok(DeploymentProfile {
            target,
            root: self.manifest.root.clone(),
            registry,
            files,
            contexts,
            images,
            env: bound,
        })
    }
}
