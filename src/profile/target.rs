use crate::error::ConfigurationError;
use crate::graph::closest_match;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Deployment environment a run is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
    Local,
    DockerDev,
    DockerProd,
    Kubernetes,
    CloudVm,
}

/// How services are started for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Process,
    Compose,
    Kubectl,
}

impl Target {
    pub const ALL: [Target; 5] = [
        Target::Local,
        Target::DockerDev,
        Target::DockerProd,
        Target::Kubernetes,
        Target::CloudVm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Local => "local",
            Target::DockerDev => "docker-dev",
            Target::DockerProd => "docker-prod",
            Target::Kubernetes => "kubernetes",
            Target::CloudVm => "cloud-vm",
        }
    }

    pub fn default_registry(self) -> Option<&'static str> {
        match self {
            Target::Kubernetes => Some("localhost:5000"),
            _ => None,
        }
    }

    pub fn default_files(self) -> Vec<PathBuf> {
        let files: &[&str] = match self {
            Target::Local => &[],
            Target::DockerDev => &["docker-compose.yml", "docker-compose.dev.yml"],
            Target::DockerProd => &["docker-compose.yml", "docker-compose.prod.yml"],
            Target::Kubernetes => &["k8s"],
            Target::CloudVm => &["docker-compose.prod.yml"],
        };
        files.iter().map(PathBuf::from).collect()
    }

    pub fn launch_mode(self) -> LaunchMode {
        match self {
            Target::Local => LaunchMode::Process,
            Target::DockerDev | Target::DockerProd | Target::CloudVm => LaunchMode::Compose,
            Target::Kubernetes => LaunchMode::Kubectl,
        }
    }
}

impl FromStr for Target {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Target::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ConfigurationError::UnknownTarget {
                target: s.to_string(),
                suggestion: closest_match(&normalized, Target::ALL.iter().map(|t| t.as_str())),
            })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_targets() {
        for target in Target::ALL {
            assert_eq!(target.as_str().parse::<Target>().unwrap(), target);
        }
        assert_eq!("Docker-Prod".parse::<Target>().unwrap(), Target::DockerProd);
    }

    #[test]
    fn test_unknown_target() {
        let err = "staging".parse::<Target>().unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownTarget { ref target, .. } if target == "staging"));
    }

    #[test]
    fn test_unknown_target_suggestion() {
        match "kubernets".parse::<Target>().unwrap_err() {
            ConfigurationError::UnknownTarget { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("kubernetes"));
            }
            other => panic!("Expected UnknownTarget, got {:?}", other),
        }
    }

    #[test]
    fn test_launch_modes() {
        assert_eq!(Target::Local.launch_mode(), LaunchMode::Process);
        assert_eq!(Target::CloudVm.launch_mode(), LaunchMode::Compose);
        assert_eq!(Target::Kubernetes.launch_mode(), LaunchMode::Kubectl);
    }
}
