//! Service dependency graph
//!
//! Nodes keep their declaration order; the build/start order is a topological
//! sort that breaks ties by that order so repeated runs are deterministic.

use crate::error::ConfigurationError;
use crate::readiness::ReadinessCheck;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Unbuilt,
    Building,
    Built,
    Starting,
    Healthy,
    Degraded,
    Failed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Unbuilt => "unbuilt",
            ServiceStatus::Building => "building",
            ServiceStatus::Built => "built",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: String,
    pub context: PathBuf,
    pub dependencies: Vec<String>,
    pub build_args: BTreeMap<String, String>,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub readiness: ReadinessCheck,
    pub build_command: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    pub status: ServiceStatus,
}

impl ServiceNode {
    /// A node with no build args, readiness probe or commands.
    pub fn new(id: impl Into<String>, context: impl Into<PathBuf>, deps: &[&str]) -> Self {
        Self {
            id: id.into(),
            context: context.into(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            build_args: BTreeMap::new(),
            readiness: ReadinessCheck::None,
            build_command: None,
            command: None,
            status: ServiceStatus::Unbuilt,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceGraph {
    nodes: Vec<ServiceNode>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
}

impl ServiceGraph {
    /// Validates edges and computes the linear order.
    ///
    /// Fails with `UnknownDependency` for dangling edges and `DependencyCycle`
    /// when no linear order exists.
    pub fn new(nodes: Vec<ServiceNode>) -> Result<Self, ConfigurationError> {
        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(ConfigurationError::DuplicateService {
                    service: node.id.clone(),
                });
            }
        }

        for node in &nodes {
            for dep in &node.dependencies {
                if !index.contains_key(dep) {
                    return Err(ConfigurationError::UnknownDependency {
                        service: node.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        let order = topological_order(&nodes, &index)?;
        Ok(Self {
            nodes,
            index,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&ServiceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn status(&self, id: &str) -> Option<ServiceStatus> {
        self.node(id).map(|n| n.status)
    }

    pub fn set_status(&mut self, id: &str, status: ServiceStatus) {
        if let Some(&i) = self.index.get(id) {
            self.nodes[i].status = status;
        }
    }

    /// Services in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ServiceNode> {
        self.nodes.iter()
    }

    /// Build and start order: every service after all of its dependencies.
    pub fn order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.nodes[i].id.as_str())
            .collect()
    }

    /// The order grouped into waves whose members do not depend on each other.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let mut depth: HashMap<usize, usize> = HashMap::new();
        let mut levels: Vec<Vec<&str>> = Vec::new();

        for &i in &self.order {
            let level = self.nodes[i]
                .dependencies
                .iter()
                .map(|d| depth[&self.index[d]] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(i, level);

            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(self.nodes[i].id.as_str());
        }

        levels
    }

    /// Every service that depends on `id`, directly or transitively.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        let mut found: BTreeSet<usize> = BTreeSet::new();
        let mut frontier = vec![id.to_string()];

        while let Some(current) = frontier.pop() {
            for (i, node) in self.nodes.iter().enumerate() {
                if node.dependencies.iter().any(|d| d == &current) && found.insert(i) {
                    frontier.push(node.id.clone());
                }
            }
        }

        self.order
            .iter()
            .filter(|i| found.contains(i))
            .map(|&i| self.nodes[i].id.as_str())
            .collect()
    }

    /// Restricts the graph to `names` plus everything they depend on.
    pub fn closure(&self, names: &[String]) -> Result<ServiceGraph, ConfigurationError> {
        let mut keep: HashSet<usize> = HashSet::new();
        let mut frontier: Vec<usize> = Vec::new();

        for name in names {
            match self.index.get(name) {
                Some(&i) => frontier.push(i),
                None => {
                    return Err(ConfigurationError::UnknownService {
                        service: name.clone(),
                        suggestion: closest_match(name, self.nodes.iter().map(|n| n.id.as_str())),
                    })
                }
            }
        }

        while let Some(i) = frontier.pop() {
            if keep.insert(i) {
                for dep in &self.nodes[i].dependencies {
                    frontier.push(self.index[dep]);
                }
            }
        }

        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, n)| n.clone())
            .collect();
        ServiceGraph::new(nodes)
    }
}

/// Kahn's algorithm, always picking the ready node declared first.
fn topological_order(
    nodes: &[ServiceNode],
    index: &HashMap<String, usize>,
) -> Result<Vec<usize>, ConfigurationError> {
    let mut pending: Vec<usize> = nodes.iter().map(|n| n.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.dependencies {
            dependents[index[dep]].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &dependent in &dependents[i] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < nodes.len() {
        let done: HashSet<usize> = order.iter().copied().collect();
        return Err(ConfigurationError::DependencyCycle {
            path: find_cycle(nodes, index, &done),
        });
    }

    Ok(order)
}

/// Walks unresolved dependencies from the first stuck node until one repeats.
///
/// Every node left over by Kahn's algorithm still has an unresolved
/// dependency, so the walk always closes a loop.
fn find_cycle(
    nodes: &[ServiceNode],
    index: &HashMap<String, usize>,
    done: &HashSet<usize>,
) -> Vec<String> {
    let Some(start) = (0..nodes.len()).find(|i| !done.contains(i)) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = vec![start];
    let mut current = start;
    loop {
        let next = nodes[current]
            .dependencies
            .iter()
            .map(|d| index[d])
            .find(|i| !done.contains(i));

        let Some(next) = next else {
            break;
        };

        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| nodes[i].id.clone()).collect();
            cycle.push(nodes[next].id.clone());
            return cycle;
        }

        path.push(next);
        current = next;
    }

    path.iter().map(|&i| nodes[i].id.clone()).collect()
}

pub(crate) fn closest_match<'a>(
    input: &str,
    candidates: impl Iterator<Item = &'a str>,
) -> Option<String> {
    candidates
        .map(|c| (c, strsim::jaro_winkler(input, c)))
        .filter(|(_, score)| *score > 0.8)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> Result<ServiceGraph, ConfigurationError> {
        ServiceGraph::new(
            edges
                .iter()
                .map(|(id, deps)| ServiceNode::new(*id, format!("/ctx/{}", id), deps))
                .collect(),
        )
    }

    fn position(order: &[&str], id: &str) -> usize {
        order.iter().position(|s| *s == id).unwrap()
    }

    #[test]
    fn test_simple_linear_dependencies() {
        let g = graph(&[("app", &["lib"]), ("lib", &[])]).unwrap();
        assert_eq!(g.order(), vec!["lib", "app"]);
    }

    #[test]
    fn test_diamond_dependencies() {
        let g = graph(&[
            ("app", &["lib1", "lib2"]),
            ("lib1", &["base"]),
            ("lib2", &["base"]),
            ("base", &[]),
        ])
        .unwrap();
        let order = g.order();

        assert!(position(&order, "base") < position(&order, "lib1"));
        assert!(position(&order, "base") < position(&order, "lib2"));
        assert!(position(&order, "lib1") < position(&order, "app"));
        assert!(position(&order, "lib2") < position(&order, "app"));
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let g = graph(&[
            ("frontend", &["backend"]),
            ("cache", &[]),
            ("backend", &["database"]),
            ("database", &[]),
            ("queue", &[]),
        ])
        .unwrap();
        assert_eq!(
            g.order(),
            vec!["cache", "database", "backend", "frontend", "queue"]
        );
    }

    #[test]
    fn test_every_service_after_its_dependencies() {
        let g = graph(&[
            ("e", &["c", "d"]),
            ("d", &["b"]),
            ("c", &["a", "b"]),
            ("b", &["a"]),
            ("a", &[]),
            ("f", &["e", "a"]),
        ])
        .unwrap();
        let order = g.order();
        for node in g.nodes() {
            for dep in &node.dependencies {
                assert!(position(&order, dep) < position(&order, &node.id));
            }
        }
    }

    #[test]
    fn test_cycle_detection_names_the_cycle() {
        let err = graph(&[("app1", &["app2"]), ("app2", &["app1"])]).unwrap_err();
        match err {
            ConfigurationError::DependencyCycle { path } => {
                assert_eq!(path, vec!["app1", "app2", "app1"]);
            }
            other => panic!("Expected DependencyCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_behind_acyclic_prefix() {
        let err = graph(&[
            ("web", &["api"]),
            ("api", &["worker"]),
            ("worker", &["queue"]),
            ("queue", &["worker"]),
            ("db", &[]),
        ])
        .unwrap_err();
        match err {
            ConfigurationError::DependencyCycle { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"worker".to_string()));
                assert!(path.contains(&"queue".to_string()));
                assert!(!path.contains(&"db".to_string()));
            }
            other => panic!("Expected DependencyCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = graph(&[("loop", &["loop"])]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DependencyCycle {
                path: vec!["loop".to_string(), "loop".to_string()]
            }
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let err = graph(&[("backend", &["databse"])]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownDependency {
                service: "backend".to_string(),
                missing: "databse".to_string(),
            }
        );
    }

    #[test]
    fn test_levels() {
        let g = graph(&[
            ("database", &[]),
            ("backend", &["database"]),
            ("frontend", &["backend"]),
            ("cache", &[]),
        ])
        .unwrap();
        assert_eq!(
            g.levels(),
            vec![vec!["database", "cache"], vec!["backend"], vec!["frontend"]]
        );
    }

    #[test]
    fn test_dependents_of() {
        let g = graph(&[
            ("database", &[]),
            ("backend", &["database"]),
            ("frontend", &["backend"]),
            ("cache", &[]),
        ])
        .unwrap();
        assert_eq!(g.dependents_of("database"), vec!["backend", "frontend"]);
        assert!(g.dependents_of("cache").is_empty());
    }

    #[test]
    fn test_closure_pulls_in_dependencies() {
        let g = graph(&[
            ("database", &[]),
            ("backend", &["database"]),
            ("frontend", &["backend"]),
            ("cache", &[]),
        ])
        .unwrap();
        let sub = g.closure(&["backend".to_string()]).unwrap();
        assert_eq!(sub.order(), vec!["database", "backend"]);
    }

    #[test]
    fn test_closure_unknown_service_suggests() {
        let g = graph(&[("database", &[]), ("backend", &["database"])]).unwrap();
        let err = g.closure(&["bakend".to_string()]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownService {
                service: "bakend".to_string(),
                suggestion: Some("backend".to_string()),
            }
        );
    }

    #[test]
    fn test_status_updates() {
        let mut g = graph(&[("database", &[])]).unwrap();
        assert_eq!(g.status("database"), Some(ServiceStatus::Unbuilt));
        g.set_status("database", ServiceStatus::Healthy);
        assert_eq!(g.status("database"), Some(ServiceStatus::Healthy));
    }
}
