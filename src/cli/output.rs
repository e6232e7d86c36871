//! Output formatting for run reports, plans, verification and cache state
//!
//! JSON and YAML render the serialized structures as-is so they can be piped
//! into other tools; the human format is a compact summary for terminals.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::cache::BuildCacheState;
use crate::graph::{ServiceGraph, ServiceStatus};
use crate::orchestrator::RunReport;
use crate::profile::DeploymentProfile;
use crate::verify::VerificationResult;

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
}

/// What `plan` shows: the resolved profile plus the order things would happen in.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub target: String,
    pub registry: Option<String>,
    pub files: Vec<PathBuf>,
    pub env: std::collections::BTreeMap<String, String>,
    pub services: Vec<PlannedService>,
    pub build_order: Vec<String>,
    pub levels: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedService {
    pub name: String,
    pub image: String,
    pub context: PathBuf,
    pub depends_on: Vec<String>,
}

impl Plan {
    pub fn new(profile: &DeploymentProfile, graph: &ServiceGraph) -> Self {
        let build_order: Vec<String> = graph.order().into_iter().map(String::from).collect();
        let services = build_order
            .iter()
            .filter_map(|id| graph.node(id))
            .map(|node| PlannedService {
                name: node.id.clone(),
                image: profile.image(&node.id).unwrap_or(&node.id).to_string(),
                context: node.context.clone(),
                depends_on: node.dependencies.clone(),
            })
            .collect();

        Self {
            target: profile.target.to_string(),
            registry: profile.registry.clone(),
            files: profile.files.clone(),
            env: profile.env.clone(),
            services,
            levels: graph
                .levels()
                .into_iter()
                .map(|wave| wave.into_iter().map(String::from).collect())
                .collect(),
            build_order,
        }
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_report(&self, report: &RunReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(report, "run report"),
            OutputFormat::Yaml => to_yaml(report, "run report"),
            OutputFormat::Human => Ok(self.report_human(report)),
        }
    }

    pub fn format_plan(&self, plan: &Plan) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(plan, "plan"),
            OutputFormat::Yaml => to_yaml(plan, "plan"),
            OutputFormat::Human => Ok(self.plan_human(plan)),
        }
    }

    pub fn format_verification(&self, results: &[VerificationResult]) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(&results, "verification results"),
            OutputFormat::Yaml => to_yaml(&results, "verification results"),
            OutputFormat::Human => Ok(self.verification_human(results)),
        }
    }

    pub fn format_cache(&self, states: &[BuildCacheState]) -> Result<String> {
        match self.format {
            OutputFormat::Json => to_json(&states, "cache state"),
            OutputFormat::Yaml => to_yaml(&states, "cache state"),
            OutputFormat::Human => Ok(self.cache_human(states)),
        }
    }

    // Human-readable formatting methods

    fn report_human(&self, report: &RunReport) -> String {
        let mut out = String::new();
        let verdict = if report.success { "SUCCESS" } else { "FAILED" };
        out.push_str(&format!(
            "Deploy {} to {} ({:.1}s)\n",
            verdict,
            report.target,
            report.duration_ms as f64 / 1000.0
        ));
        out.push_str(&format!("Run: {}\n", report.run_id));

        if let Some(error) = &report.error {
            let category = report
                .category
                .map(|c| c.to_string())
                .unwrap_or_else(|| "internal".to_string());
            out.push_str(&format!("Error ({}): {}\n", category, error));
        }

        if !report.build_order.is_empty() {
            out.push_str(&format!("\nBuild order: {}\n", report.build_order.join(" -> ")));
        }

        let missing: Vec<_> = report
            .verification
            .iter()
            .filter(|r| r.expected_present && !r.actual_present)
            .collect();
        if !missing.is_empty() {
            out.push_str("\nMissing artifacts:\n");
            for result in missing {
                out.push_str(&format!("  {} ({})\n", result.path.display(), result.service));
            }
        }

        if !report.builds.is_empty() {
            out.push_str("\nBuilds:\n");
            for build in &report.builds {
                let cache = report
                    .cache
                    .iter()
                    .find(|c| c.service == build.service)
                    .map(|c| c.reason.to_string())
                    .unwrap_or_default();
                let action = match (&build.shared_with, build.invoked) {
                    (Some(other), _) => format!("shared with {}", other),
                    (None, true) => format!("built in {} attempt(s)", build.attempts),
                    (None, false) if build.succeeded() => "image present, skipped".to_string(),
                    (None, false) => "not built".to_string(),
                };
                out.push_str(&format!(
                    "  {} {:<20} {:<10} {} [{}]\n",
                    status_icon(build.status),
                    build.service,
                    build.status,
                    action,
                    cache
                ));
                if let Some(error) = &build.error {
                    out.push_str(&format!("      {}\n", error));
                }
            }
        }

        if !report.readiness.is_empty() {
            out.push_str("\nServices:\n");
            for outcome in &report.readiness {
                out.push_str(&format!(
                    "  {} {:<20} {:<10} {} attempt(s), {:.1}s\n",
                    status_icon(outcome.status),
                    outcome.service,
                    outcome.status,
                    outcome.attempts,
                    outcome.elapsed_ms as f64 / 1000.0
                ));
                if let Some(error) = &outcome.last_error {
                    out.push_str(&format!("      {}\n", error));
                }
            }
        }

        out
    }

    fn plan_human(&self, plan: &Plan) -> String {
        let mut out = String::new();
        out.push_str(&format!("Target: {}\n", plan.target));
        out.push_str(&format!("Registry: {}\n", plan.registry.as_deref().unwrap_or("(none)")));
        if !plan.files.is_empty() {
            let files: Vec<String> = plan.files.iter().map(|f| f.display().to_string()).collect();
            out.push_str(&format!("Files: {}\n", files.join(", ")));
        }

        if !plan.env.is_empty() {
            out.push_str("\nVariables:\n");
            for (key, value) in &plan.env {
                out.push_str(&format!("  {}={}\n", key, value));
            }
        }

        out.push_str("\nServices:\n");
        for service in &plan.services {
            let deps = if service.depends_on.is_empty() {
                String::new()
            } else {
                format!(" (after {})", service.depends_on.join(", "))
            };
            out.push_str(&format!("  {:<20} {}{}\n", service.name, service.image, deps));
        }

        out.push_str("\nBuild order:\n");
        for (i, wave) in plan.levels.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, wave.join(", ")));
        }
        out
    }

    fn verification_human(&self, results: &[VerificationResult]) -> String {
        if results.is_empty() {
            return "No required artifacts for this target\n".to_string();
        }

        let mut out = String::new();
        for result in results {
            let mark = match (result.actual_present, result.derived) {
                (true, true) => "✓ (derived)",
                (true, false) => "✓",
                (false, _) => "✗ missing",
            };
            out.push_str(&format!("{:<20} {} {}\n", result.service, result.path.display(), mark));
        }
        out
    }

    fn cache_human(&self, states: &[BuildCacheState]) -> String {
        if states.is_empty() {
            return "No build cache state recorded\n".to_string();
        }

        let mut out = String::new();
        for state in states {
            let short = state.fingerprint.get(..12).unwrap_or(&state.fingerprint);
            out.push_str(&format!(
                "{:<20} {}  {}\n",
                state.service,
                short,
                state.last_built_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        out
    }
}

fn status_icon(status: ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Healthy | ServiceStatus::Built => "✓",
        ServiceStatus::Degraded => "~",
        ServiceStatus::Failed => "✗",
        _ => "·",
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {} to JSON", what))
}

fn to_yaml<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<String> {
    serde_yaml::to_string(value).with_context(|| format!("Failed to serialize {} to YAML", what))
}
